use crate::error::{Error, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::{certs, private_key};
use std::{io::Cursor, path::Path};
use tokio::fs;

/// Read a secret file, reporting the path on failure
///
/// # Errors
///
/// Returns [`Error::ReadFile`] if the file cannot be read
pub async fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).await.map_err(|source| Error::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse every certificate in a PEM bundle
///
/// # Errors
///
/// Returns [`Error::Tls`] if the PEM is malformed or holds no certificate
pub fn parse_cert_chain(path: &Path, pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = Cursor::new(pem);
    let parsed = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::tls(path, format!("invalid certificate PEM: {e}")))?;

    if parsed.is_empty() {
        return Err(Error::tls(path, "no certificates found"));
    }

    Ok(parsed)
}

/// Parse the first private key (PKCS#8, PKCS#1 or SEC1) in a PEM file
///
/// # Errors
///
/// Returns [`Error::Tls`] if the PEM is malformed or holds no key
pub fn parse_private_key(path: &Path, pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = Cursor::new(pem);
    private_key(&mut reader)
        .map_err(|e| Error::tls(path, format!("invalid private key PEM: {e}")))?
        .ok_or_else(|| Error::tls(path, "no private key found"))
}
