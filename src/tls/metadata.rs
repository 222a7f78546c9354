use chrono::{DateTime, Utc};
use x509_parser::prelude::{FromDer, X509Certificate};

/// Identity and validity of a loaded certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateMetadata {
    /// Certificate subject DN
    pub subject: String,
    /// Certificate issuer DN
    pub issuer: String,
    /// End of the validity period
    pub not_after: DateTime<Utc>,
}

impl CertificateMetadata {
    /// Extract metadata from a DER-encoded certificate
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the certificate cannot be parsed
    pub fn from_der(cert_der: &[u8]) -> Result<Self, String> {
        let (_, cert) = X509Certificate::from_der(cert_der)
            .map_err(|e| format!("failed to parse certificate: {e}"))?;

        let raw = cert.validity().not_after.to_datetime();
        let not_after = DateTime::<Utc>::from_timestamp(raw.unix_timestamp(), raw.nanosecond())
            .ok_or_else(|| "invalid certificate expiry timestamp".to_string())?;

        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            not_after,
        })
    }

    /// Days until expiration (negative if expired)
    #[must_use]
    pub fn expiry_days(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days()
    }
}
