use super::{
    crypto_provider,
    pem::{parse_cert_chain, read_file},
    serving::Refresh,
};
use crate::{
    error::{Error, Result},
    metrics::{DATABASE_CA_ANCHORS, DATABASE_CA_RELOADS},
};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use rustls::{
    ClientConfig, RootCertStore,
    client::WebPkiServerVerifier,
    version::{TLS12, TLS13},
};
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, warn};

/// CA bundle trusted when verifying the database server
pub struct TrustAnchors {
    roots: Arc<RootCertStore>,
    pem: Vec<u8>,
    loaded_at: DateTime<Utc>,
}

impl fmt::Debug for TrustAnchors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustAnchors")
            .field("anchors", &self.len())
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

impl TrustAnchors {
    /// Parse every CA certificate in a PEM bundle
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if the bundle is malformed or none of its
    /// certificates can be used as a trust anchor
    pub fn from_pem(path: &Path, pem: Vec<u8>) -> Result<Self> {
        let chain = parse_cert_chain(path, &pem)?;

        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(chain);
        if added == 0 {
            return Err(Error::tls(path, "no usable CA certificates found"));
        }
        if ignored > 0 {
            warn!(
                ca_file = %path.display(),
                ignored,
                "Ignored unparseable certificates in CA bundle"
            );
        }

        Ok(Self {
            roots: Arc::new(roots),
            pem,
            loaded_at: Utc::now(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    #[must_use]
    pub fn roots(&self) -> Arc<RootCertStore> {
        self.roots.clone()
    }

    #[must_use]
    pub const fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Full `WebPKI` verifier (chain and hostname) over these anchors
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the verifier cannot be built
    pub fn server_verifier(&self) -> Result<Arc<WebPkiServerVerifier>> {
        WebPkiServerVerifier::builder_with_provider(self.roots(), crypto_provider())
            .build()
            .map_err(|e| Error::Config(format!("failed to build database TLS verifier: {e}")))
    }

    /// Client config trusting these anchors and nothing else
    ///
    /// No webpki or platform roots are added, so only a server certificate
    /// chaining to the CA bundle passes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the config cannot be built
    pub fn client_config(&self) -> Result<ClientConfig> {
        Ok(ClientConfig::builder_with_provider(crypto_provider())
            .with_protocol_versions(&[&TLS13, &TLS12])
            .map_err(|e| Error::Config(format!("unsupported TLS configuration: {e}")))?
            .with_webpki_verifier(self.server_verifier()?)
            .with_no_client_auth())
    }
}

/// Database CA store, reloaded before every physical connection is opened
#[derive(Debug)]
pub struct DatabaseTrust {
    ca_path: PathBuf,
    current: ArcSwap<TrustAnchors>,
}

impl DatabaseTrust {
    /// Read and parse the CA bundle
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadFile`] or [`Error::Tls`]; either one is fatal at startup
    pub async fn load(ca_path: impl Into<PathBuf>) -> Result<Self> {
        let ca_path = ca_path.into();
        let anchors = TrustAnchors::from_pem(&ca_path, read_file(&ca_path).await?)?;

        info!(
            ca_file = %ca_path.display(),
            anchors = anchors.len(),
            "Loaded database CA bundle"
        );
        DATABASE_CA_ANCHORS.set(i64::try_from(anchors.len()).unwrap_or(i64::MAX));

        Ok(Self {
            ca_path,
            current: ArcSwap::from_pointee(anchors),
        })
    }

    #[must_use]
    pub fn ca_path(&self) -> &Path {
        &self.ca_path
    }

    /// Trust anchors from the last successful load
    #[must_use]
    pub fn current(&self) -> Arc<TrustAnchors> {
        self.current.load_full()
    }

    /// Reload the CA file and build the TLS config for one new connection
    ///
    /// # Errors
    ///
    /// Returns the reload error; the connection must not be attempted with
    /// stale anchors
    pub async fn client_config(&self) -> Result<ClientConfig> {
        self.reload().await?;
        self.current().client_config()
    }

    /// Re-read the CA file and publish it if it changed
    ///
    /// # Errors
    ///
    /// Returns the read/parse error; the previous anchors stay published
    pub async fn reload(&self) -> Result<Refresh> {
        let outcome = self.try_reload().await;
        let label = match &outcome {
            Ok(refresh) => refresh.as_label(),
            Err(_) => "error",
        };
        DATABASE_CA_RELOADS.with_label_values(&[label]).inc();
        outcome
    }

    async fn try_reload(&self) -> Result<Refresh> {
        let pem = read_file(&self.ca_path).await?;
        if self.current.load().pem == pem {
            return Ok(Refresh::Unchanged);
        }

        let anchors = TrustAnchors::from_pem(&self.ca_path, pem)?;
        info!(
            ca_file = %self.ca_path.display(),
            anchors = anchors.len(),
            "Database CA bundle rotated"
        );
        DATABASE_CA_ANCHORS.set(i64::try_from(anchors.len()).unwrap_or(i64::MAX));

        self.current.store(Arc::new(anchors));
        Ok(Refresh::Rotated)
    }
}
