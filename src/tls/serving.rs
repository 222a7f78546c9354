use super::{
    crypto_provider,
    metadata::CertificateMetadata,
    pem::{parse_cert_chain, parse_private_key, read_file},
};
use crate::{
    error::{Error, Result},
    metrics::{SERVING_CERT_AGE_SECONDS, SERVING_CERT_EXPIRY_DAYS, SERVING_CERT_RELOADS},
};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use rustls::{
    ServerConfig,
    server::{ClientHello, ResolvesServerCert},
    sign::CertifiedKey,
    version::{TLS12, TLS13},
};
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A parsed certificate chain and its private key, ready for handshakes
pub struct ServingCertificate {
    certified_key: Arc<CertifiedKey>,
    metadata: CertificateMetadata,
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
    loaded_at: DateTime<Utc>,
}

impl fmt::Debug for ServingCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServingCertificate")
            .field("subject", &self.metadata.subject)
            .field("not_after", &self.metadata.not_after)
            .field("chain_len", &self.certified_key.cert.len())
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

impl ServingCertificate {
    /// Parse a PEM certificate chain and private key and check they belong together
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if either PEM is invalid, the key type is not
    /// supported, or the key does not match the leaf certificate
    pub fn from_pem(
        cert_path: &Path,
        cert_pem: Vec<u8>,
        key_path: &Path,
        key_pem: Vec<u8>,
    ) -> Result<Self> {
        let chain = parse_cert_chain(cert_path, &cert_pem)?;
        let key = parse_private_key(key_path, &key_pem)?;

        let metadata = chain
            .first()
            .ok_or_else(|| Error::tls(cert_path, "no certificates found"))
            .and_then(|leaf| {
                CertificateMetadata::from_der(leaf.as_ref()).map_err(|e| Error::tls(cert_path, e))
            })?;

        let signing_key = crypto_provider()
            .key_provider
            .load_private_key(key)
            .map_err(|e| Error::tls(key_path, format!("unsupported private key: {e}")))?;

        let certified_key = CertifiedKey::new(chain, signing_key);
        certified_key.keys_match().map_err(|e| {
            Error::tls(
                key_path,
                format!("private key does not match {}: {e}", cert_path.display()),
            )
        })?;

        Ok(Self {
            certified_key: Arc::new(certified_key),
            metadata,
            cert_pem,
            key_pem,
            loaded_at: Utc::now(),
        })
    }

    #[must_use]
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        self.certified_key.clone()
    }

    #[must_use]
    pub const fn metadata(&self) -> &CertificateMetadata {
        &self.metadata
    }

    #[must_use]
    pub const fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    fn same_material(&self, cert_pem: &[u8], key_pem: &[u8]) -> bool {
        self.cert_pem == cert_pem && self.key_pem == key_pem
    }
}

/// Result of a refresh cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Files on disk match the snapshot in use
    Unchanged,
    /// A new snapshot was published
    Rotated,
}

impl Refresh {
    pub(crate) const fn as_label(self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Rotated => "rotated",
        }
    }
}

/// Serving certificate store for the HTTPS listener
#[derive(Debug)]
pub struct ServingCredentials {
    cert_path: PathBuf,
    key_path: PathBuf,
    current: ArcSwap<ServingCertificate>,
}

impl ServingCredentials {
    /// Read and parse the initial certificate/key pair
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadFile`] or [`Error::Tls`]; either one is fatal at startup
    pub async fn load(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Result<Self> {
        let cert_path = cert_path.into();
        let key_path = key_path.into();
        let initial = Self::read(&cert_path, &key_path).await?;

        info!(
            cert_file = %cert_path.display(),
            subject = %initial.metadata.subject,
            not_after = %initial.metadata.not_after,
            "Loaded serving certificate"
        );

        Ok(Self {
            cert_path,
            key_path,
            current: ArcSwap::from_pointee(initial),
        })
    }

    async fn read(cert_path: &Path, key_path: &Path) -> Result<ServingCertificate> {
        let cert_pem = read_file(cert_path).await?;
        let key_pem = read_file(key_path).await?;
        ServingCertificate::from_pem(cert_path, cert_pem, key_path, key_pem)
    }

    /// Snapshot in use for new handshakes
    #[must_use]
    pub fn current(&self) -> Arc<ServingCertificate> {
        self.current.load_full()
    }

    /// Atomically replace the snapshot
    pub fn publish(&self, snapshot: ServingCertificate) {
        self.current.store(Arc::new(snapshot));
    }

    /// Re-read both files and publish them if they changed
    ///
    /// # Errors
    ///
    /// Returns the read/parse error; the previous snapshot stays in use
    pub async fn refresh(&self) -> Result<Refresh> {
        let cert_pem = read_file(&self.cert_path).await?;
        let key_pem = read_file(&self.key_path).await?;

        if self.current.load().same_material(&cert_pem, &key_pem) {
            return Ok(Refresh::Unchanged);
        }

        let snapshot =
            ServingCertificate::from_pem(&self.cert_path, cert_pem, &self.key_path, key_pem)?;

        info!(
            cert_file = %self.cert_path.display(),
            subject = %snapshot.metadata.subject,
            not_after = %snapshot.metadata.not_after,
            "Serving certificate rotated"
        );

        self.publish(snapshot);
        Ok(Refresh::Rotated)
    }

    /// Refresh on a fixed interval until `cancel` fires
    ///
    /// Failures are logged and counted, never propagated.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // the first tick completes immediately
        ticker.tick().await;
        self.observe();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let outcome = match self.refresh().await {
                Ok(refresh) => refresh.as_label(),
                Err(err) => {
                    error!(
                        cert_file = %self.cert_path.display(),
                        key_file = %self.key_path.display(),
                        error = %err,
                        "Failed to refresh serving certificate, keeping the previous one"
                    );
                    "error"
                }
            };

            SERVING_CERT_RELOADS.with_label_values(&[outcome]).inc();
            self.observe();
        }

        debug!("Serving certificate refresh loop stopped");
    }

    fn observe(&self) {
        let now = Utc::now();
        let current = self.current.load();
        SERVING_CERT_AGE_SECONDS.set((now - current.loaded_at).num_seconds());
        SERVING_CERT_EXPIRY_DAYS.set(current.metadata.expiry_days(now));
    }
}

/// Hands the current snapshot to every TLS handshake
#[derive(Debug, Clone)]
pub struct ServingCertResolver {
    credentials: Arc<ServingCredentials>,
}

impl ServingCertResolver {
    #[must_use]
    pub const fn new(credentials: Arc<ServingCredentials>) -> Self {
        Self { credentials }
    }

    /// Server config for the listener: TLS 1.3 and 1.2, h2 and http/1.1
    ///
    /// # Errors
    ///
    /// Returns an error if the crypto provider does not support the protocol versions
    pub fn server_config(self) -> Result<ServerConfig> {
        let mut config = ServerConfig::builder_with_provider(crypto_provider())
            .with_protocol_versions(&[&TLS13, &TLS12])
            .map_err(|e| Error::Config(format!("unsupported TLS configuration: {e}")))?
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(self));

        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(config)
    }
}

impl ResolvesServerCert for ServingCertResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.credentials.current().certified_key())
    }
}
