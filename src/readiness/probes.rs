use crate::{
    db::{PgPool, acquire},
    error::{Error, Result},
};
use serde::Deserialize;
use std::{
    future::Future,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::fs;
use tracing::debug;
use url::Url;

/// Group/version served by the storage API server
pub const STORAGE_GROUP_VERSION: &str = "storage.sbomscanner.kubewarden.io/v1alpha1";

/// A single fallible check against an external dependency
///
/// Implementations must be cheap to call repeatedly and must not retry
/// internally; retrying is the readiness gate's job.
pub trait Probe: Send + Sync {
    /// Dependency name used in logs, metrics and errors
    fn name(&self) -> &'static str;

    /// Try once
    fn check(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Probe backed by a closure, handy for one-off checks
pub struct FnProbe<F> {
    name: &'static str,
    f: F,
}

/// Build a [`Probe`] from a closure returning a future
pub const fn probe_fn<F, Fut>(name: &'static str, f: F) -> FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    FnProbe { name, f }
}

impl<F, Fut> Probe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn check(&self) -> impl Future<Output = Result<()>> + Send {
        (self.f)()
    }
}

/// Lightweight database round-trip through the pool
///
/// A checkout opens at most one connection, so one check is one connection
/// attempt and its error is the server's.
#[derive(Clone)]
pub struct PostgresProbe {
    pool: PgPool,
}

impl PostgresProbe {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl Probe for PostgresProbe {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn check(&self) -> Result<()> {
        let client = acquire(&self.pool).await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| Error::connectivity("postgres", e))?;
        Ok(())
    }
}

/// Connects to NATS, asks `JetStream` for the account info and hangs up
#[derive(Debug, Clone)]
pub struct JetStreamProbe {
    url: String,
    ca_file: Option<PathBuf>,
    connect_timeout: Duration,
}

impl JetStreamProbe {
    #[must_use]
    pub fn new(url: impl Into<String>, ca_file: Option<PathBuf>) -> Self {
        Self {
            url: url.into(),
            ca_file,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl Probe for JetStreamProbe {
    fn name(&self) -> &'static str {
        "jetstream"
    }

    async fn check(&self) -> Result<()> {
        let mut options =
            async_nats::ConnectOptions::new().connection_timeout(self.connect_timeout);
        if let Some(ca_file) = &self.ca_file {
            options = options
                .add_root_certificates(ca_file.clone())
                .require_tls(true);
        }

        let client = options
            .connect(self.url.as_str())
            .await
            .map_err(|e| Error::connectivity("jetstream", e))?;

        let jetstream = async_nats::jetstream::new(client);
        jetstream
            .query_account()
            .await
            .map_err(|e| Error::connectivity("jetstream", e))?;

        debug!(url = %self.url, "JetStream account info received");

        // dropping the last client handle closes the connection
        drop(jetstream);
        Ok(())
    }
}

/// Subset of the `APIResourceList` discovery document
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResourceList {
    group_version: String,
    #[serde(default)]
    resources: Vec<ApiResource>,
}

#[derive(Debug, Deserialize)]
struct ApiResource {
    name: String,
}

/// Asks the control plane whether a resource group/version is being served
#[derive(Debug, Clone)]
pub struct DiscoveryProbe {
    client: reqwest::Client,
    endpoint: Url,
    group_version: &'static str,
    token_file: Option<PathBuf>,
}

impl DiscoveryProbe {
    /// Build the probe, trusting only `ca_file` when given
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the URL is invalid, or a TLS error if
    /// the CA file cannot be read or parsed
    pub async fn new(
        base_url: &str,
        group_version: &'static str,
        token_file: Option<PathBuf>,
        ca_file: Option<&Path>,
    ) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid discovery URL {base_url}: {e}")))?;
        let endpoint = base
            .join(&format!("/apis/{group_version}"))
            .map_err(|e| Error::Config(format!("invalid discovery URL {base_url}: {e}")))?;

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .https_only(endpoint.scheme() == "https")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10));

        if let Some(ca_file) = ca_file {
            let pem = fs::read(ca_file).await.map_err(|source| Error::ReadFile {
                path: ca_file.to_path_buf(),
                source,
            })?;
            let certificate = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| Error::tls(ca_file, e.to_string()))?;
            builder = builder
                .tls_built_in_root_certs(false)
                .add_root_certificate(certificate);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build discovery client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            group_version,
            token_file,
        })
    }

    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl Probe for DiscoveryProbe {
    fn name(&self) -> &'static str {
        "discovery"
    }

    async fn check(&self) -> Result<()> {
        let mut request = self.client.get(self.endpoint.clone());

        // service account tokens rotate, read on every attempt
        if let Some(token_file) = &self.token_file {
            let token = fs::read_to_string(token_file)
                .await
                .map_err(|source| Error::ReadFile {
                    path: token_file.clone(),
                    source,
                })?;
            request = request.bearer_auth(token.trim());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::connectivity("discovery", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::connectivity(
                "discovery",
                format!(
                    "group version not available: {}: status {status}",
                    self.group_version
                ),
            ));
        }

        let list: ApiResourceList = response
            .json()
            .await
            .map_err(|e| Error::connectivity("discovery", e))?;

        if list.group_version != self.group_version {
            return Err(Error::connectivity(
                "discovery",
                format!(
                    "discovery answered for {} instead of {}",
                    list.group_version, self.group_version
                ),
            ));
        }

        debug!(
            group_version = self.group_version,
            resources = ?list.resources.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            "Storage types are available"
        );
        Ok(())
    }
}
