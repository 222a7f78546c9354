use crate::{
    error::{Error, Result},
    tls::{DatabaseTrust, pem::read_file},
};
use deadpool::{
    Runtime,
    managed::{self, Metrics, PoolError, RecycleError, RecycleResult},
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio_postgres::{
    Client,
    config::{Config, Host, SslMode},
};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_MAX_CONNECTIONS: usize = 10;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Pool of verified TLS connections
pub type PgPool = managed::Pool<PgManager>;

/// A connection checked out of [`PgPool`], returned on drop
pub type PgClient = managed::Object<PgManager>;
/// Remove TLS parameters from a PostgreSQL URI
///
/// TLS is always configured by the service, so `sslmode=verify-full` is
/// accepted and dropped, any other `sslmode` is rejected, and the remaining
/// `ssl*` parameters are dropped with a warning.
///
/// # Errors
///
/// Returns [`Error::Config`] if the URI is not a TCP PostgreSQL URI or asks
/// for a weaker `sslmode`
pub fn sanitize_uri(raw: &str) -> Result<Url> {
    // never echo the URI, it carries the password
    let mut url = Url::parse(raw.trim())
        .map_err(|e| Error::Config(format!("invalid database URI: {e}")))?;

    if !matches!(url.scheme(), "postgres" | "postgresql") {
        return Err(Error::Config(format!(
            "unsupported database URI scheme: {}",
            url.scheme()
        )));
    }

    let host = url.host_str().unwrap_or_default();
    if host.is_empty() {
        return Err(Error::Config("database URI has no host".to_string()));
    }
    if is_socket_path(host) {
        return Err(Error::Config(
            "unix socket database hosts are not supported, TLS is required".to_string(),
        ));
    }

    let mut kept = Vec::new();
    for (key, value) in url.query_pairs() {
        let key_lower = key.to_ascii_lowercase();
        if key_lower == "sslmode" {
            if value != "verify-full" {
                return Err(Error::Config(format!(
                    "database URI requests sslmode={value}, only verify-full is allowed"
                )));
            }
            debug!("Dropping sslmode=verify-full from database URI");
        } else if key_lower.starts_with("ssl") {
            warn!(parameter = %key, "Ignoring TLS parameter in database URI");
        } else if key_lower == "host" && is_socket_path(&value) {
            return Err(Error::Config(
                "unix socket database hosts are not supported, TLS is required".to_string(),
            ));
        } else {
            kept.push((key.into_owned(), value.into_owned()));
        }
    }

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    Ok(url)
}

fn is_socket_path(host: &str) -> bool {
    host.starts_with('/') || host.to_ascii_lowercase().starts_with("%2f")
}

/// Connection config for a sanitized URI, TLS required
///
/// Hostname and chain verification come from the connector built by
/// [`DatabaseTrust::client_config`], which together with `sslmode=require`
/// amounts to `verify-full`.
///
/// # Errors
///
/// Returns [`Error::Config`] if the URI is rejected
pub fn connect_config(raw_uri: &str) -> Result<Config> {
    let url = sanitize_uri(raw_uri)?;

    let mut config: Config = url
        .as_str()
        .parse()
        .map_err(|e| Error::Config(format!("invalid database URI: {e}")))?;

    if config.get_hosts().iter().any(|host| !matches!(host, Host::Tcp(_))) {
        return Err(Error::Config(
            "unix socket database hosts are not supported, TLS is required".to_string(),
        ));
    }

    config.ssl_mode(SslMode::Require);
    if config.get_connect_timeout().is_none() {
        config.connect_timeout(CONNECT_TIMEOUT);
    }

    Ok(config)
}

/// Opens one TLS connection per pool slot, reloading the CA bundle first
#[derive(Debug)]
pub struct PgManager {
    config: Config,
    trust: Arc<DatabaseTrust>,
}

impl PgManager {
    /// Reload the CA bundle, then connect and hand the connection to a task
    ///
    /// # Errors
    ///
    /// Returns a connectivity error if the CA bundle can't be reloaded or
    /// the connection or handshake fails
    pub async fn connect(&self) -> Result<Client> {
        let tls = self.trust.client_config().await.map_err(|e| {
            warn!(
                ca_file = %self.trust.ca_path().display(),
                error = %e,
                "Failed to reload database CA bundle"
            );
            Error::connectivity("postgres", e)
        })?;

        let (client, connection) = self
            .config
            .connect(MakeRustlsConnect::new(tls))
            .await
            .map_err(|e| Error::connectivity("postgres", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "Database connection closed with error");
            }
        });

        Ok(client)
    }
}

impl managed::Manager for PgManager {
    type Type = Client;
    type Error = Error;

    async fn create(&self) -> Result<Client> {
        self.connect().await
    }

    async fn recycle(&self, client: &mut Client, _: &Metrics) -> RecycleResult<Error> {
        if client.is_closed() {
            return Err(RecycleError::Message("connection closed".into()));
        }
        Ok(())
    }
}

/// Check a connection out of `pool`
///
/// A checkout opens at most one new connection and does not retry, so the
/// error is the one the server or the handshake produced.
///
/// # Errors
///
/// Returns a connectivity error
pub async fn acquire(pool: &PgPool) -> Result<PgClient> {
    pool.get().await.map_err(|e| match e {
        PoolError::Backend(err) => err,
        other => Error::connectivity("postgres", other.to_string()),
    })
}

/// Builds the pooled database client
#[derive(Debug, Clone)]
pub struct PgConnector {
    config: Config,
    trust: Arc<DatabaseTrust>,
    max_connections: usize,
}

impl PgConnector {
    /// Read the connection URI and CA bundle from their files
    ///
    /// Both files must be readable and the CA bundle must parse; anything
    /// else is fatal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadFile`], [`Error::Config`] or [`Error::Tls`]
    pub async fn from_files(uri_file: &Path, ca_file: &Path) -> Result<Self> {
        let raw = read_file(uri_file).await?;
        let raw = String::from_utf8(raw).map_err(|_| {
            Error::Config(format!(
                "database URI in {} is not valid UTF-8",
                uri_file.display()
            ))
        })?;

        let config = connect_config(&raw)?;
        let trust = DatabaseTrust::load(ca_file).await?;

        Ok(Self {
            config,
            trust: Arc::new(trust),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        })
    }

    #[must_use]
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = usize::try_from(max_connections).unwrap_or(usize::MAX);
        self
    }

    #[must_use]
    pub fn host(&self) -> &str {
        self.config
            .get_hosts()
            .iter()
            .find_map(|host| match host {
                Host::Tcp(name) => Some(name.as_str()),
                #[cfg(unix)]
                Host::Unix(_) => None,
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn ca_file(&self) -> PathBuf {
        self.trust.ca_path().to_path_buf()
    }

    #[must_use]
    pub fn trust(&self) -> Arc<DatabaseTrust> {
        self.trust.clone()
    }

    /// Lazy pool: no connection is opened until the first checkout
    ///
    /// Every new physical connection reloads the CA bundle and verifies the
    /// server against it alone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the pool cannot be built
    pub fn pool(&self) -> Result<PgPool> {
        info!(
            host = self.host(),
            database = self.config.get_dbname().unwrap_or_default(),
            max_connections = self.max_connections,
            ca_file = %self.trust.ca_path().display(),
            "Configuring database pool (sslmode=verify-full)"
        );

        let manager = PgManager {
            config: self.config.clone(),
            trust: self.trust.clone(),
        };

        managed::Pool::builder(manager)
            .max_size(self.max_connections)
            .wait_timeout(Some(WAIT_TIMEOUT))
            .create_timeout(Some(CONNECT_TIMEOUT))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| Error::Config(format!("failed to build database pool: {e}")))
    }
}
