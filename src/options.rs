use crate::readiness::RetryPolicy;
use std::{fmt, net::IpAddr, path::PathBuf, str::FromStr, time::Duration};

/// What the process does once its dependencies answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceMode {
    /// Apply the schema and exit
    Initialize,
    /// Apply the schema and serve traffic until shutdown
    #[default]
    Serve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        })
    }
}

/// `JetStream` readiness check, skipped when no URL is configured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsOptions {
    pub url: String,
    pub ca_file: Option<PathBuf>,
}

/// Control-plane discovery readiness check, skipped when no URL is configured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    pub url: String,
    pub token_file: PathBuf,
    pub ca_file: PathBuf,
}

/// Validated process configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub mode: ServiceMode,
    pub log_level: LogLevel,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub pg_uri_file: PathBuf,
    pub pg_tls_ca_file: PathBuf,
    pub pg_max_connections: u32,
    pub listen: Option<IpAddr>,
    pub port: u16,
    pub cert_refresh_interval: Duration,
    pub readiness: RetryPolicy,
    pub nats: Option<NatsOptions>,
    pub discovery: Option<DiscoveryOptions>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mode: ServiceMode::default(),
            log_level: LogLevel::default(),
            cert_file: PathBuf::from("/tls/tls.crt"),
            key_file: PathBuf::from("/tls/tls.key"),
            pg_uri_file: PathBuf::from("/pg/uri"),
            pg_tls_ca_file: PathBuf::from("/pg/tls/server/ca.crt"),
            pg_max_connections: 10,
            listen: None,
            port: 8443,
            cert_refresh_interval: Duration::from_secs(60),
            readiness: RetryPolicy::default(),
            nats: None,
            discovery: None,
        }
    }
}
