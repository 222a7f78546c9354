use std::{io, path::PathBuf, time::Duration};
use thiserror::Error as ThisError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed cause coming from a dependency client (tokio-postgres, async-nats, reqwest)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Broad classification used to decide between aborting, retrying and degrading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Connectivity,
    Timeout,
    Cancelled,
    Tls,
    Schema,
    Io,
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid TLS material in {}: {reason}", path.display())]
    Tls { path: PathBuf, reason: String },

    #[error("{dependency} is not reachable: {source}")]
    Connectivity {
        dependency: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("{dependency} did not answer within {}ms", timeout.as_millis())]
    ProbeTimeout {
        dependency: &'static str,
        timeout: Duration,
    },

    #[error("timeout while waiting for {dependency} after {attempts} attempts: {source}")]
    Timeout {
        dependency: &'static str,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("cancelled while waiting for {dependency} after {attempts} attempts")]
    Cancelled {
        dependency: &'static str,
        attempts: u32,
    },

    #[error("migration `{name}` failed: {source}")]
    Schema {
        name: &'static str,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Wrap a dependency client error as a retryable connectivity failure
    pub fn connectivity<E>(dependency: &'static str, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Connectivity {
            dependency,
            source: source.into(),
        }
    }

    pub fn tls(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Tls {
            path: path.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::ReadFile { .. } => ErrorKind::Config,
            Self::Tls { .. } => ErrorKind::Tls,
            Self::Connectivity { .. } | Self::ProbeTimeout { .. } => ErrorKind::Connectivity,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Schema { .. } => ErrorKind::Schema,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Transient failures are the only ones the readiness gate retries
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connectivity)
    }
}
