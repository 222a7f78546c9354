//! Health endpoints
//!
//! `/readyz` and `/healthz` run every registered check, `/livez` only proves
//! the process can answer. Checks never retry: a failure is reported on the
//! request that observed it.

use crate::{
    db::{PgPool, acquire},
    error::{Error, Result},
    metrics::{HEALTH_CHECK_UP, encode_metrics},
};
use async_trait::async_trait;
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use std::{fmt::Write as _, sync::Arc, time::Duration};
use tokio::time;
use tracing::{debug, error};

const MAX_PING: Duration = Duration::from_secs(5);
const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

/// A dependency the server needs to report healthy
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &'static str;

    /// Check once, finishing within `deadline`
    async fn check(&self, deadline: Duration) -> Result<()>;
}

/// One round-trip on a pooled connection
#[derive(Clone)]
pub struct DatabaseCheck {
    pool: PgPool,
}

impl DatabaseCheck {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthCheck for DatabaseCheck {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn check(&self, deadline: Duration) -> Result<()> {
        let timeout = deadline.min(MAX_PING);

        let ping = async {
            let client = acquire(&self.pool).await?;
            client
                .simple_query("SELECT 1")
                .await
                .map_err(|e| Error::connectivity("database", e))?;
            Ok(())
        };

        let outcome = time::timeout(timeout, ping)
            .await
            .unwrap_or(Err(Error::ProbeTimeout {
                dependency: "database",
                timeout,
            }));

        if let Err(err) = &outcome {
            debug!(error = %err, "Database health check failed");
        }

        outcome
    }
}

/// Outcome of one check for a single request
#[derive(Debug)]
pub struct CheckStatus {
    pub name: &'static str,
    pub error: Option<String>,
}

impl CheckStatus {
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs the registered checks for the health endpoints
#[derive(Clone)]
pub struct HealthReporter {
    checks: Vec<Arc<dyn HealthCheck>>,
    deadline: Duration,
}

impl Default for HealthReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthReporter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            checks: Vec::new(),
            deadline: DEFAULT_DEADLINE,
        }
    }

    #[must_use]
    pub fn with_check(mut self, check: impl HealthCheck + 'static) -> Self {
        self.checks.push(Arc::new(check));
        self
    }

    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run every check concurrently and record each result
    pub async fn run_checks(&self) -> Vec<CheckStatus> {
        let results = futures::future::join_all(
            self.checks
                .iter()
                .map(|check| async move { (check.name(), check.check(self.deadline).await) }),
        )
        .await;

        results
            .into_iter()
            .map(|(name, result)| {
                HEALTH_CHECK_UP
                    .with_label_values(&[name])
                    .set(i64::from(result.is_ok()));
                CheckStatus {
                    name,
                    error: result.err().map(|e| e.to_string()),
                }
            })
            .collect()
    }

    /// Axum routes for `/healthz`, `/readyz`, `/livez` and `/metrics`
    #[must_use]
    pub fn router(self) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .route("/readyz", get(readyz))
            .route("/livez", get(livez))
            .route("/metrics", get(metrics_handler))
            .with_state(Arc::new(self))
    }
}

fn report(endpoint: &str, statuses: &[CheckStatus]) -> (StatusCode, String) {
    let mut body = String::from("[+]ping ok\n");
    for status in statuses {
        match &status.error {
            None => {
                let _ = writeln!(body, "[+]{} ok", status.name);
            }
            Some(reason) => {
                let _ = writeln!(body, "[-]{} failed: {reason}", status.name);
            }
        }
    }

    if statuses.iter().all(CheckStatus::is_ok) {
        let _ = write!(body, "{endpoint} check passed");
        (StatusCode::OK, body)
    } else {
        let _ = write!(body, "{endpoint} check failed");
        (StatusCode::INTERNAL_SERVER_ERROR, body)
    }
}

async fn healthz(State(reporter): State<Arc<HealthReporter>>) -> impl IntoResponse {
    report("healthz", &reporter.run_checks().await)
}

async fn readyz(State(reporter): State<Arc<HealthReporter>>) -> impl IntoResponse {
    report("readyz", &reporter.run_checks().await)
}

async fn livez() -> impl IntoResponse {
    report("livez", &[])
}

async fn metrics_handler() -> impl IntoResponse {
    match encode_metrics() {
        Ok(buffer) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            buffer,
        ),
        Err(e) => {
            error!("{e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                Vec::new(),
            )
        }
    }
}
