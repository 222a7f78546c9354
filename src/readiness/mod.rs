//! Readiness gate
//!
//! Blocks startup until an external dependency answers, retrying with a
//! bounded exponential backoff. Every dependency (database, stream engine,
//! control plane) goes through the same [`wait_until_ready`] helper so they
//! all share one backoff schedule and one cancellation story.
//!
//! # Module Organization
//!
//! - `probes` - the [`Probe`] trait and the concrete dependency checks

pub mod probes;

pub use probes::{
    DiscoveryProbe, JetStreamProbe, PostgresProbe, Probe, STORAGE_GROUP_VERSION, probe_fn,
};

use crate::{
    error::{Error, Result},
    metrics::READINESS_ATTEMPTS,
};
use backon::{BackoffBuilder, ExponentialBuilder};
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bounded exponential backoff, immutable once built
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    factor: f32,
    max_delay: Duration,
    attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    /// 20 attempts, 2s initial delay doubling up to 10s
    fn default() -> Self {
        Self {
            max_attempts: 20,
            initial_delay: Duration::from_secs(2),
            factor: 2.0,
            max_delay: Duration::from_secs(10),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the default factor (2) and attempt timeout (10s)
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `max_attempts` is zero or the initial
    /// delay is larger than the maximum delay
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::Config(
                "readiness attempts must be at least 1".to_string(),
            ));
        }
        if initial_delay > max_delay {
            return Err(Error::Config(format!(
                "readiness initial delay ({}s) exceeds max delay ({}s)",
                initial_delay.as_secs_f64(),
                max_delay.as_secs_f64()
            )));
        }

        Ok(Self {
            max_attempts,
            initial_delay,
            max_delay,
            ..Self::default()
        })
    }

    /// Multiplier applied to the delay after every failed attempt (clamped to >= 1)
    #[must_use]
    pub const fn with_factor(mut self, factor: f32) -> Self {
        self.factor = if factor < 1.0 { 1.0 } else { factor };
        self
    }

    /// Upper bound for a single probe invocation
    #[must_use]
    pub const fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// The sleeps between attempts, `max_attempts - 1` of them, non-decreasing
    pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        let retries = usize::try_from(self.max_attempts.saturating_sub(1)).unwrap_or(usize::MAX);
        ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.factor)
            .with_max_times(retries)
            .build()
    }

    /// Time spent sleeping when every attempt fails
    #[must_use]
    pub fn total_delay(&self) -> Duration {
        self.delays().sum()
    }
}

/// Run `probe` until it succeeds, the policy's attempt cap is reached, or
/// `cancel` fires.
///
/// On exhaustion the last failure is returned wrapped in [`Error::Timeout`];
/// earlier failures are only logged. Non-retryable errors (configuration,
/// TLS material) abort immediately.
///
/// # Errors
///
/// Returns [`Error::Timeout`], [`Error::Cancelled`], or the probe's own
/// non-retryable error
pub async fn wait_until_ready<P>(
    probe: &P,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<()>
where
    P: Probe + ?Sized,
{
    let dependency = probe.name();
    let max_attempts = policy.max_attempts();
    let mut delays = policy.delays();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        debug!(dependency, attempt, "Checking for {dependency} availability");

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(Error::Cancelled { dependency, attempts: attempt - 1 });
            }
            outcome = time::timeout(policy.attempt_timeout(), probe.check()) => {
                outcome.unwrap_or(Err(Error::ProbeTimeout {
                    dependency,
                    timeout: policy.attempt_timeout(),
                }))
            }
        };

        let err = match outcome {
            Ok(()) => {
                READINESS_ATTEMPTS
                    .with_label_values(&[dependency, "success"])
                    .inc();
                info!(dependency, attempt, "{dependency} is available, continuing");
                return Ok(());
            }
            Err(err) => err,
        };

        READINESS_ATTEMPTS
            .with_label_values(&[dependency, "failure"])
            .inc();

        if !err.is_retryable() {
            return Err(err);
        }

        let next_delay = if attempt < max_attempts {
            delays.next()
        } else {
            None
        };

        let Some(delay) = next_delay else {
            warn!(
                dependency,
                attempt,
                max_attempts,
                error = %err,
                "Checking for {dependency} failed, giving up"
            );
            return Err(Error::Timeout {
                dependency,
                attempts: attempt,
                source: Box::new(err),
            });
        };

        warn!(
            dependency,
            attempt,
            max_attempts,
            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Checking for {dependency} failed, retrying"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(Error::Cancelled { dependency, attempts: attempt });
            }
            () = time::sleep(delay) => {}
        }
    }
}
