use prometheus::{
    Encoder, IntCounterVec, IntGauge, IntGaugeVec, Registry, opts,
    register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry,
    register_int_gauge_with_registry,
};
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

trait ResultExt<T> {
    fn or_exit(self, context: &str) -> T;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn or_exit(self, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(error = %err, "failed to initialize metric ({context})");
                std::process::exit(1);
            }
        }
    }
}

// Readiness gate
pub static READINESS_ATTEMPTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        opts!(
            "sbom_storage_readiness_attempts_total",
            "Readiness probe invocations by dependency and outcome"
        ),
        &["dependency", "outcome"],
        &REGISTRY
    )
    .or_exit("metric can be created")
});

// Serving certificate
pub static SERVING_CERT_RELOADS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        opts!(
            "sbom_storage_serving_cert_reloads_total",
            "Serving certificate refresh cycles by outcome (rotated, unchanged, error)"
        ),
        &["outcome"],
        &REGISTRY
    )
    .or_exit("metric can be created")
});

pub static SERVING_CERT_AGE_SECONDS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge_with_registry!(
        opts!(
            "sbom_storage_serving_cert_age_seconds",
            "Seconds since the serving certificate in use was loaded from disk"
        ),
        &REGISTRY
    )
    .or_exit("metric can be created")
});

pub static SERVING_CERT_EXPIRY_DAYS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge_with_registry!(
        opts!(
            "sbom_storage_serving_cert_expiry_days",
            "Days until the serving certificate in use expires (negative if expired)"
        ),
        &REGISTRY
    )
    .or_exit("metric can be created")
});

// Database trust material
pub static DATABASE_CA_RELOADS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        opts!(
            "sbom_storage_database_ca_reloads_total",
            "Database CA reloads at connection time by outcome (rotated, unchanged, error)"
        ),
        &["outcome"],
        &REGISTRY
    )
    .or_exit("metric can be created")
});

pub static DATABASE_CA_ANCHORS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge_with_registry!(
        opts!(
            "sbom_storage_database_ca_anchors",
            "Trust anchors in the database CA bundle last loaded"
        ),
        &REGISTRY
    )
    .or_exit("metric can be created")
});

// Health
pub static HEALTH_CHECK_UP: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec_with_registry!(
        opts!(
            "sbom_storage_health_check_up",
            "Result of the last health check: 1 ok, 0 error"
        ),
        &["check"],
        &REGISTRY
    )
    .or_exit("metric can be created")
});

pub static MIGRATIONS_APPLIED: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge_with_registry!(
        opts!(
            "sbom_storage_migrations_applied",
            "Schema statements applied by the last migration run"
        ),
        &REGISTRY
    )
    .or_exit("metric can be created")
});

/// Encode all registered metrics in the Prometheus text format
///
/// # Errors
///
/// Returns an error if encoding fails
pub fn encode_metrics() -> Result<Vec<u8>, String> {
    let mut buffer = Vec::new();
    let encoder = prometheus::TextEncoder::new();

    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| format!("could not encode custom metrics: {e}"))?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn test_encode_metrics_includes_touched_families() {
        READINESS_ATTEMPTS
            .with_label_values(&["postgres", "failure"])
            .inc();
        SERVING_CERT_RELOADS.with_label_values(&["unchanged"]).inc();
        HEALTH_CHECK_UP.with_label_values(&["database"]).set(1);
        SERVING_CERT_AGE_SECONDS.set(5);

        let body = String::from_utf8(encode_metrics().unwrap()).unwrap();
        assert!(body.contains("sbom_storage_readiness_attempts_total"));
        assert!(body.contains("sbom_storage_serving_cert_reloads_total"));
        assert!(body.contains("sbom_storage_health_check_up"));
        assert!(body.contains("sbom_storage_serving_cert_age_seconds"));
    }
}
