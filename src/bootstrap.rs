//! Startup orchestration
//!
//! Both modes share the same front half: build the database connector, wait
//! for every configured dependency, then apply the schema. Serve mode loads
//! the serving certificate first so a bad keypair fails before any waiting.

use crate::{
    db::{DEFINITIONS, PgConnector, PgPool, apply_all},
    error::Result,
    health::{DatabaseCheck, HealthReporter},
    options::Options,
    readiness::{
        DiscoveryProbe, JetStreamProbe, PostgresProbe, STORAGE_GROUP_VERSION, wait_until_ready,
    },
    server,
    tls::{ServingCertResolver, ServingCredentials, ensure_crypto_provider},
};
use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

async fn connect(options: &Options) -> Result<PgPool> {
    let connector = PgConnector::from_files(&options.pg_uri_file, &options.pg_tls_ca_file)
        .await?
        .with_max_connections(options.pg_max_connections);
    connector.pool()
}

/// Gate on PostgreSQL, then on `JetStream` and discovery when configured
///
/// # Errors
///
/// Returns the first gate that times out or is cancelled
pub async fn wait_for_dependencies(
    options: &Options,
    pool: &PgPool,
    cancel: &CancellationToken,
) -> Result<()> {
    wait_until_ready(&PostgresProbe::new(pool.clone()), &options.readiness, cancel).await?;

    if let Some(nats) = &options.nats {
        let probe = JetStreamProbe::new(nats.url.clone(), nats.ca_file.clone());
        wait_until_ready(&probe, &options.readiness, cancel).await?;
    }

    if let Some(discovery) = &options.discovery {
        let probe = DiscoveryProbe::new(
            &discovery.url,
            STORAGE_GROUP_VERSION,
            Some(discovery.token_file.clone()),
            Some(discovery.ca_file.as_path()),
        )
        .await?;
        wait_until_ready(&probe, &options.readiness, cancel).await?;
    }

    Ok(())
}

/// Wait for the database, apply the schema and return
///
/// # Errors
///
/// Returns configuration, readiness or schema errors
pub async fn initialize(options: &Options, cancel: &CancellationToken) -> Result<()> {
    ensure_crypto_provider();

    let pool = connect(options).await?;
    let result = async {
        wait_for_dependencies(options, &pool, cancel).await?;
        apply_all(&pool, DEFINITIONS).await
    }
    .await;

    pool.close();

    if result.is_ok() {
        info!("Initialization complete");
    }
    result
}

/// Wait for dependencies, apply the schema, then serve until `cancel` fires
///
/// `api` receives the pool and returns the resource routes; the health and
/// metrics routes are merged in.
///
/// # Errors
///
/// Returns configuration, TLS, readiness or schema errors raised before the
/// listener starts
pub async fn serve<F>(options: &Options, cancel: CancellationToken, api: F) -> Result<()>
where
    F: FnOnce(PgPool) -> Router,
{
    ensure_crypto_provider();

    let credentials =
        Arc::new(ServingCredentials::load(&options.cert_file, &options.key_file).await?);
    let pool = connect(options).await?;

    if let Err(err) = async {
        wait_for_dependencies(options, &pool, &cancel).await?;
        apply_all(&pool, DEFINITIONS).await
    }
    .await
    {
        pool.close();
        return Err(err);
    }

    let tls = Arc::new(ServingCertResolver::new(credentials.clone()).server_config()?);
    let (listener, _) = server::bind(options.listen, options.port).await?;

    let reporter = HealthReporter::new().with_check(DatabaseCheck::new(pool.clone()));
    let app = api(pool.clone()).merge(reporter.router());

    let refresh = tokio::spawn(
        credentials
            .clone()
            .run(options.cert_refresh_interval, cancel.clone()),
    );

    server::serve(listener, tls, app, cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = refresh.await {
        error!(error = %e, "Certificate refresh task failed");
    }
    pool.close();

    info!("Server stopped");
    Ok(())
}
