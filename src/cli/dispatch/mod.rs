use crate::{
    cli::actions::Action,
    options::{DiscoveryOptions, LogLevel, NatsOptions, Options, ServiceMode},
    readiness::RetryPolicy,
};
use anyhow::{Context, Result, anyhow};
use clap::ArgMatches;
use std::{net::IpAddr, path::PathBuf, time::Duration};

fn path(matches: &ArgMatches, id: &str) -> Result<PathBuf> {
    matches
        .get_one::<String>(id)
        .map(PathBuf::from)
        .with_context(|| format!("--{id} is required"))
}

fn seconds(matches: &ArgMatches, id: &str) -> Result<Duration> {
    matches
        .get_one::<u64>(id)
        .copied()
        .map(Duration::from_secs)
        .with_context(|| format!("--{id} is required"))
}

/// Convert `ArgMatches` into typed Action enum with validation
///
/// # Errors
///
/// Returns an error if a value is invalid or the readiness settings are inconsistent
pub fn dispatch(matches: &ArgMatches) -> Result<Action> {
    let mode = if matches.get_one::<bool>("init").copied().unwrap_or(false) {
        ServiceMode::Initialize
    } else {
        ServiceMode::Serve
    };

    let log_level = matches
        .get_one::<String>("log-level")
        .map_or(Ok(LogLevel::default()), |level| level.parse::<LogLevel>())
        .map_err(|e| anyhow!(e))?;

    // Extract and validate listen address
    let listen = matches
        .get_one::<String>("listen")
        .map(|addr| {
            addr.parse::<IpAddr>()
                .with_context(|| format!("Invalid IP address: {addr}"))
        })
        .transpose()?;

    let readiness = RetryPolicy::new(
        matches
            .get_one::<u32>("readiness-attempts")
            .copied()
            .unwrap_or(20),
        seconds(matches, "readiness-initial-delay")?,
        seconds(matches, "readiness-max-delay")?,
    )
    .context("Invalid readiness settings")?;

    let nats = matches
        .get_one::<String>("nats-url")
        .map(|url| NatsOptions {
            url: url.clone(),
            ca_file: matches.get_one::<String>("nats-ca-file").map(PathBuf::from),
        });

    let discovery = match matches.get_one::<String>("discovery-url") {
        Some(url) => Some(DiscoveryOptions {
            url: url.clone(),
            token_file: path(matches, "discovery-token-file")?,
            ca_file: path(matches, "discovery-ca-file")?,
        }),
        None => None,
    };

    let options = Options {
        mode,
        log_level,
        cert_file: path(matches, "cert-file")?,
        key_file: path(matches, "key-file")?,
        pg_uri_file: path(matches, "pg-uri-file")?,
        pg_tls_ca_file: path(matches, "pg-tls-ca-file")?,
        pg_max_connections: matches
            .get_one::<u32>("pg-max-connections")
            .copied()
            .unwrap_or(10),
        listen,
        port: matches.get_one::<u16>("port").copied().unwrap_or(8443),
        cert_refresh_interval: seconds(matches, "cert-refresh-interval")?,
        readiness,
        nats,
        discovery,
    };

    Ok(match mode {
        ServiceMode::Initialize => Action::Initialize { options },
        ServiceMode::Serve => Action::Serve { options },
    })
}
