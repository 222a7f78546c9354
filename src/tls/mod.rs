//! TLS credential lifecycle
//!
//! Two independent credential stores share the same snapshot discipline: an
//! immutable, fully parsed value behind an `ArcSwap`, replaced wholesale and
//! never mutated in place.
//!
//! # Module Organization
//!
//! - `serving` - certificate/key pair of the HTTPS listener, refreshed on an interval
//! - `database` - CA bundle trusted by the database client, reloaded per connection
//! - `metadata` - subject/issuer/expiry extraction
//! - `pem` - PEM file reading and parsing

pub mod database;
pub mod metadata;
pub mod pem;
pub mod serving;

pub use database::{DatabaseTrust, TrustAnchors};
pub use metadata::CertificateMetadata;
pub use serving::{Refresh, ServingCertResolver, ServingCertificate, ServingCredentials};

use rustls::crypto::{CryptoProvider, ring};
use std::sync::{Arc, LazyLock, OnceLock};

static CRYPTO_PROVIDER_INIT: OnceLock<()> = OnceLock::new();
static PROVIDER: LazyLock<Arc<CryptoProvider>> =
    LazyLock::new(|| Arc::new(ring::default_provider()));

/// Ensure the rustls crypto provider is initialized
///
/// Clients that build their rustls config from the process default (async-nats)
/// need one installed. It's safe to call multiple times as initialization
/// only happens once.
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.get_or_init(|| {
        if ring::default_provider().install_default().is_err() {
            tracing::debug!("a rustls crypto provider was already installed");
        }
    });
}

/// The provider used for every config this crate builds itself
#[must_use]
pub fn crypto_provider() -> Arc<CryptoProvider> {
    PROVIDER.clone()
}
