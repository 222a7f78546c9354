use super::Action;
use crate::{bootstrap, shutdown};
use anyhow::Context;
use axum::Router;
use tokio_util::sync::CancellationToken;

/// Execute the action's business logic by delegating to the bootstrap module
pub async fn execute(action: Action) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let signals = shutdown::install(cancel.clone());

    let result = match action {
        Action::Initialize { options } => bootstrap::initialize(&options, &cancel)
            .await
            .context("Initialization failed"),
        Action::Serve { options } => bootstrap::serve(&options, cancel.clone(), |_pool| {
            Router::new()
        })
        .await
        .context("Server failed"),
    };

    signals.abort();
    result
}
