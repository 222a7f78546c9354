use super::{commands, dispatch};
use crate::telemetry;
use anyhow::Result;
use tracing::{Instrument, info_span};

/// Main orchestrator - Pure orchestration with no business logic
///
/// Four-step data flow:
/// 1. Parse: Extract CLI arguments
/// 2. Dispatch: Convert `ArgMatches` into typed Action enum
/// 3. Initialize Telemetry: JSON logs at the requested level
/// 4. Execute: Run the action inside the `storage` span
///
/// # Errors
///
/// Returns an error if any step in the flow fails
pub async fn start() -> Result<()> {
    // 1. Parse: Extract CLI arguments
    let matches = commands::new().get_matches();

    // 2. Dispatch: Convert ArgMatches into typed Action enum
    let action = dispatch::dispatch(&matches)?;

    // 3. Initialize Telemetry
    telemetry::init(action.options().log_level)?;

    // 4. Execute: Run the action's business logic
    let span = info_span!("storage", version = env!("CARGO_PKG_VERSION"));
    action.execute().instrument(span).await
}
