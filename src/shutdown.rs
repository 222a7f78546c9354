use std::io;
use tokio::{signal, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Cancel `cancel` on the first SIGINT/SIGTERM and exit(1) on the second
pub fn install(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(signal) => warn!(signal, "Shutdown requested, press again to force exit"),
            Err(e) => {
                error!(error = %e, "Failed to install signal handlers");
                return;
            }
        }
        cancel.cancel();

        if let Ok(signal) = wait_for_signal().await {
            error!(signal, "Second shutdown signal, exiting immediately");
            std::process::exit(1);
        }
    })
}

async fn wait_for_signal() -> io::Result<&'static str> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result.map(|()| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.map(|()| "ctrl-c")
    }
}
