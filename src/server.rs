use crate::error::Result;
use axum::Router;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
    service::TowerToHyperService,
};
use rustls::ServerConfig;
use std::{
    net::{IpAddr, SocketAddr},
    pin::pin,
    sync::Arc,
    time::Duration,
};
use tokio::{net::TcpListener, time};
use tokio_rustls::TlsAcceptor;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bind the listener, trying `[::]` before `0.0.0.0` when no address is given
///
/// # Errors
///
/// Returns an error if the socket cannot be bound
pub async fn bind(listen: Option<IpAddr>, port: u16) -> Result<(TcpListener, SocketAddr)> {
    let listener = match listen {
        Some(addr) => TcpListener::bind(SocketAddr::new(addr, port)).await?,
        None => {
            if let Ok(listener) = TcpListener::bind(format!("[::]:{port}")).await {
                listener
            } else {
                TcpListener::bind(format!("0.0.0.0:{port}")).await?
            }
        }
    };

    let local_addr = listener.local_addr()?;
    info!(address = %local_addr, "Listening");
    Ok((listener, local_addr))
}

/// Sleep for `delay`; false if `cancel` fired first
async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = time::sleep(delay) => true,
    }
}

/// Serve `app` over TLS until `cancel` fires
///
/// Every handshake asks `tls` for the certificate, so rotated credentials
/// apply to new connections only. On cancellation the listener stops
/// accepting and open connections get a bounded graceful drain. Accept
/// errors are logged and skipped.
pub async fn serve(
    listener: TcpListener,
    tls: Arc<ServerConfig>,
    app: Router,
    cancel: CancellationToken,
) {
    let acceptor = TlsAcceptor::from(tls);
    let tracker = TaskTracker::new();

    loop {
        let (stream, peer) = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    if pause(&cancel, ACCEPT_BACKOFF).await {
                        continue;
                    }
                    break;
                }
            },
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        let cancel = cancel.clone();

        tracker.spawn(async move {
            let tls_stream = match time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await
            {
                Ok(Ok(tls_stream)) => tls_stream,
                Ok(Err(e)) => {
                    debug!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
                Err(_) => {
                    debug!(%peer, "TLS handshake timed out");
                    return;
                }
            };

            let builder = auto::Builder::new(TokioExecutor::new());
            let mut conn = pin!(builder.serve_connection_with_upgrades(
                TokioIo::new(tls_stream),
                TowerToHyperService::new(app),
            ));

            let result = tokio::select! {
                result = conn.as_mut() => result,
                () = cancel.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            };

            if let Err(e) = result {
                debug!(%peer, error = %e, "Connection closed with error");
            }
        });
    }

    tracker.close();
    info!(connections = tracker.len(), "Listener stopped, draining connections");

    if time::timeout(DRAIN_TIMEOUT, tracker.wait()).await.is_err() {
        warn!(
            connections = tracker.len(),
            "Connections still open after {}s, closing",
            DRAIN_TIMEOUT.as_secs()
        );
    }
}
