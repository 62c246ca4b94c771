use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::AppContext;
use super::handler::handle_connection;

pub async fn start_listener(app: AppContext) -> Result<()> {
    let bind_addr = app.settings.listen;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", bind_addr))?;
    let local_addr = listener.local_addr().unwrap_or(bind_addr);
    info!(address = %local_addr, "proxy listener started");

    serve(listener, app, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}

/// Accepts connections on `listener` until `shutdown` resolves, serving each
/// one on its own task. Connections already in flight are left to finish.
pub async fn serve<F>(listener: TcpListener, app: AppContext, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let limiter = app
        .settings
        .max_connections
        .map(|limit| Arc::new(Semaphore::new(limit)));
    tokio::pin!(shutdown);

    loop {
        let permit = match &limiter {
            Some(limiter) => tokio::select! {
                _ = &mut shutdown => break,
                permit = limiter.clone().acquire_owned() => {
                    Some(permit.context("connection limiter closed")?)
                }
            },
            None => None,
        };

        let (stream, peer_addr) = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    error!(error = %err, "failed to accept incoming connection");
                    continue;
                }
            },
        };
        debug!(peer = %peer_addr, "accepted connection");
        if let Err(err) = stream.set_nodelay(true) {
            debug!(peer = %peer_addr, error = %err, "failed to set TCP_NODELAY on downstream stream");
        }

        let connection_app = app.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(err) = handle_connection(stream, peer_addr, &connection_app).await {
                warn!(peer = %peer_addr, error = %format_args!("{err:#}"), "connection closed with error");
            }
        });
    }

    info!("shutdown requested, no longer accepting connections");
    Ok(())
}
