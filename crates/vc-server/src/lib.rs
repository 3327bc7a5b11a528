//! HTTP server for a published HLS stream and its neighbouring files.
//!
//! Serves the manifest, segments and any other file under one root directory
//! with range requests, conditional requests and per-request error isolation.
//! The server never writes to the root.

pub mod assets;
pub mod context;
pub mod error;
pub mod router;
pub mod streaming;

pub use assets::{AssetResolver, ServedAsset};
pub use context::ServerContext;
pub use router::build_router;

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use vc_core::config::ServerConfig;
use vc_core::{Error, Result};

/// Bind to `config.host:config.port` and serve `config.root` until Ctrl+C,
/// SIGTERM or `cancel` fires.
pub async fn start(config: &ServerConfig, cancel: CancellationToken) -> Result<()> {
    let ctx = ServerContext::from_config(config)?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| Error::invalid(format!("invalid server address: {e}")))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("failed to bind to {addr}: {e}")))?;

    serve(listener, ctx, cancel).await
}

/// Serve on an already bound listener.
pub async fn serve(
    listener: tokio::net::TcpListener,
    ctx: ServerContext,
    cancel: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(
        root = %ctx.assets.root().display(),
        manifest = %format!("http://{addr}/{}", ctx.manifest_name),
        "starting server on {addr}"
    );

    axum::serve(listener, build_router(ctx))
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C, SIGTERM, or cancellation of the token.
pub async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
        _ = cancel.cancelled() => tracing::info!("shutdown requested"),
    }
}
