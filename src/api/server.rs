//! Listener setup for the monitoring API

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tower_http::cors::{Any, CorsLayer};

use super::routes::create_router;
use super::shared::{SharedState, SharedStateHandle};
use crate::pipeline::{PipelineCommand, Publisher};

/// Pair the API state with the receiving end of its command queue.
///
/// The receiver belongs to whichever pipeline is currently running; the
/// state handle lives as long as the server.
pub fn create_shared_state(
    publisher: Publisher,
) -> (SharedStateHandle, mpsc::UnboundedReceiver<PipelineCommand>) {
    let (commands, receiver) = mpsc::unbounded_channel();
    (Arc::new(SharedState::new(publisher, commands)), receiver)
}

fn app(shared_state: SharedStateHandle) -> Router {
    // Previews are opened from dashboards on other origins
    create_router(shared_state).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

/// Resolves once `shutdown` flips to true or its sender goes away.
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

async fn serve(
    listener: TcpListener,
    shared_state: SharedStateHandle,
    shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, app(shared_state))
        .with_graceful_shutdown(async move {
            shutdown_requested(shutdown).await;
            log::info!("API draining connections");
        })
        .await
}

/// Bind `addr` and answer API requests until shutdown.
pub async fn run_server(
    addr: SocketAddr,
    shared_state: SharedStateHandle,
    shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("API on http://{}", listener.local_addr()?);
    serve(listener, shared_state, shutdown).await
}
