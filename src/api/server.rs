//! API server setup

use crate::api::handlers::create_router;
use crate::crawler::Coordinator;
use crate::storage::RecordStore;
use crate::DriftnetError;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,

    /// Store used for read queries
    pub store: Arc<dyn RecordStore>,

    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Creates state that queries the coordinator's own store
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            store: coordinator.store().clone(),
            coordinator,
            start_time: Instant::now(),
        }
    }
}

/// Builds the router with request tracing
pub fn build_router(state: AppState) -> Router {
    create_router(state).layer(TraceLayer::new_for_http())
}

/// Serves the API on `addr` until `shutdown` resolves
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DriftnetError> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("API listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("API server shut down");
    Ok(())
}
