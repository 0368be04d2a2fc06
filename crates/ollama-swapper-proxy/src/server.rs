//! The HTTP surface (spec §4.5): a single catch-all route accepting
//! `GET, POST, PUT, PATCH, DELETE` on any path and handing the request
//! straight to the [`Pipeline`].

use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::response::Response;
use axum::routing::{delete, get, patch, post, put};
use tokio::net::TcpListener;
use tracing::info;

use ollama_swapper_core::AppConfig;

use crate::pipeline::Pipeline;

/// Bind and serve the proxy on an already-bound listener.
///
/// # Errors
///
/// Returns an error if the server fails to start or exits abnormally.
pub async fn serve(listener: TcpListener, config: AppConfig) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let pipeline = Arc::new(Pipeline::new(Arc::new(config)));

    let app = build_router(pipeline);

    info!(%addr, "ollama-swapper proxy listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// The single catch-all route (spec §4.5): `GET, POST, PUT, PATCH, DELETE`
/// on any path, and nothing else — any other method falls through to
/// axum's default 405 instead of reaching the pipeline.
fn build_router(pipeline: Arc<Pipeline>) -> Router {
    let methods = || get(handle).post(handle).put(handle).patch(handle).delete(handle);
    Router::new()
        .route("/", methods())
        .route("/*path", methods())
        .with_state(pipeline)
}

async fn handle(State(pipeline): State<Arc<Pipeline>>, request: Request) -> Response {
    pipeline.handle(request).await
}
