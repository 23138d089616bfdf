//! Router assembly and the listening task.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

use super::commands::SwarmCommand;
use super::v0;
use crate::api_client::types::SwarmState;
use crate::device_api::DeviceApi;
use crate::tracing::prelude::*;

#[derive(OpenApi)]
#[openapi(info(title = "axe-swarm", description = "Bitaxe fleet discovery and telemetry"))]
struct ApiDoc;

/// State shared by all handlers.
#[derive(Clone)]
pub struct SharedState {
    pub swarm_cmd_tx: mpsc::Sender<SwarmCommand>,
    pub swarm_rx: watch::Receiver<SwarmState>,
    /// Used directly for device actions, which never touch the registry.
    pub device_api: Arc<dyn DeviceApi>,
}

impl SharedState {
    pub fn swarm_state(&self) -> SwarmState {
        self.swarm_rx.borrow().clone()
    }
}

pub fn router(state: SharedState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .nest("/api/v0", v0::routes())
        .split_for_parts();

    router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `listen` until `running` is cancelled.
pub async fn serve(listen: SocketAddr, state: SharedState, running: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    info!(%listen, "API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { running.cancelled().await })
        .await
        .context("API server failed")?;

    trace!("API server stopped.");
    Ok(())
}
