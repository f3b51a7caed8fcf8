use crate::{
    dispatch::Dispatcher,
    gateway::PersistenceGateway,
    handlers,
    sessions::SessionTracker,
    srs::ControlPlane,
    thumbnails::ThumbnailManager,
};
use axum::{
    routing::{
        get,
        post,
    },
    Router,
};
use srs_relay_config::Config;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub control_plane: Arc<dyn ControlPlane>,
    pub gateway: Arc<dyn PersistenceGateway>,
    pub sessions: Arc<SessionTracker>,
    pub thumbnails: Arc<ThumbnailManager>,
    pub dispatcher: Dispatcher,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/publish", post(handlers::lifecycle::publish))
        .route("/api/v1/unpublish", post(handlers::lifecycle::unpublish))
        .route("/api/v1/sessions", post(handlers::lifecycle::sessions))
        .route("/api/v1/forward", post(handlers::forward::forward))
        .route("/api/v1/stats", get(handlers::status::stats))
        .route("/api/v1/clients", get(handlers::status::clients))
        .route("/api/v1/performance", get(handlers::status::performance))
        .route("/api/v1/summary", get(handlers::status::summary))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}
