//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api;
use crate::state::AppState;
use crate::ws;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/devices", get(api::list_devices).post(api::join_device))
        .route("/api/devices/{id}", get(api::get_device))
        .route("/api/devices/{id}", delete(api::leave_device))
        .route("/api/devices/{id}/events", post(api::post_event))
        .route("/api/select", post(api::select))
        .route("/api/suggest", post(api::suggest))
        .route("/api/actions", post(api::run_action))
        .route("/api/subscriptions", post(api::subscribe))
        .route("/api/config", get(api::get_config))
        // Commands and aggregated events
        .route("/ws", get(ws::websocket_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the web server
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, protocol = "HTTP", "Starting web server");
    axum::serve(listener, app).await?;
    Ok(())
}
