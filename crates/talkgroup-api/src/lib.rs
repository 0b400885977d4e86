pub mod event_log;
pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use event_log::{EventLog, LoggedEvent};
pub use handlers::ApiState;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::engine::handle_status))
        .route("/engine/start", post(handlers::engine::handle_start))
        .route("/engine/stop", post(handlers::engine::handle_stop))
        .route("/license", post(handlers::engine::handle_license))
        .route("/events", get(handlers::events::handle_events))
        .route("/groups", post(handlers::groups::handle_create))
        .route(
            "/groups/{id}",
            get(handlers::groups::handle_inspect).delete(handlers::groups::handle_delete),
        )
        .route("/groups/{id}/join", post(handlers::groups::handle_join))
        .route("/groups/{id}/leave", post(handlers::groups::handle_leave))
        .route("/groups/{id}/tx/begin", post(handlers::groups::handle_tx_begin))
        .route("/groups/{id}/tx/end", post(handlers::groups::handle_tx_end))
        .route("/groups/{id}/rx/mute", post(handlers::groups::handle_rx_mute))
        .route("/groups/{id}/rx/unmute", post(handlers::groups::handle_rx_unmute))
        .route("/groups/{id}/rx/volume", post(handlers::groups::handle_rx_volume))
        .route("/groups/{id}/rx/tag", post(handlers::groups::handle_rx_tag))
        .route("/groups/{id}/blob", post(handlers::groups::handle_blob))
        .route("/groups/{id}/raw", post(handlers::groups::handle_raw))
        .route("/groups/{id}/biometrics", post(handlers::groups::handle_biometrics))
        .route("/groups/{id}/timeline", post(handlers::groups::handle_timeline))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn serve(state: ApiState, port: u16) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "API listening on 127.0.0.1");
    axum::serve(listener, app).await?;
    Ok(())
}
