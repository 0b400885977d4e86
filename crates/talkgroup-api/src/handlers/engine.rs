//! /status, /engine/start, /engine/stop and /license handlers.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use talkgroup_core::LicensingStatus;
use talkgroup_engine::GroupStatus;

use super::{ApiState, CommandResponse};

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub initialized: bool,
    pub started: bool,
    pub node_id: Option<String>,
    pub license: Option<LicenseInfo>,
    pub groups: Vec<GroupStatus>,
}

#[derive(Serialize)]
pub struct LicenseInfo {
    pub entitlement: String,
    pub expires: u64,
    pub activated: bool,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let engine = &state.engine;
    let license = engine.license().map(|l| LicenseInfo {
        entitlement: l.entitlement,
        expires: l.expires,
        activated: l.activated,
    });

    Json(StatusResponse {
        initialized: engine.is_initialized(),
        started: engine.is_started(),
        node_id: engine.node_id(),
        license,
        groups: engine.groups().await,
    })
}

// ── /engine/start, /engine/stop ──────────────────────────────────────────────

pub async fn handle_start(State(state): State<ApiState>) -> Json<CommandResponse> {
    tracing::info!("engine start requested via API");
    Json(state.engine.start().into())
}

pub async fn handle_stop(State(state): State<ApiState>) -> Json<CommandResponse> {
    tracing::info!("engine stop requested via API");
    Json(state.engine.stop().into())
}

// ── /license ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LicenseRequest {
    pub entitlement: String,
    pub key: String,
    #[serde(default)]
    pub activation_code: String,
}

#[derive(Serialize)]
pub struct LicenseResponse {
    pub result: LicensingStatus,
    pub name: &'static str,
}

pub async fn handle_license(
    State(state): State<ApiState>,
    Json(req): Json<LicenseRequest>,
) -> Json<LicenseResponse> {
    let result = state
        .engine
        .update_license(&req.entitlement, &req.key, &req.activation_code);
    if result != LicensingStatus::Ok {
        tracing::warn!(status = result.name(), "license update rejected");
    }
    Json(LicenseResponse {
        result,
        name: result.name(),
    })
}
