//! HTTP API handlers — the engine command surface as JSON.

pub mod engine;
pub mod events;
pub mod groups;

use std::sync::Arc;

use axum::http::StatusCode;
use bytes::Bytes;
use serde::Serialize;

use talkgroup_core::EngineResult;
use talkgroup_engine::Engine;

use crate::event_log::EventLog;

#[derive(Clone)]
pub struct ApiState {
    pub engine: Engine,
    pub events: Arc<EventLog>,
}

/// Body of every command route: the immediate result code and its name.
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub result: EngineResult,
    pub name: &'static str,
}

impl From<EngineResult> for CommandResponse {
    fn from(result: EngineResult) -> Self {
        Self {
            result,
            name: result.name(),
        }
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────────

fn decode_hex(data: &str) -> Result<Bytes, (StatusCode, String)> {
    hex::decode(data)
        .map(Bytes::from)
        .map_err(|_| (StatusCode::BAD_REQUEST, "data must be hex".to_string()))
}
