//! /groups handlers — group lifecycle, transmit, receive and delivery.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use talkgroup_core::biometrics::{BiometricType, Series, SeriesBuilder, ValueType};
use talkgroup_core::{BlobInfo, GroupConfig, TimelineQuery, TxParams};
use talkgroup_engine::GroupStatus;

use super::{decode_hex, ApiState, CommandResponse};

type CommandResult = Result<Json<CommandResponse>, (StatusCode, String)>;

// ── /groups (POST), /groups/{id} (GET, DELETE) ───────────────────────────────

pub async fn handle_create(
    State(state): State<ApiState>,
    Json(config): Json<GroupConfig>,
) -> Json<CommandResponse> {
    tracing::info!(group = %config.id, "group create requested via API");
    Json(state.engine.create_group(config).into())
}

pub async fn handle_inspect(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<GroupStatus>, (StatusCode, String)> {
    state
        .engine
        .group_status(&id)
        .await
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "group not found".to_string()))
}

pub async fn handle_delete(State(state): State<ApiState>, Path(id): Path<String>) -> Json<CommandResponse> {
    Json(state.engine.delete_group(&id).into())
}

// ── /groups/{id}/join, /leave ────────────────────────────────────────────────

pub async fn handle_join(State(state): State<ApiState>, Path(id): Path<String>) -> Json<CommandResponse> {
    Json(state.engine.join_group(&id).into())
}

pub async fn handle_leave(State(state): State<ApiState>, Path(id): Path<String>) -> Json<CommandResponse> {
    Json(state.engine.leave_group(&id).into())
}

// ── /groups/{id}/tx ──────────────────────────────────────────────────────────

pub async fn handle_tx_begin(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(params): Json<TxParams>,
) -> Json<CommandResponse> {
    Json(state.engine.begin_tx_advanced(&id, params).into())
}

pub async fn handle_tx_end(State(state): State<ApiState>, Path(id): Path<String>) -> Json<CommandResponse> {
    Json(state.engine.end_tx(&id).into())
}

// ── /groups/{id}/rx ──────────────────────────────────────────────────────────

pub async fn handle_rx_mute(State(state): State<ApiState>, Path(id): Path<String>) -> Json<CommandResponse> {
    Json(state.engine.mute_rx(&id).into())
}

pub async fn handle_rx_unmute(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Json<CommandResponse> {
    Json(state.engine.unmute_rx(&id).into())
}

#[derive(Deserialize)]
pub struct VolumeRequest {
    pub left: u8,
    pub right: u8,
}

pub async fn handle_rx_volume(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<VolumeRequest>,
) -> Json<CommandResponse> {
    Json(state.engine.set_rx_volume(&id, req.left, req.right).into())
}

#[derive(Deserialize)]
pub struct TagRequest {
    pub tag: u16,
}

pub async fn handle_rx_tag(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<TagRequest>,
) -> Json<CommandResponse> {
    Json(state.engine.set_rx_tag(&id, req.tag).into())
}

// ── /groups/{id}/blob, /raw ──────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct BlobRequest {
    #[serde(default)]
    pub info: BlobInfo,
    /// Hex-encoded blob bytes.
    pub data: String,
}

pub async fn handle_blob(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<BlobRequest>,
) -> CommandResult {
    let blob = decode_hex(&req.data)?;
    Ok(Json(state.engine.send_blob(&id, req.info, blob).into()))
}

#[derive(Deserialize)]
pub struct RawRequest {
    /// Hex-encoded payload.
    pub data: String,
}

pub async fn handle_raw(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<RawRequest>,
) -> CommandResult {
    let raw = decode_hex(&req.data)?;
    Ok(Json(state.engine.send_raw(&id, raw).into()))
}

// ── /groups/{id}/biometrics ──────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesRequest {
    pub kind: BiometricType,
    /// 1 = u8, 2 = u16, 3 = u32, 4 = u64.
    pub value_type: u8,
    pub timestamp: u32,
    #[serde(default)]
    pub interval_type: u8,
    #[serde(default)]
    pub interval_multiplier: u8,
    /// `(offset, value)` pairs.
    pub samples: Vec<(u8, u64)>,
}

impl SeriesRequest {
    fn build(&self) -> Result<Series, String> {
        let value_type = ValueType::try_from(self.value_type).map_err(|e| e.to_string())?;
        let mut builder = SeriesBuilder::new(self.kind, value_type)
            .with_interval(self.interval_type, self.interval_multiplier);
        builder.restart(self.timestamp);
        for &(offset, value) in &self.samples {
            if !builder.push(offset, value) {
                return Err(format!("sample {value} at offset {offset} does not fit the series"));
            }
        }
        Ok(builder.snapshot())
    }
}

#[derive(Deserialize)]
pub struct BiometricsRequest {
    /// Target node id (hex). Empty = every member.
    #[serde(default)]
    pub target: String,
    pub series: Vec<SeriesRequest>,
}

pub async fn handle_biometrics(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<BiometricsRequest>,
) -> CommandResult {
    let series = req
        .series
        .iter()
        .map(SeriesRequest::build)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    Ok(Json(state.engine.send_biometrics(&id, &req.target, &series).into()))
}

// ── /groups/{id}/timeline ────────────────────────────────────────────────────

/// The report arrives on /events as `group_timeline_report`.
pub async fn handle_timeline(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(query): Json<TimelineQuery>,
) -> Json<CommandResponse> {
    Json(state.engine.query_timeline(&id, query).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::EventLog;
    use std::time::Duration;
    use talkgroup_core::config::EnginePolicy;
    use talkgroup_core::group::Identity;
    use talkgroup_core::{EngineResult, Event};
    use talkgroup_engine::{Engine, LoopbackHub};

    async fn started_state() -> ApiState {
        let engine = Engine::new(LoopbackHub::new().transport());
        let events = EventLog::new(64);
        events.attach(engine.bus());
        engine.initialize(EnginePolicy::default(), Identity::default(), None);
        engine.start();
        ApiState { engine, events }
    }

    async fn wait_for(state: &ApiState, event: &Event) {
        for _ in 0..100 {
            let (logged, _) = state.events.since(0);
            if logged.iter().any(|e| &e.event == event) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{event:?} never logged");
    }

    #[tokio::test]
    async fn create_join_and_inspect() {
        let state = started_state().await;
        let config = GroupConfig {
            id: "g".into(),
            ..GroupConfig::default()
        };
        let Json(resp) = handle_create(State(state.clone()), Json(config)).await;
        assert_eq!(resp.result, EngineResult::Ok);

        let Json(resp) = handle_join(State(state.clone()), Path("g".into())).await;
        assert_eq!(resp.result, EngineResult::Ok);
        wait_for(&state, &Event::GroupJoined { id: "g".into() }).await;

        let Json(status) = handle_inspect(State(state.clone()), Path("g".into()))
            .await
            .unwrap();
        assert_eq!(status.state, talkgroup_engine::GroupState::Joined);

        let missing = handle_inspect(State(state), Path("nope".into())).await;
        assert_eq!(missing.unwrap_err().0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn biometrics_are_built_and_checked() {
        let state = started_state().await;
        let heart_rate = |value_type: u8, samples: Vec<(u8, u64)>| SeriesRequest {
            kind: BiometricType::HeartRate,
            value_type,
            timestamp: 1,
            interval_type: 0,
            interval_multiplier: 0,
            samples,
        };

        let series = heart_rate(1, vec![(0, 72), (10, 75)]).build().unwrap();
        assert_eq!(series.value_type, ValueType::U8);
        assert_eq!(series.samples.len(), 2);
        assert_eq!(series.samples[1].value, 75);

        // 300 does not fit an 8-bit value.
        let err = handle_biometrics(
            State(state.clone()),
            Path("g".into()),
            Json(BiometricsRequest {
                target: String::new(),
                series: vec![heart_rate(1, vec![(0, 300)])],
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);

        assert!(heart_rate(7, Vec::new()).build().is_err());

        let Json(resp) = handle_biometrics(
            State(state),
            Path("g".into()),
            Json(BiometricsRequest {
                target: String::new(),
                series: vec![heart_rate(2, vec![(0, 300)])],
            }),
        )
        .await
        .unwrap();
        assert_eq!(resp.result, EngineResult::InvalidParameters);
    }

    #[tokio::test]
    async fn bad_hex_and_unknown_group() {
        let state = started_state().await;
        let err = handle_raw(
            State(state.clone()),
            Path("g".into()),
            Json(RawRequest { data: "zz".into() }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);

        let Json(resp) = handle_raw(
            State(state.clone()),
            Path("g".into()),
            Json(RawRequest { data: "00".into() }),
        )
        .await
        .unwrap();
        assert_eq!(resp.result, EngineResult::InvalidParameters);

        let Json(resp) = handle_rx_volume(
            State(state),
            Path("g".into()),
            Json(VolumeRequest { left: 200, right: 0 }),
        )
        .await;
        assert_eq!(resp.result, EngineResult::InvalidParameters);
    }
}
