//! /events handler — polling access to the event log.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::event_log::LoggedEvent;

use super::ApiState;

#[derive(Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since: u64,
}

#[derive(Serialize)]
pub struct EventsResponse {
    /// Pass as `since` on the next poll.
    pub next: u64,
    pub events: Vec<LoggedEvent>,
}

pub async fn handle_events(
    State(state): State<ApiState>,
    Query(query): Query<EventsQuery>,
) -> Json<EventsResponse> {
    let (events, next_seq) = state.events.since(query.since);
    Json(EventsResponse {
        next: next_seq.saturating_sub(1),
        events,
    })
}
