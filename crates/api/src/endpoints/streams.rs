//! Stream position and inbound event endpoints.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use courier_common::AppResult;
use courier_db::entities::{archived_inbound_event, inbound_event};
use serde::{Deserialize, Serialize};

use super::StreamPage;
use crate::{middleware::AppState, response::ApiResponse};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{origin}/{stream}/position", get(position).post(advance))
        .route("/{origin}/{stream}/events", get(events))
}

/// Consumption position of one stream.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResponse {
    pub origin_domain: String,
    pub stream_id: String,
    pub last_sequence: i64,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceRequest {
    pub sequence: i64,
}

/// An inbound event, live or archived. The payload is base64.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEventResponse {
    pub event_id: String,
    pub origin_domain: String,
    pub stream_id: String,
    pub event_type: String,
    pub sequence: i64,
    #[serde(with = "crate::encoding::base64_payload")]
    pub payload: Vec<u8>,
    pub received_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<String>,
}

impl From<inbound_event::Model> for InboundEventResponse {
    fn from(event: inbound_event::Model) -> Self {
        Self {
            event_id: event.event_id,
            origin_domain: event.origin_domain,
            stream_id: event.stream_id,
            event_type: event.event_type,
            sequence: event.sequence,
            payload: event.payload,
            received_at: event.received_at.to_rfc3339(),
            archived_at: None,
        }
    }
}

impl From<archived_inbound_event::Model> for InboundEventResponse {
    fn from(event: archived_inbound_event::Model) -> Self {
        Self {
            event_id: event.event_id,
            origin_domain: event.origin_domain,
            stream_id: event.stream_id,
            event_type: event.event_type,
            sequence: event.sequence,
            payload: event.payload,
            received_at: event.received_at.to_rfc3339(),
            archived_at: Some(event.archived_at.to_rfc3339()),
        }
    }
}

async fn position(
    State(state): State<AppState>,
    Path((origin, stream)): Path<(String, String)>,
) -> AppResult<ApiResponse<PositionResponse>> {
    let last_sequence = state
        .position_service
        .current_position(&origin, &stream)
        .await?;
    Ok(ApiResponse::ok(PositionResponse {
        origin_domain: origin,
        stream_id: stream,
        last_sequence,
    }))
}

async fn advance(
    State(state): State<AppState>,
    Path((origin, stream)): Path<(String, String)>,
    Json(req): Json<AdvanceRequest>,
) -> AppResult<ApiResponse<PositionResponse>> {
    let last_sequence = state
        .position_service
        .advance(&origin, &stream, req.sequence)
        .await?;
    Ok(ApiResponse::ok(PositionResponse {
        origin_domain: origin,
        stream_id: stream,
        last_sequence,
    }))
}

async fn events(
    State(state): State<AppState>,
    Path((origin, stream)): Path<(String, String)>,
    Query(page): Query<StreamPage>,
) -> AppResult<ApiResponse<Vec<InboundEventResponse>>> {
    let events = state
        .ingest_service
        .list_after(&origin, &stream, page.after, page.limit)
        .await?;
    Ok(ApiResponse::ok(events.into_iter().map(Into::into).collect()))
}
