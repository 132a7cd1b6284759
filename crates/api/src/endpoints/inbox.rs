//! Inbox endpoint.
//!
//! Peers are authenticated upstream of this service.

use axum::{Json, Router, extract::State, routing::post};
use courier_common::AppResult;
use courier_core::{IngestInput, IngestReceipt};
use serde::Deserialize;
use tracing::debug;

use crate::{middleware::AppState, response::ApiResponse};

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(ingest))
}

/// An event delivered by a peer. The payload is base64.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxRequest {
    pub event_id: String,
    pub origin_domain: String,
    pub event_type: String,
    pub stream_id: String,
    pub sequence: i64,
    #[serde(with = "crate::encoding::base64_payload", default)]
    pub payload: Vec<u8>,
}

impl From<InboxRequest> for IngestInput {
    fn from(req: InboxRequest) -> Self {
        Self {
            event_id: req.event_id,
            origin_domain: req.origin_domain,
            event_type: req.event_type,
            stream_id: req.stream_id,
            sequence: req.sequence,
            payload: req.payload,
        }
    }
}

/// Duplicates answer 200 like first deliveries so the sender stops retrying.
async fn ingest(
    State(state): State<AppState>,
    Json(req): Json<InboxRequest>,
) -> AppResult<ApiResponse<IngestReceipt>> {
    let receipt = state.ingest_service.ingest(req.into()).await?;
    debug!(event_id = %receipt.event_id, status = ?receipt.status, "Inbox accepted event");
    Ok(ApiResponse::ok(receipt))
}
