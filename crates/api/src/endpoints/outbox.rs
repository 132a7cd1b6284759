//! Outbox endpoints.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use courier_common::{AppError, AppResult};
use courier_core::{BacklogEntry, DeliveryStatusView, ProduceEventInput};
use courier_db::entities::DeliveryStatus;
use serde::Deserialize;

use crate::{middleware::AppState, response::ApiResponse};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(produce))
        .route("/backlog", get(backlog))
        .route("/{id}", get(show))
}

/// Produce request. The payload is base64.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub stream_id: String,
    pub event_type: String,
    #[serde(with = "crate::encoding::base64_payload", default)]
    pub payload: Vec<u8>,
    pub target_domains: Option<Vec<String>>,
    pub max_attempts: Option<u32>,
}

impl From<ProduceRequest> for ProduceEventInput {
    fn from(req: ProduceRequest) -> Self {
        Self {
            stream_id: req.stream_id,
            event_type: req.event_type,
            payload: req.payload,
            target_domains: req.target_domains,
            max_attempts: req.max_attempts,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    #[serde(default = "default_list_limit")]
    pub limit: u64,
}

const fn default_list_limit() -> u64 {
    100
}

async fn produce(
    State(state): State<AppState>,
    Json(req): Json<ProduceRequest>,
) -> AppResult<ApiResponse<DeliveryStatusView>> {
    let row = state.outbox_service.produce_event(req.into()).await?;
    Ok(ApiResponse::created(row.into()))
}

async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<DeliveryStatusView>> {
    let view = state.outbox_service.get_delivery_status(&id).await?;
    Ok(ApiResponse::ok(view))
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<ApiResponse<Vec<DeliveryStatusView>>> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            DeliveryStatus::parse(s)
                .ok_or_else(|| AppError::BadRequest(format!("unknown delivery status: {s}")))
        })
        .transpose()?;

    Ok(ApiResponse::ok(
        state.outbox_service.list(status, query.limit).await?,
    ))
}

async fn backlog(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<BacklogEntry>>> {
    Ok(ApiResponse::ok(state.outbox_service.backlog().await?))
}
