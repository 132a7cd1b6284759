//! Archive endpoints.

use axum::{
    Router,
    extract::{Path, Query, State},
    routing::get,
};
use courier_common::AppResult;
use courier_db::store::PartitionInfo;

use super::{StreamPage, streams::InboundEventResponse};
use crate::{middleware::AppState, response::ApiResponse};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/partitions", get(partitions))
        .route("/inbound/{origin}/{stream}", get(replay_inbound))
}

async fn partitions(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<PartitionInfo>>> {
    Ok(ApiResponse::ok(state.archive_service.list_partitions().await?))
}

async fn replay_inbound(
    State(state): State<AppState>,
    Path((origin, stream)): Path<(String, String)>,
    Query(page): Query<StreamPage>,
) -> AppResult<ApiResponse<Vec<InboundEventResponse>>> {
    let events = state
        .archive_service
        .replay_inbound(&origin, &stream, page.after, page.limit)
        .await?;
    Ok(ApiResponse::ok(events.into_iter().map(Into::into).collect()))
}
