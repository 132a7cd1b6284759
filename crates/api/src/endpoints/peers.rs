//! Peer health endpoints.

use axum::{
    Router,
    extract::{Path, Query, State},
    routing::get,
};
use courier_common::{AppError, AppResult};
use courier_db::entities::peer_health;
use serde::{Deserialize, Serialize};

use crate::{middleware::AppState, response::ApiResponse};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/unreachable", get(unreachable))
        .route("/{domain}", get(show))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerResponse {
    pub domain: String,
    pub unreachable_since: Option<String>,
    pub consecutive_failure_count: i32,
    pub last_error: Option<String>,
    pub last_failure_at: Option<String>,
    pub last_success_at: Option<String>,
}

impl From<peer_health::Model> for PeerResponse {
    fn from(peer: peer_health::Model) -> Self {
        Self {
            domain: peer.domain,
            unreachable_since: peer.unreachable_since.map(|t| t.to_rfc3339()),
            consecutive_failure_count: peer.consecutive_failure_count,
            last_error: peer.last_error,
            last_failure_at: peer.last_failure_at.map(|t| t.to_rfc3339()),
            last_success_at: peer.last_success_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UnreachableQuery {
    #[serde(default = "default_limit")]
    pub limit: u64,
}

const fn default_limit() -> u64 {
    100
}

async fn unreachable(
    State(state): State<AppState>,
    Query(query): Query<UnreachableQuery>,
) -> AppResult<ApiResponse<Vec<PeerResponse>>> {
    let peers = state.peer_health_service.list_unreachable(query.limit).await?;
    Ok(ApiResponse::ok(peers.into_iter().map(Into::into).collect()))
}

async fn show(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> AppResult<ApiResponse<PeerResponse>> {
    let peer = state
        .peer_health_service
        .find(&domain)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("peer {domain}")))?;
    Ok(ApiResponse::ok(peer.into()))
}
