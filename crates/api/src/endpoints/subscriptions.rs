//! Stream subscriptions consulted when an event is produced without
//! explicit targets.

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use courier_common::{AppError, AppResult};
use courier_core::validation::validate_domain;
use serde::Deserialize;

use crate::middleware::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(subscribe).delete(unsubscribe))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub stream_id: String,
    pub domain: String,
}

impl SubscriptionRequest {
    fn check(&self) -> AppResult<()> {
        if self.stream_id.is_empty() {
            return Err(AppError::Validation("streamId must not be empty".to_string()));
        }
        validate_domain(&self.domain)
            .map_err(|_| AppError::Validation(format!("invalid domain: {}", self.domain)))
    }
}

async fn subscribe(
    State(state): State<AppState>,
    Json(req): Json<SubscriptionRequest>,
) -> AppResult<StatusCode> {
    req.check()?;
    state.subscriptions.subscribe(&req.stream_id, &req.domain).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn unsubscribe(
    State(state): State<AppState>,
    Json(req): Json<SubscriptionRequest>,
) -> AppResult<StatusCode> {
    req.check()?;
    state.subscriptions.unsubscribe(&req.stream_id, &req.domain).await;
    Ok(StatusCode::NO_CONTENT)
}
