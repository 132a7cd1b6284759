//! API endpoints.

mod archive;
mod inbox;
mod metrics;
mod outbox;
mod peers;
mod streams;
mod subscriptions;

use axum::Router;
use serde::Deserialize;

use crate::middleware::AppState;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/outbox", outbox::router())
        .nest("/inbox", inbox::router())
        .nest("/streams", streams::router())
        .nest("/subscriptions", subscriptions::router())
        .nest("/peers", peers::router())
        .nest("/archive", archive::router())
        .merge(metrics::router())
}

/// `?after=&limit=` paging over a stream.
#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) struct StreamPage {
    #[serde(default)]
    after: i64,
    #[serde(default = "default_limit")]
    limit: u64,
}

const fn default_limit() -> u64 {
    100
}
