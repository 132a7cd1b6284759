//! HTTP delivery to remote inboxes.

use std::time::Duration;

use async_trait::async_trait;
use courier_common::config::FederationConfig;
use courier_common::{AppError, AppResult};
use courier_core::{DeliveryOutcome, DeliveryRequest, DeliveryTransport};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

/// Posts payloads to `https://{domain}{inbox_path}`.
///
/// Request signing is layered in front of this by the deployment.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    user_agent: String,
    inbox_path: String,
    scheme: &'static str,
}

impl HttpTransport {
    /// Create a transport with the federation settings.
    pub fn new(config: &FederationConfig, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| AppError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            inbox_path: normalize_path(&config.inbox_path),
            scheme: "https",
        })
    }

    /// Use plain HTTP. Only meant for local test peers.
    #[must_use]
    pub const fn insecure(mut self) -> Self {
        self.scheme = "http";
        self
    }

    /// Inbox URL of a peer.
    #[must_use]
    pub fn inbox_url(&self, domain: &str) -> String {
        format!("{}://{domain}{}", self.scheme, self.inbox_path)
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Map a peer's response status onto a delivery outcome.
#[must_use]
pub fn classify_status(status: StatusCode) -> DeliveryOutcome {
    if status.is_success() {
        return DeliveryOutcome::Delivered;
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::GONE => {
            DeliveryOutcome::Rejected(format!("peer refused with {status}"))
        }
        _ => DeliveryOutcome::Transient(format!("peer answered {status}")),
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn deliver(&self, request: DeliveryRequest<'_>) -> DeliveryOutcome {
        let url = self.inbox_url(request.domain);
        if let Err(e) = url::Url::parse(&url) {
            return DeliveryOutcome::Rejected(format!("invalid inbox url {url}: {e}"));
        }

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/activity+json")
            .header("Accept", "application/activity+json")
            .header("User-Agent", &self.user_agent)
            .body(request.payload.to_vec())
            .send()
            .await;

        match response {
            Ok(response) => {
                let outcome = classify_status(response.status());
                match &outcome {
                    DeliveryOutcome::Delivered => {
                        debug!(event_id = %request.event_id, inbox = %url, "Delivered");
                    }
                    DeliveryOutcome::Rejected(reason) | DeliveryOutcome::Transient(reason) => {
                        warn!(event_id = %request.event_id, inbox = %url, reason = %reason, "Delivery not accepted");
                    }
                }
                outcome
            }
            Err(e) if e.is_timeout() => DeliveryOutcome::Transient(format!("timed out: {e}")),
            Err(e) => DeliveryOutcome::Transient(format!("request failed: {e}")),
        }
    }
}
