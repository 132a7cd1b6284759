//! Delivery transport seam.

use async_trait::async_trait;
use serde::Serialize;

/// One delivery to one peer.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryRequest<'a> {
    pub event_id: &'a str,
    pub event_type: &'a str,
    pub domain: &'a str,
    pub payload: &'a [u8],
}

/// What the peer said.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// The peer acknowledged the event.
    Delivered,
    /// Worth retrying later: timeouts, refused connections, 5xx.
    Transient(String),
    /// The peer will never accept this event, e.g. it blocks this origin.
    Rejected(String),
}

impl DeliveryOutcome {
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Sends opaque payloads to remote peers.
///
/// Implementations never return errors: every failure is classified as
/// transient or permanent.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(&self, request: DeliveryRequest<'_>) -> DeliveryOutcome;
}
