//! Ingestion notification hooks.
//!
//! Listeners run after a non-duplicate event is stored. They observe the
//! event; a failing listener is logged and never undoes the ingestion.

use std::sync::Arc;

use async_trait::async_trait;
use courier_common::AppResult;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::warn;

/// Event handed to listeners after ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestedEvent {
    pub event_id: String,
    pub origin_domain: String,
    pub stream_id: String,
    pub event_type: String,
    pub sequence: i64,
    #[serde(skip)]
    pub payload: Vec<u8>,
}

/// Receives ingestion notifications.
#[async_trait]
pub trait IngestListener: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn on_event_ingested(&self, event: &IngestedEvent) -> AppResult<()>;
}

/// Registry of ingestion listeners.
#[derive(Clone, Default)]
pub struct IngestHooks {
    listeners: Arc<RwLock<Vec<Arc<dyn IngestListener>>>>,
}

impl IngestHooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Listeners are called in registration order.
    pub async fn register(&self, listener: Arc<dyn IngestListener>) {
        self.listeners.write().await.push(listener);
    }

    pub async fn len(&self) -> usize {
        self.listeners.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.listeners.read().await.is_empty()
    }

    /// Notify every listener. Returns how many succeeded.
    pub async fn notify(&self, event: &IngestedEvent) -> usize {
        let listeners = self.listeners.read().await.clone();
        let mut delivered = 0;
        for listener in listeners {
            match listener.on_event_ingested(event).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    listener = listener.name(),
                    event_id = %event.event_id,
                    error = %e,
                    "Ingest listener failed"
                ),
            }
        }
        delivered
    }
}

/// Listener that forwards events to a tokio channel. Handy for in-process
/// consumers and tests.
pub struct ChannelListener {
    sender: tokio::sync::mpsc::UnboundedSender<IngestedEvent>,
}

impl ChannelListener {
    #[must_use]
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<IngestedEvent>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl IngestListener for ChannelListener {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn on_event_ingested(&self, event: &IngestedEvent) -> AppResult<()> {
        self.sender
            .send(event.clone())
            .map_err(|_| courier_common::AppError::Internal("ingest channel closed".to_string()))
    }
}
