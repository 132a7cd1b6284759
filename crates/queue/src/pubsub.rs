//! Redis Pub/Sub for cross-process ingestion notices.
//!
//! Every process that ingests events publishes a notice; every process that
//! started the bridge mirrors all notices onto a local broadcast channel.

#![allow(missing_docs)]

use async_trait::async_trait;
use courier_common::{AppError, AppResult};
use courier_core::{IngestListener, IngestedEvent};
use fred::clients::{Client, SubscriberClient};
use fred::error::{Error as RedisError, ErrorKind as RedisErrorKind};
use fred::interfaces::{ClientLike, EventInterface, PubsubInterface};
use fred::types::config::Config as RedisConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Pub/Sub channel names.
pub mod channels {
    /// Channel carrying ingestion notices.
    #[must_use]
    pub fn ingested(prefix: &str) -> String {
        format!("{prefix}:ingested")
    }
}

/// Pub/Sub event types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PubSubEvent {
    /// A new inbound event was stored.
    #[serde(rename_all = "camelCase")]
    EventIngested {
        event_id: String,
        origin_domain: String,
        stream_id: String,
        event_type: String,
        sequence: i64,
    },
}

impl From<&IngestedEvent> for PubSubEvent {
    fn from(event: &IngestedEvent) -> Self {
        Self::EventIngested {
            event_id: event.event_id.clone(),
            origin_domain: event.origin_domain.clone(),
            stream_id: event.stream_id.clone(),
            event_type: event.event_type.clone(),
            sequence: event.sequence,
        }
    }
}

/// Redis Pub/Sub manager for ingestion notices.
#[derive(Clone)]
pub struct RedisPubSub {
    publisher: Client,
    subscriber: SubscriberClient,
    channel: String,
    /// Local broadcast channel for events received from Redis.
    local_tx: broadcast::Sender<PubSubEvent>,
}

impl RedisPubSub {
    /// Create a new Redis Pub/Sub manager.
    pub async fn new(redis_url: &str, prefix: &str) -> Result<Self, RedisError> {
        let config = RedisConfig::from_url(redis_url)?;

        let publisher = Client::new(config.clone(), None, None, None);
        publisher.init().await?;

        let subscriber = SubscriberClient::new(config, None, None, None);
        subscriber.init().await?;

        let (local_tx, _) = broadcast::channel(1000);

        info!("Redis Pub/Sub initialized");

        Ok(Self {
            publisher,
            subscriber,
            channel: channels::ingested(prefix),
            local_tx,
        })
    }

    /// Subscribe to the ingestion channel and start the event loop.
    pub async fn start(&self) -> Result<(), RedisError> {
        self.subscriber.subscribe(self.channel.as_str()).await?;

        info!(channel = %self.channel, "Subscribed to Redis Pub/Sub channel");

        let local_tx = self.local_tx.clone();
        let mut message_stream = self.subscriber.message_rx();

        tokio::spawn(async move {
            while let Ok(message) = message_stream.recv().await {
                if let Some(payload) = message.value.as_string() {
                    match serde_json::from_str::<PubSubEvent>(&payload) {
                        Ok(event) => {
                            debug!(?event, "Received Pub/Sub event");
                            if local_tx.send(event).is_err() {
                                debug!("No local subscribers for Pub/Sub event");
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to parse Pub/Sub message");
                        }
                    }
                }
            }
            info!("Pub/Sub message stream ended");
        });

        Ok(())
    }

    /// Publish an event on the ingestion channel.
    pub async fn publish(&self, event: &PubSubEvent) -> Result<(), RedisError> {
        let payload = serde_json::to_string(event).map_err(|e| {
            RedisError::new(
                RedisErrorKind::InvalidArgument,
                format!("Serialization error: {e}"),
            )
        })?;
        let _: () = self.publisher.publish(self.channel.as_str(), payload).await?;
        debug!(channel = %self.channel, ?event, "Published Pub/Sub event");
        Ok(())
    }

    /// Get a receiver for local broadcast events.
    #[must_use]
    pub fn subscribe_local(&self) -> broadcast::Receiver<PubSubEvent> {
        self.local_tx.subscribe()
    }

    /// Get the number of local subscribers.
    #[must_use]
    pub fn local_subscriber_count(&self) -> usize {
        self.local_tx.receiver_count()
    }

    /// Shutdown the Pub/Sub manager.
    pub async fn shutdown(&self) -> Result<(), RedisError> {
        self.subscriber.quit().await?;
        self.publisher.quit().await?;
        info!("Redis Pub/Sub shutdown");
        Ok(())
    }
}

#[async_trait]
impl IngestListener for RedisPubSub {
    fn name(&self) -> &'static str {
        "redis-pubsub"
    }

    async fn on_event_ingested(&self, event: &IngestedEvent) -> AppResult<()> {
        self.publish(&PubSubEvent::from(event))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name() {
        assert_eq!(channels::ingested("courier"), "courier:ingested");
    }

    #[test]
    fn test_event_wire_format() {
        let event = PubSubEvent::from(&IngestedEvent {
            event_id: "e1".to_string(),
            origin_domain: "a.example".to_string(),
            stream_id: "notes".to_string(),
            event_type: "note.created".to_string(),
            sequence: 7,
            payload: vec![1, 2, 3],
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "eventIngested");
        assert_eq!(json["originDomain"], "a.example");
        assert_eq!(json["sequence"], 7);
        // Payloads stay out of notices
        assert!(json.get("payload").is_none());
    }
}
