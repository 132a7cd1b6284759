//! Inbound event ingestion.

use std::sync::Arc;

use chrono::Utc;
use courier_common::{AppResult, get_metrics};
use courier_db::entities::{DomainSet, inbound_event};
use courier_db::store::{InboundEventStore, InsertOutcome, StreamPositionStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use validator::Validate;

use super::hooks::{IngestHooks, IngestedEvent};
use super::validation::validate_domain;

/// Event pushed by a remote peer.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IngestInput {
    #[validate(length(min = 1, max = 256))]
    pub event_id: String,
    #[validate(custom(function = "validate_domain"))]
    pub origin_domain: String,
    #[validate(length(min = 1, max = 128))]
    pub event_type: String,
    #[validate(length(min = 1, max = 256))]
    pub stream_id: String,
    /// Sequence assigned by the origin. Never renumbered.
    #[validate(range(min = 1))]
    pub sequence: i64,
    #[serde(default)]
    pub payload: Vec<u8>,
}

/// Whether the event was new.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Accepted,
    Duplicate,
}

/// Where an event sits relative to the stream's consumer position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SequenceGap {
    /// No position recorded for the stream yet.
    Initial,
    /// Exactly the next expected sequence.
    Contiguous,
    /// Sequences in `missing_from..=missing_to` have not been consumed.
    #[serde(rename_all = "camelCase")]
    Ahead { missing_from: i64, missing_to: i64 },
    /// At or below the position, already consumed.
    Stale,
}

impl SequenceGap {
    /// Classify `sequence` against the last consumed sequence.
    #[must_use]
    pub const fn classify(last_sequence: Option<i64>, sequence: i64) -> Self {
        match last_sequence {
            None => Self::Initial,
            Some(last) if sequence <= last => Self::Stale,
            Some(last) if sequence == last + 1 => Self::Contiguous,
            Some(last) => Self::Ahead {
                missing_from: last + 1,
                missing_to: sequence - 1,
            },
        }
    }
}

/// Result of one ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReceipt {
    pub status: IngestStatus,
    pub event_id: String,
    pub origin_domain: String,
    pub stream_id: String,
    pub sequence: i64,
    pub last_sequence: Option<i64>,
    pub gap: SequenceGap,
}

/// Deduplicating store for events received from peers.
///
/// Events are stored as received, in any order. Ingestion never advances
/// stream positions; that is the consumer's job.
#[derive(Clone)]
pub struct IngestService {
    events: Arc<dyn InboundEventStore>,
    positions: Arc<dyn StreamPositionStore>,
    hooks: IngestHooks,
}

impl IngestService {
    #[must_use]
    pub fn new(
        events: Arc<dyn InboundEventStore>,
        positions: Arc<dyn StreamPositionStore>,
        hooks: IngestHooks,
    ) -> Self {
        Self {
            events,
            positions,
            hooks,
        }
    }

    /// Registry notified after each accepted event.
    #[must_use]
    pub const fn hooks(&self) -> &IngestHooks {
        &self.hooks
    }

    /// Store an inbound event. Re-ingesting a known `event_id` is a no-op
    /// that reports `Duplicate`.
    pub async fn ingest(&self, input: IngestInput) -> AppResult<IngestReceipt> {
        input.validate()?;
        let origin_domain = DomainSet::normalize(&input.origin_domain);

        let model = inbound_event::Model {
            event_id: input.event_id,
            origin_domain,
            event_type: input.event_type,
            stream_id: input.stream_id,
            sequence: input.sequence,
            payload: input.payload,
            received_at: Utc::now().fixed_offset(),
        };

        let outcome = self.events.insert_if_absent(model).await?;
        let duplicate = outcome.is_duplicate();
        get_metrics().record_ingested(duplicate);

        let stored = match outcome {
            InsertOutcome::Inserted(event) => {
                info!(
                    event_id = %event.event_id,
                    origin = %event.origin_domain,
                    stream = %event.stream_id,
                    sequence = event.sequence,
                    "Ingested event"
                );
                self.hooks
                    .notify(&IngestedEvent {
                        event_id: event.event_id.clone(),
                        origin_domain: event.origin_domain.clone(),
                        stream_id: event.stream_id.clone(),
                        event_type: event.event_type.clone(),
                        sequence: event.sequence,
                        payload: event.payload.clone(),
                    })
                    .await;
                event
            }
            InsertOutcome::Duplicate(event) => {
                debug!(event_id = %event.event_id, "Duplicate event ignored");
                event
            }
        };

        let last_sequence = self
            .positions
            .find(&stored.origin_domain, &stored.stream_id)
            .await?
            .map(|p| p.last_sequence);

        Ok(IngestReceipt {
            status: if duplicate {
                IngestStatus::Duplicate
            } else {
                IngestStatus::Accepted
            },
            gap: SequenceGap::classify(last_sequence, stored.sequence),
            event_id: stored.event_id,
            origin_domain: stored.origin_domain,
            stream_id: stored.stream_id,
            sequence: stored.sequence,
            last_sequence,
        })
    }

    pub async fn find(&self, event_id: &str) -> AppResult<Option<inbound_event::Model>> {
        self.events.find_by_id(event_id).await
    }

    /// Live events of a stream after `after`, in sequence order. `limit` is
    /// clamped to `1..=1000`.
    pub async fn list_after(
        &self,
        origin_domain: &str,
        stream_id: &str,
        after: i64,
        limit: u64,
    ) -> AppResult<Vec<inbound_event::Model>> {
        self.events
            .list_after(
                &DomainSet::normalize(origin_domain),
                stream_id,
                after,
                limit.clamp(1, 1000),
            )
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::hooks::ChannelListener;
    use courier_common::AppError;
    use courier_db::memory::MemoryStore;

    fn service(store: &Arc<MemoryStore>) -> IngestService {
        IngestService::new(store.clone(), store.clone(), IngestHooks::new())
    }

    fn input(event_id: &str, sequence: i64) -> IngestInput {
        IngestInput {
            event_id: event_id.to_string(),
            origin_domain: "A.Example".to_string(),
            event_type: "note.created".to_string(),
            stream_id: "actor:42".to_string(),
            sequence,
            payload: br#"{"type":"Create"}"#.to_vec(),
        }
    }

    #[test]
    fn test_gap_classification() {
        assert_eq!(SequenceGap::classify(None, 3), SequenceGap::Initial);
        assert_eq!(SequenceGap::classify(Some(2), 3), SequenceGap::Contiguous);
        assert_eq!(SequenceGap::classify(Some(2), 2), SequenceGap::Stale);
        assert_eq!(
            SequenceGap::classify(Some(2), 6),
            SequenceGap::Ahead {
                missing_from: 3,
                missing_to: 5
            }
        );
    }

    #[tokio::test]
    async fn test_duplicate_is_not_an_error() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);

        let first = service.ingest(input("e1", 1)).await.unwrap();
        let second = service.ingest(input("e1", 1)).await.unwrap();

        assert_eq!(first.status, IngestStatus::Accepted);
        assert_eq!(second.status, IngestStatus::Duplicate);
        assert_eq!(first.origin_domain, "a.example");

        let stored = service.find("e1").await.unwrap().unwrap();
        assert_eq!(stored.payload, br#"{"type":"Create"}"#.to_vec());
    }

    #[tokio::test]
    async fn test_out_of_order_events_are_stored_and_gap_reported() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        store.advance("a.example", "actor:42", 3).await.unwrap();

        let ahead = service.ingest(input("e5", 5)).await.unwrap();
        assert_eq!(
            ahead.gap,
            SequenceGap::Ahead {
                missing_from: 4,
                missing_to: 4
            }
        );

        let fill = service.ingest(input("e4", 4)).await.unwrap();
        assert_eq!(fill.gap, SequenceGap::Contiguous);

        // Ingestion never moves the position
        let position = store.find("a.example", "actor:42").await.unwrap().unwrap();
        assert_eq!(position.last_sequence, 3);

        let events = service.list_after("a.example", "actor:42", 3, 10).await.unwrap();
        assert_eq!(
            events.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![4, 5]
        );
    }

    #[tokio::test]
    async fn test_list_after_clamps_limit() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        for sequence in 1..=3 {
            service.ingest(input(&format!("e{sequence}"), sequence)).await.unwrap();
        }

        let all = service.list_after("a.example", "actor:42", 0, u64::MAX).await.unwrap();
        assert_eq!(all.len(), 3);

        let one = service.list_after("a.example", "actor:42", 0, 0).await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].sequence, 1);
    }

    #[tokio::test]
    async fn test_hooks_fire_once_per_new_event() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        let (listener, mut rx) = ChannelListener::new();
        service.hooks().register(Arc::new(listener)).await;

        service.ingest(input("e1", 1)).await.unwrap();
        service.ingest(input("e1", 1)).await.unwrap();

        let notified = rx.recv().await.unwrap();
        assert_eq!(notified.event_id, "e1");
        assert_eq!(notified.origin_domain, "a.example");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);

        let mut bad = input("e1", 0);
        bad.origin_domain = "https://a.example".to_string();

        let err = service.ingest(bad).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
