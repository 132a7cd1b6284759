//! Resumable, in-order consumption of ingested streams.

use std::future::Future;
use std::sync::Arc;

use courier_common::AppResult;
use courier_db::entities::{DomainSet, inbound_event};
use courier_db::store::InboundEventStore;
use serde::Serialize;
use tracing::{debug, info};

use super::position::StreamPositionService;

/// Outcome of one consumption pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeReport {
    /// Events handed to the handler.
    pub processed: u64,
    /// Position after the pass, 0 if nothing was ever consumed.
    pub position: i64,
    /// Sequence the consumer stopped in front of because it has not arrived.
    pub waiting_for: Option<i64>,
}

/// Feeds stored events to a handler in sequence order and ratchets the
/// stream position after each success.
///
/// A restart resumes after the stored position. A stream without a position
/// starts at its lowest stored sequence.
#[derive(Clone)]
pub struct StreamConsumer {
    events: Arc<dyn InboundEventStore>,
    positions: StreamPositionService,
    batch_size: u64,
    allow_gaps: bool,
}

impl StreamConsumer {
    #[must_use]
    pub fn new(events: Arc<dyn InboundEventStore>, positions: StreamPositionService) -> Self {
        Self {
            events,
            positions,
            batch_size: 100,
            allow_gaps: false,
        }
    }

    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = if batch_size == 0 { 1 } else { batch_size };
        self
    }

    /// Apply events past a missing sequence instead of waiting for it.
    #[must_use]
    pub const fn allow_gaps(mut self, allow: bool) -> Self {
        self.allow_gaps = allow;
        self
    }

    /// Consume everything currently available on a stream.
    ///
    /// A handler error stops the pass. Events handled before it stay
    /// consumed.
    pub async fn consume<F, Fut>(
        &self,
        origin_domain: &str,
        stream_id: &str,
        mut handler: F,
    ) -> AppResult<ConsumeReport>
    where
        F: FnMut(inbound_event::Model) -> Fut + Send,
        Fut: Future<Output = AppResult<()>> + Send,
    {
        let origin = DomainSet::normalize(origin_domain);
        let mut position = self
            .positions
            .find(&origin, stream_id)
            .await?
            .map(|p| p.last_sequence);
        let mut report = ConsumeReport {
            position: position.unwrap_or(0),
            ..ConsumeReport::default()
        };

        loop {
            let batch = self
                .events
                .list_after(&origin, stream_id, position.unwrap_or(0), self.batch_size)
                .await?;
            let exhausted = (batch.len() as u64) < self.batch_size;

            for event in batch {
                if let Some(last) = position {
                    if event.sequence <= last {
                        continue;
                    }
                    if event.sequence > last + 1 && !self.allow_gaps {
                        debug!(
                            origin = %origin,
                            stream = %stream_id,
                            expected = last + 1,
                            found = event.sequence,
                            "Waiting for missing sequence"
                        );
                        report.waiting_for = Some(last + 1);
                        return Ok(report);
                    }
                }

                let sequence = event.sequence;
                handler(event).await?;
                let stored = self.positions.advance(&origin, stream_id, sequence).await?;
                position = Some(stored);
                report.position = stored;
                report.processed += 1;
            }

            if exhausted {
                break;
            }
        }

        if report.processed > 0 {
            info!(
                origin = %origin,
                stream = %stream_id,
                processed = report.processed,
                position = report.position,
                "Consumed stream"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_common::AppError;
    use courier_db::memory::MemoryStore;
    use std::sync::Mutex;

    async fn ingest(store: &MemoryStore, sequence: i64) {
        store
            .insert_if_absent(inbound_event::Model {
                event_id: format!("e{sequence}"),
                origin_domain: "a.example".to_string(),
                event_type: "note.created".to_string(),
                stream_id: "notes".to_string(),
                sequence,
                payload: vec![],
                received_at: Utc::now().fixed_offset(),
            })
            .await
            .unwrap();
    }

    fn consumer(store: &Arc<MemoryStore>) -> StreamConsumer {
        StreamConsumer::new(store.clone(), StreamPositionService::new(store.clone())).with_batch_size(2)
    }

    #[tokio::test]
    async fn test_stops_at_gap_until_it_fills() {
        let store = Arc::new(MemoryStore::new());
        for sequence in [1, 2, 3, 5, 6] {
            ingest(&store, sequence).await;
        }
        let seen = Arc::new(Mutex::new(Vec::new()));
        let consumer = consumer(&store);

        let record = |seen: Arc<Mutex<Vec<i64>>>| {
            move |event: inbound_event::Model| {
                seen.lock().unwrap().push(event.sequence);
                async { Ok::<(), AppError>(()) }
            }
        };

        let report = consumer.consume("a.example", "notes", record(seen.clone())).await.unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.position, 3);
        assert_eq!(report.waiting_for, Some(4));

        ingest(&store, 4).await;
        let report = consumer.consume("a.example", "notes", record(seen.clone())).await.unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.position, 6);
        assert_eq!(report.waiting_for, None);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_allow_gaps_skips_ahead() {
        let store = Arc::new(MemoryStore::new());
        for sequence in [1, 4] {
            ingest(&store, sequence).await;
        }
        let report = consumer(&store)
            .allow_gaps(true)
            .consume("a.example", "notes", |_| async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.position, 4);
    }

    #[tokio::test]
    async fn test_handler_error_keeps_earlier_progress() {
        let store = Arc::new(MemoryStore::new());
        for sequence in 1..=3 {
            ingest(&store, sequence).await;
        }
        let result = consumer(&store)
            .consume("a.example", "notes", |event| async move {
                if event.sequence == 2 {
                    Err(AppError::Internal("handler failed".to_string()))
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(result.is_err());
        let position = StreamPositionService::new(store.clone())
            .current_position("a.example", "notes")
            .await
            .unwrap();
        assert_eq!(position, 1);
    }

    #[tokio::test]
    async fn test_first_pass_starts_at_lowest_sequence() {
        let store = Arc::new(MemoryStore::new());
        for sequence in [7, 8] {
            ingest(&store, sequence).await;
        }
        let report = consumer(&store)
            .consume("a.example", "notes", |_| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(report.position, 8);
        assert_eq!(report.processed, 2);
    }
}
