//! Archival of terminal outbox rows and consumed inbound events.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use courier_common::config::ArchiveConfig;
use courier_common::{AppResult, PartitionMonth, get_metrics};
use courier_db::entities::{DomainSet, archived_inbound_event, archived_outbox_event};
use courier_db::store::{ArchiveStore, PartitionInfo};
use serde::Serialize;
use tracing::info;

/// Rows moved by one archival run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveReport {
    pub outbox_archived: u64,
    pub inbound_archived: u64,
}

/// Moves finished history into month partitions.
///
/// Each batch is one atomic move, so a run can be interrupted and repeated
/// at any point.
#[derive(Clone)]
pub struct ArchiveService {
    store: Arc<dyn ArchiveStore>,
    config: ArchiveConfig,
}

impl ArchiveService {
    #[must_use]
    pub fn new(store: Arc<dyn ArchiveStore>, config: ArchiveConfig) -> Self {
        Self { store, config }
    }

    /// Archive everything currently eligible.
    pub async fn run_once(&self, now: DateTime<Utc>) -> AppResult<ArchiveReport> {
        let batch = self.config.batch_size.max(1);
        let failed_before =
            (now - Duration::days(i64::from(self.config.failed_retention_days))).fixed_offset();
        let received_before =
            (now - Duration::days(i64::from(self.config.inbound_retention_days))).fixed_offset();

        let mut report = ArchiveReport::default();

        loop {
            let moved = self.store.archive_outbox(failed_before, batch).await?.len() as u64;
            report.outbox_archived += moved;
            if moved < batch {
                break;
            }
        }

        loop {
            let moved = self.store.archive_inbound(received_before, batch).await?.len() as u64;
            report.inbound_archived += moved;
            if moved < batch {
                break;
            }
        }

        get_metrics().record_archived(report.outbox_archived, report.inbound_archived);
        if report != ArchiveReport::default() {
            info!(
                outbox = report.outbox_archived,
                inbound = report.inbound_archived,
                "Archived terminal rows"
            );
        }
        Ok(report)
    }

    /// Drop partitions older than `archive.prune_after_months`, if set.
    pub async fn prune(&self, now: DateTime<Utc>) -> AppResult<Vec<PartitionMonth>> {
        let Some(months) = self.config.prune_after_months else {
            return Ok(Vec::new());
        };
        self.prune_before(PartitionMonth::of(&now).minus_months(months))
            .await
    }

    /// Drop every partition strictly before `month`.
    pub async fn prune_before(&self, month: PartitionMonth) -> AppResult<Vec<PartitionMonth>> {
        let dropped = self.store.drop_partitions_before(month).await?;
        if !dropped.is_empty() {
            info!(before = %month, count = dropped.len(), "Dropped archive partitions");
        }
        Ok(dropped)
    }

    pub async fn list_partitions(&self) -> AppResult<Vec<PartitionInfo>> {
        self.store.list_partitions().await
    }

    pub async fn find_archived_outbox(
        &self,
        id: &str,
    ) -> AppResult<Option<archived_outbox_event::Model>> {
        self.store.find_archived_outbox(id).await
    }

    /// Archived events of a stream after `after`, in sequence order.
    pub async fn replay_inbound(
        &self,
        origin_domain: &str,
        stream_id: &str,
        after: i64,
        limit: u64,
    ) -> AppResult<Vec<archived_inbound_event::Model>> {
        self.store
            .replay_inbound(
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
    use courier_db::entities::{DeliveryStatus, inbound_event, outbox_event};
    use courier_db::memory::MemoryStore;
    use courier_db::store::{InboundEventStore, OutboxStore, StreamPositionStore};

    fn config(batch_size: u64) -> ArchiveConfig {
        ArchiveConfig {
            batch_size,
            ..ArchiveConfig::default()
        }
    }

    fn finished(id: &str, status: DeliveryStatus, completed: DateTime<Utc>) -> outbox_event::Model {
        let at = completed.fixed_offset();
        let targets: DomainSet = ["b.example"].iter().collect();
        outbox_event::Model {
            id: id.to_string(),
            event_type: "note.created".to_string(),
            stream_id: "notes".to_string(),
            sequence: 1,
            payload: b"{}".to_vec(),
            delivered_domains: if status == DeliveryStatus::Delivered {
                targets.clone()
            } else {
                DomainSet::new()
            },
            target_domains: targets,
            rejected_domains: DomainSet::new(),
            attempt_count: if status == DeliveryStatus::Failed { 8 } else { 0 },
            max_attempts: 8,
            status,
            next_retry_at: at,
            lease_owner: None,
            lease_expires_at: None,
            last_error: None,
            partition_month: PartitionMonth::of(&at).to_string(),
            created_at: at,
            updated_at: None,
            completed_at: Some(at),
        }
    }

    #[tokio::test]
    async fn test_run_once_moves_all_batches() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        for i in 0..5 {
            store
                .insert(finished(&format!("d{i}"), DeliveryStatus::Delivered, now))
                .await
                .unwrap();
        }
        // Failed recently: stays live for operators
        store
            .insert(finished("f-new", DeliveryStatus::Failed, now))
            .await
            .unwrap();
        store
            .insert(finished("f-old", DeliveryStatus::Failed, now - Duration::days(30)))
            .await
            .unwrap();

        let service = ArchiveService::new(store.clone(), config(2));
        let report = service.run_once(now).await.unwrap();

        assert_eq!(report.outbox_archived, 6);
        assert!(OutboxStore::find_by_id(store.as_ref(), "f-new").await.unwrap().is_some());
        assert!(service.find_archived_outbox("f-old").await.unwrap().is_some());

        // Second run is a no-op
        assert_eq!(service.run_once(now).await.unwrap(), ArchiveReport::default());
    }

    #[tokio::test]
    async fn test_consumed_inbound_is_replayable() {
        let store = Arc::new(MemoryStore::new());
        let old = (Utc::now() - Duration::days(30)).fixed_offset();
        for sequence in 1..=3 {
            store
                .insert_if_absent(inbound_event::Model {
                    event_id: format!("e{sequence}"),
                    origin_domain: "a.example".to_string(),
                    event_type: "note.created".to_string(),
                    stream_id: "notes".to_string(),
                    sequence,
                    payload: b"{}".to_vec(),
                    received_at: old,
                })
                .await
                .unwrap();
        }
        store.advance("a.example", "notes", 2).await.unwrap();

        let service = ArchiveService::new(store.clone(), config(100));
        let report = service.run_once(Utc::now()).await.unwrap();
        assert_eq!(report.inbound_archived, 2);

        let replayed = service.replay_inbound("A.example", "notes", 0, 10).await.unwrap();
        assert_eq!(replayed.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2]);

        let partitions = service.list_partitions().await.unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].month, PartitionMonth::of(&old));
    }

    #[tokio::test]
    async fn test_prune_disabled_by_default() {
        let service = ArchiveService::new(Arc::new(MemoryStore::new()), config(10));
        assert!(service.prune(Utc::now()).await.unwrap().is_empty());
    }
}
