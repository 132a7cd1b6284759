//! Outbox production and delivery status reads.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use courier_common::{AppError, AppResult, IdGenerator, PartitionMonth, get_metrics};
use courier_db::entities::{DeliveryStatus, DomainSet, archived_outbox_event, outbox_event};
use courier_db::store::{ArchiveStore, OutboxStore};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;
use validator::Validate;

use super::progress::DeliveryProgress;
use super::sequence::SequenceService;
use super::validation::validate_domains;

/// Supplies the peers interested in a stream at production time.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve_targets(&self, stream_id: &str) -> AppResult<DomainSet>;
}

/// Resolver backed by an in-process subscription table.
#[derive(Default)]
pub struct StaticTargetResolver {
    subscriptions: RwLock<HashMap<String, DomainSet>>,
}

impl StaticTargetResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `domain` to the peers of `stream_id`.
    pub async fn subscribe(&self, stream_id: &str, domain: &str) {
        self.subscriptions
            .write()
            .await
            .entry(stream_id.to_string())
            .or_default()
            .insert(domain);
    }

    pub async fn unsubscribe(&self, stream_id: &str, domain: &str) {
        if let Some(domains) = self.subscriptions.write().await.get_mut(stream_id) {
            domains.remove(domain);
        }
    }
}

#[async_trait]
impl TargetResolver for StaticTargetResolver {
    async fn resolve_targets(&self, stream_id: &str) -> AppResult<DomainSet> {
        Ok(self
            .subscriptions
            .read()
            .await
            .get(stream_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Request to publish a local event.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProduceEventInput {
    #[validate(length(min = 1, max = 256))]
    pub stream_id: String,
    #[validate(length(min = 1, max = 128))]
    pub event_type: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    /// Explicit targets. When absent the [`TargetResolver`] decides.
    #[validate(custom(function = "validate_domains"))]
    pub target_domains: Option<Vec<String>>,
    #[validate(range(min = 1, max = 100))]
    pub max_attempts: Option<u32>,
}

/// Delivery state of an outbox event, live or archived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatusView {
    pub id: String,
    pub event_type: String,
    pub stream_id: String,
    pub sequence: i64,
    pub status: DeliveryStatus,
    pub target_domains: DomainSet,
    pub delivered_domains: DomainSet,
    pub rejected_domains: DomainSet,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<DateTime<FixedOffset>>,
    pub last_error: Option<String>,
    pub partition_month: String,
    pub created_at: DateTime<FixedOffset>,
    pub completed_at: Option<DateTime<FixedOffset>>,
    pub archived: bool,
}

impl From<outbox_event::Model> for DeliveryStatusView {
    fn from(row: outbox_event::Model) -> Self {
        let terminal = row.status.is_terminal();
        Self {
            id: row.id,
            event_type: row.event_type,
            stream_id: row.stream_id,
            sequence: row.sequence,
            status: row.status,
            target_domains: row.target_domains,
            delivered_domains: row.delivered_domains,
            rejected_domains: row.rejected_domains,
            attempt_count: row.attempt_count,
            max_attempts: row.max_attempts,
            next_retry_at: (!terminal).then_some(row.next_retry_at),
            last_error: row.last_error,
            partition_month: row.partition_month,
            created_at: row.created_at,
            completed_at: row.completed_at,
            archived: false,
        }
    }
}

impl From<archived_outbox_event::Model> for DeliveryStatusView {
    fn from(row: archived_outbox_event::Model) -> Self {
        Self {
            id: row.id,
            event_type: row.event_type,
            stream_id: row.stream_id,
            sequence: row.sequence,
            status: row.status,
            target_domains: row.target_domains,
            delivered_domains: row.delivered_domains,
            rejected_domains: row.rejected_domains,
            attempt_count: row.attempt_count,
            max_attempts: row.max_attempts,
            next_retry_at: None,
            last_error: row.last_error,
            partition_month: row.partition_month,
            created_at: row.created_at,
            completed_at: row.completed_at,
            archived: true,
        }
    }
}

/// Live rows per status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BacklogEntry {
    pub status: DeliveryStatus,
    pub count: u64,
}

/// Enqueue side of the outbox.
#[derive(Clone)]
pub struct OutboxService {
    outbox: Arc<dyn OutboxStore>,
    archive: Arc<dyn ArchiveStore>,
    sequences: SequenceService,
    resolver: Arc<dyn TargetResolver>,
    id_gen: IdGenerator,
    local_domain: String,
    default_max_attempts: u32,
}

impl OutboxService {
    #[must_use]
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        archive: Arc<dyn ArchiveStore>,
        sequences: SequenceService,
        resolver: Arc<dyn TargetResolver>,
        local_domain: &str,
        default_max_attempts: u32,
    ) -> Self {
        Self {
            outbox,
            archive,
            sequences,
            resolver,
            id_gen: IdGenerator::new(),
            local_domain: DomainSet::normalize(local_domain),
            default_max_attempts,
        }
    }

    /// Sequence and store a new event.
    ///
    /// The target set is fixed here and never recomputed.
    pub async fn produce_event(&self, input: ProduceEventInput) -> AppResult<outbox_event::Model> {
        input.validate()?;

        let mut targets = match input.target_domains {
            Some(domains) => domains.iter().collect::<DomainSet>(),
            None => self.resolver.resolve_targets(&input.stream_id).await?,
        };
        targets.remove(&self.local_domain);

        let max_attempts = input.max_attempts.unwrap_or(self.default_max_attempts);
        let progress = DeliveryProgress::new(targets, max_attempts)?;

        let sequence = i64::try_from(self.sequences.next_sequence(&input.stream_id).await?)
            .map_err(|_| AppError::InvariantViolation("sequence overflow".to_string()))?;

        let now = Utc::now().fixed_offset();
        let status = progress.status();
        let row = outbox_event::Model {
            id: self.id_gen.generate(),
            event_type: input.event_type,
            stream_id: input.stream_id,
            sequence,
            payload: input.payload,
            target_domains: progress.targets().clone(),
            delivered_domains: DomainSet::new(),
            rejected_domains: DomainSet::new(),
            attempt_count: 0,
            max_attempts: i32::try_from(max_attempts).unwrap_or(i32::MAX),
            status,
            next_retry_at: now,
            lease_owner: None,
            lease_expires_at: None,
            last_error: None,
            partition_month: PartitionMonth::of(&now).to_string(),
            created_at: now,
            updated_at: None,
            completed_at: status.is_terminal().then_some(now),
        };

        let row = self.outbox.insert(row).await?;
        get_metrics().record_produced();
        info!(
            id = %row.id,
            stream = %row.stream_id,
            sequence = row.sequence,
            targets = row.target_domains.len(),
            "Produced outbox event"
        );

        Ok(row)
    }

    /// Delivery state of an event, looking in the archive once the live row
    /// has moved.
    pub async fn get_delivery_status(&self, id: &str) -> AppResult<DeliveryStatusView> {
        if let Some(row) = self.outbox.find_by_id(id).await? {
            return Ok(row.into());
        }
        self.archive
            .find_archived_outbox(id)
            .await?
            .map(Into::into)
            .ok_or_else(|| AppError::NotFound(format!("outbox event {id}")))
    }

    /// Live rows, optionally filtered by status.
    pub async fn list(
        &self,
        status: Option<DeliveryStatus>,
        limit: u64,
    ) -> AppResult<Vec<DeliveryStatusView>> {
        Ok(self
            .outbox
            .list_by_status(status, limit.clamp(1, 1000))
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    /// Live row counts per status.
    pub async fn backlog(&self) -> AppResult<Vec<BacklogEntry>> {
        let mut counts = self.outbox.count_by_status().await?;
        counts.sort_by_key(|(status, _)| status.as_str());
        Ok(counts
            .into_iter()
            .map(|(status, count)| BacklogEntry { status, count })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use courier_db::memory::MemoryStore;

    fn service(store: &Arc<MemoryStore>, resolver: Arc<dyn TargetResolver>) -> OutboxService {
        OutboxService::new(
            store.clone(),
            store.clone(),
            SequenceService::new(store.clone()),
            resolver,
            "local.example",
            8,
        )
    }

    fn input(targets: Option<&[&str]>) -> ProduceEventInput {
        ProduceEventInput {
            stream_id: "actor:42".to_string(),
            event_type: "note.created".to_string(),
            payload: b"{}".to_vec(),
            target_domains: targets.map(|t| t.iter().map(ToString::to_string).collect()),
            max_attempts: None,
        }
    }

    #[tokio::test]
    async fn test_produce_sequences_per_stream() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store, Arc::new(StaticTargetResolver::new()));

        let first = service
            .produce_event(input(Some(&["b.example", "c.example"])))
            .await
            .unwrap();
        let second = service.produce_event(input(Some(&["b.example"]))).await.unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(first.status, DeliveryStatus::Pending);
        assert_eq!(first.attempt_count, 0);
        assert_eq!(first.target_domains.len(), 2);
        assert_eq!(first.partition_month.len(), 7);
    }

    #[tokio::test]
    async fn test_targets_resolved_when_not_given() {
        let store = Arc::new(MemoryStore::new());
        let resolver = Arc::new(StaticTargetResolver::new());
        resolver.subscribe("actor:42", "B.example").await;
        resolver.subscribe("actor:42", "local.example").await;
        let service = service(&store, resolver.clone());

        let row = service.produce_event(input(None)).await.unwrap();
        assert_eq!(row.target_domains.iter().collect::<Vec<_>>(), vec!["b.example"]);

        // Later subscriptions do not touch existing rows
        resolver.subscribe("actor:42", "c.example").await;
        let view = service.get_delivery_status(&row.id).await.unwrap();
        assert_eq!(view.target_domains.len(), 1);
    }

    #[tokio::test]
    async fn test_no_targets_is_immediately_delivered() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store, Arc::new(StaticTargetResolver::new()));

        let row = service.produce_event(input(None)).await.unwrap();
        assert_eq!(row.status, DeliveryStatus::Delivered);
        assert!(row.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_invalid_target_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store, Arc::new(StaticTargetResolver::new()));

        let err = service
            .produce_event(input(Some(&["https://b.example/inbox"])))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_status_of_unknown_event() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store, Arc::new(StaticTargetResolver::new()));

        assert!(matches!(
            service.get_delivery_status("missing").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_backlog_counts() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store, Arc::new(StaticTargetResolver::new()));
        service.produce_event(input(Some(&["b.example"]))).await.unwrap();
        service.produce_event(input(Some(&["b.example"]))).await.unwrap();
        service.produce_event(input(None)).await.unwrap();

        let backlog = service.backlog().await.unwrap();
        assert!(backlog.contains(&BacklogEntry {
            status: DeliveryStatus::Pending,
            count: 2
        }));
        assert!(backlog.contains(&BacklogEntry {
            status: DeliveryStatus::Delivered,
            count: 1
        }));
    }
}
