//! Storage traits shared by the `PostgreSQL` repositories and the in-memory
//! backend.
//!
//! Every method is a single atomic operation against the backing store;
//! services compose them but never need a transaction of their own.

use async_trait::async_trait;
use courier_common::{AppResult, PartitionMonth};
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::Serialize;

use crate::entities::{
    DeliveryStatus, archived_inbound_event, archived_outbox_event, inbound_event, outbox_event,
    peer_health, stream_position,
};

/// Result of inserting an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The event was new and is now stored.
    Inserted(inbound_event::Model),
    /// An event with the same ID was already stored (live or archived).
    Duplicate(inbound_event::Model),
}

impl InsertOutcome {
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }

    /// The stored event, whichever way the insert went.
    #[must_use]
    pub fn into_event(self) -> inbound_event::Model {
        match self {
            Self::Inserted(event) | Self::Duplicate(event) => event,
        }
    }
}

/// Parameters of one lease scan.
#[derive(Debug, Clone)]
pub struct LeaseRequest {
    /// Token written into `lease_owner`.
    pub owner: String,
    /// Scan time. Rows with `next_retry_at <= now` or an expired lease are due.
    pub now: DateTimeWithTimeZone,
    /// Lease expiry written into `lease_expires_at`.
    pub lease_until: DateTimeWithTimeZone,
    pub limit: u64,
}

/// Bookkeeping written at the end of a delivery cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleUpdate {
    pub status: DeliveryStatus,
    pub attempt_count: i32,
    pub next_retry_at: DateTimeWithTimeZone,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTimeWithTimeZone>,
}

/// Row counts of one archive month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionInfo {
    pub month: PartitionMonth,
    pub outbox_rows: u64,
    pub inbound_rows: u64,
}

/// Per-stream monotonic sequence issuance.
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Issue the next sequence for a stream. The first issuance is 1.
    async fn next_sequence(&self, stream_id: &str) -> AppResult<i64>;

    /// Last sequence issued for a stream, if any.
    async fn last_issued(&self, stream_id: &str) -> AppResult<Option<i64>>;
}

/// Durable, de-duplicated storage of received events.
#[async_trait]
pub trait InboundEventStore: Send + Sync {
    /// Store an event unless its ID is already known.
    async fn insert_if_absent(&self, event: inbound_event::Model) -> AppResult<InsertOutcome>;

    async fn find_by_id(&self, event_id: &str) -> AppResult<Option<inbound_event::Model>>;

    /// Live events of a stream with `sequence > after`, ascending.
    async fn list_after(
        &self,
        origin_domain: &str,
        stream_id: &str,
        after: i64,
        limit: u64,
    ) -> AppResult<Vec<inbound_event::Model>>;
}

/// Consumer positions for remote streams.
#[async_trait]
pub trait StreamPositionStore: Send + Sync {
    /// Move the position forward to `sequence`. Never moves backwards.
    /// Returns the stored position afterwards.
    async fn advance(&self, origin_domain: &str, stream_id: &str, sequence: i64) -> AppResult<i64>;

    async fn find(
        &self,
        origin_domain: &str,
        stream_id: &str,
    ) -> AppResult<Option<stream_position::Model>>;
}

/// Durable outbox rows and their leases.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn insert(&self, row: outbox_event::Model) -> AppResult<outbox_event::Model>;

    async fn find_by_id(&self, id: &str) -> AppResult<Option<outbox_event::Model>>;

    /// Lease up to `limit` due rows. Two concurrent scans never return the
    /// same row.
    async fn lease_due(&self, request: &LeaseRequest) -> AppResult<Vec<outbox_event::Model>>;

    /// Add `domain` to the delivered set while the lease is held.
    ///
    /// Returns `false` when the lease was lost, the domain is not a target,
    /// or it was already delivered.
    async fn mark_delivered(&self, id: &str, owner: &str, domain: &str) -> AppResult<bool>;

    /// Drop `domain` from the target set and record it as rejected.
    async fn reject_target(&self, id: &str, owner: &str, domain: &str) -> AppResult<bool>;

    /// Write the cycle result and release the lease.
    ///
    /// Returns `None` when the lease is no longer held by `owner`.
    async fn finish_cycle(
        &self,
        id: &str,
        owner: &str,
        update: &CycleUpdate,
    ) -> AppResult<Option<outbox_event::Model>>;

    async fn list_by_status(
        &self,
        status: Option<DeliveryStatus>,
        limit: u64,
    ) -> AppResult<Vec<outbox_event::Model>>;

    /// Number of live rows per status.
    async fn count_by_status(&self) -> AppResult<Vec<(DeliveryStatus, u64)>>;
}

/// Month-partitioned cold storage.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Move delivered rows, and failed rows completed at or before
    /// `failed_before`, into the archive. Returns the moved IDs.
    async fn archive_outbox(
        &self,
        failed_before: DateTimeWithTimeZone,
        limit: u64,
    ) -> AppResult<Vec<String>>;

    /// Move consumed inbound events received at or before
    /// `received_before` into the archive. Returns the moved IDs.
    async fn archive_inbound(
        &self,
        received_before: DateTimeWithTimeZone,
        limit: u64,
    ) -> AppResult<Vec<String>>;

    async fn find_archived_outbox(
        &self,
        id: &str,
    ) -> AppResult<Option<archived_outbox_event::Model>>;

    /// Archived events of a stream with `sequence > after`, ascending.
    async fn replay_inbound(
        &self,
        origin_domain: &str,
        stream_id: &str,
        after: i64,
        limit: u64,
    ) -> AppResult<Vec<archived_inbound_event::Model>>;

    /// Archive months that hold rows, oldest first.
    async fn list_partitions(&self) -> AppResult<Vec<PartitionInfo>>;

    /// Drop every archive month strictly before `month`.
    async fn drop_partitions_before(&self, month: PartitionMonth)
    -> AppResult<Vec<PartitionMonth>>;
}

/// Failure streaks of remote peers.
#[async_trait]
pub trait PeerHealthStore: Send + Sync {
    /// Record a failed attempt. Starts a streak if none is running.
    async fn record_failure(
        &self,
        domain: &str,
        error: &str,
        at: DateTimeWithTimeZone,
    ) -> AppResult<peer_health::Model>;

    /// Record a successful attempt, ending any streak.
    async fn record_success(&self, domain: &str, at: DateTimeWithTimeZone) -> AppResult<()>;

    async fn find(&self, domain: &str) -> AppResult<Option<peer_health::Model>>;

    /// Peers with a running failure streak, longest first.
    async fn list_unreachable(&self, limit: u64) -> AppResult<Vec<peer_health::Model>>;
}
