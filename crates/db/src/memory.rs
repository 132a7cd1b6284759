//! In-process storage backend.
//!
//! Implements every store trait on top of in-memory maps. Used for
//! `memory://` deployments and throughout the test suites. Nothing survives
//! a restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use courier_common::{AppError, AppResult, PartitionMonth};
use sea_orm::prelude::DateTimeWithTimeZone;
use tokio::sync::{Mutex, RwLock};

use crate::entities::{
    DeliveryStatus, archived_inbound_event, archived_outbox_event, inbound_event, outbox_event,
    peer_health, stream_position,
};
use crate::store::{
    ArchiveStore, CycleUpdate, InboundEventStore, InsertOutcome, LeaseRequest, OutboxStore,
    PartitionInfo, PeerHealthStore, SequenceStore, StreamPositionStore,
};

#[derive(Default)]
struct State {
    inbound: HashMap<String, inbound_event::Model>,
    positions: HashMap<(String, String), stream_position::Model>,
    outbox: BTreeMap<String, outbox_event::Model>,
    archived_outbox: BTreeMap<PartitionMonth, BTreeMap<String, archived_outbox_event::Model>>,
    archived_inbound: BTreeMap<PartitionMonth, BTreeMap<String, archived_inbound_event::Model>>,
    peers: HashMap<String, peer_health::Model>,
}

impl State {
    fn find_archived_inbound(&self, event_id: &str) -> Option<&archived_inbound_event::Model> {
        self.archived_inbound
            .values()
            .find_map(|partition| partition.get(event_id))
    }

    fn leased_row(&mut self, id: &str, owner: &str) -> Option<&mut outbox_event::Model> {
        self.outbox.get_mut(id).filter(|row| {
            row.status == DeliveryStatus::InFlight && row.lease_owner.as_deref() == Some(owner)
        })
    }
}

/// In-memory implementation of all store traits.
///
/// Sequence counters are lock-free atomics. Everything else sits behind a
/// single mutex, so each trait method is atomic with respect to the others.
#[derive(Default)]
pub struct MemoryStore {
    counters: RwLock<HashMap<String, Arc<AtomicI64>>>,
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn counter(&self, stream_id: &str) -> Arc<AtomicI64> {
        if let Some(counter) = self.counters.read().await.get(stream_id) {
            return Arc::clone(counter);
        }
        let mut counters = self.counters.write().await;
        Arc::clone(counters.entry(stream_id.to_string()).or_default())
    }
}

fn now() -> DateTimeWithTimeZone {
    Utc::now().fixed_offset()
}

#[async_trait]
impl SequenceStore for MemoryStore {
    async fn next_sequence(&self, stream_id: &str) -> AppResult<i64> {
        let counter = self.counter(stream_id).await;
        Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn last_issued(&self, stream_id: &str) -> AppResult<Option<i64>> {
        Ok(self
            .counters
            .read()
            .await
            .get(stream_id)
            .map(|counter| counter.load(Ordering::SeqCst)))
    }
}

#[async_trait]
impl InboundEventStore for MemoryStore {
    async fn insert_if_absent(&self, event: inbound_event::Model) -> AppResult<InsertOutcome> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.inbound.get(&event.event_id) {
            return Ok(InsertOutcome::Duplicate(existing.clone()));
        }
        if let Some(archived) = state.find_archived_inbound(&event.event_id) {
            return Ok(InsertOutcome::Duplicate(archived.clone().into()));
        }

        state.inbound.insert(event.event_id.clone(), event.clone());
        Ok(InsertOutcome::Inserted(event))
    }

    async fn find_by_id(&self, event_id: &str) -> AppResult<Option<inbound_event::Model>> {
        Ok(self.state.lock().await.inbound.get(event_id).cloned())
    }

    async fn list_after(
        &self,
        origin_domain: &str,
        stream_id: &str,
        after: i64,
        limit: u64,
    ) -> AppResult<Vec<inbound_event::Model>> {
        let state = self.state.lock().await;
        let mut events: Vec<_> = state
            .inbound
            .values()
            .filter(|e| {
                e.origin_domain == origin_domain && e.stream_id == stream_id && e.sequence > after
            })
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            a.sequence
                .cmp(&b.sequence)
                .then_with(|| a.received_at.cmp(&b.received_at))
        });
        events.truncate(limit as usize);
        Ok(events)
    }
}

#[async_trait]
impl StreamPositionStore for MemoryStore {
    async fn advance(&self, origin_domain: &str, stream_id: &str, sequence: i64) -> AppResult<i64> {
        let mut state = self.state.lock().await;
        let position = state
            .positions
            .entry((origin_domain.to_string(), stream_id.to_string()))
            .or_insert_with(|| stream_position::Model {
                origin_domain: origin_domain.to_string(),
                stream_id: stream_id.to_string(),
                last_sequence: sequence,
                updated_at: now(),
            });

        if sequence > position.last_sequence {
            position.last_sequence = sequence;
            position.updated_at = now();
        }
        Ok(position.last_sequence)
    }

    async fn find(
        &self,
        origin_domain: &str,
        stream_id: &str,
    ) -> AppResult<Option<stream_position::Model>> {
        Ok(self
            .state
            .lock()
            .await
            .positions
            .get(&(origin_domain.to_string(), stream_id.to_string()))
            .cloned())
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn insert(&self, row: outbox_event::Model) -> AppResult<outbox_event::Model> {
        let mut state = self.state.lock().await;
        if state.outbox.contains_key(&row.id) {
            return Err(AppError::Conflict(format!("outbox row {} already exists", row.id)));
        }
        state.outbox.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    async fn find_by_id(&self, id: &str) -> AppResult<Option<outbox_event::Model>> {
        Ok(self.state.lock().await.outbox.get(id).cloned())
    }

    async fn lease_due(&self, request: &LeaseRequest) -> AppResult<Vec<outbox_event::Model>> {
        let mut state = self.state.lock().await;

        let mut due: Vec<(DateTimeWithTimeZone, String)> = state
            .outbox
            .values()
            .filter(|row| {
                (row.status.is_leasable() && row.next_retry_at <= request.now)
                    || (row.status == DeliveryStatus::InFlight
                        && row.lease_expires_at.is_some_and(|at| at <= request.now))
            })
            .map(|row| (row.next_retry_at, row.id.clone()))
            .collect();
        due.sort();
        due.truncate(request.limit as usize);

        let mut leased = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(row) = state.outbox.get_mut(&id) {
                row.status = DeliveryStatus::InFlight;
                row.lease_owner = Some(request.owner.clone());
                row.lease_expires_at = Some(request.lease_until);
                row.updated_at = Some(request.now);
                leased.push(row.clone());
            }
        }
        Ok(leased)
    }

    async fn mark_delivered(&self, id: &str, owner: &str, domain: &str) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let Some(row) = state.leased_row(id, owner) else {
            return Ok(false);
        };
        if !row.target_domains.contains(domain) || row.delivered_domains.contains(domain) {
            return Ok(false);
        }
        row.delivered_domains.insert(domain);
        row.updated_at = Some(now());
        Ok(true)
    }

    async fn reject_target(&self, id: &str, owner: &str, domain: &str) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let Some(row) = state.leased_row(id, owner) else {
            return Ok(false);
        };
        if !row.target_domains.contains(domain) || row.delivered_domains.contains(domain) {
            return Ok(false);
        }
        row.target_domains.remove(domain);
        row.rejected_domains.insert(domain);
        row.updated_at = Some(now());
        Ok(true)
    }

    async fn finish_cycle(
        &self,
        id: &str,
        owner: &str,
        update: &CycleUpdate,
    ) -> AppResult<Option<outbox_event::Model>> {
        let mut state = self.state.lock().await;
        let Some(row) = state.leased_row(id, owner) else {
            return Ok(None);
        };
        row.status = update.status;
        row.attempt_count = update.attempt_count;
        row.next_retry_at = update.next_retry_at;
        row.last_error.clone_from(&update.last_error);
        row.completed_at = update.completed_at;
        row.lease_owner = None;
        row.lease_expires_at = None;
        row.updated_at = Some(now());
        Ok(Some(row.clone()))
    }

    async fn list_by_status(
        &self,
        status: Option<DeliveryStatus>,
        limit: u64,
    ) -> AppResult<Vec<outbox_event::Model>> {
        let state = self.state.lock().await;
        Ok(state
            .outbox
            .values()
            .filter(|row| status.is_none_or(|s| row.status == s))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count_by_status(&self) -> AppResult<Vec<(DeliveryStatus, u64)>> {
        let state = self.state.lock().await;
        let mut counts: HashMap<DeliveryStatus, u64> = HashMap::new();
        for row in state.outbox.values() {
            *counts.entry(row.status).or_default() += 1;
        }
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort_by_key(|(status, _)| status.as_str());
        Ok(counts)
    }
}

#[async_trait]
impl ArchiveStore for MemoryStore {
    async fn archive_outbox(
        &self,
        failed_before: DateTimeWithTimeZone,
        limit: u64,
    ) -> AppResult<Vec<String>> {
        let mut state = self.state.lock().await;
        let archived_at = now();

        let candidates: Vec<String> = state
            .outbox
            .values()
            .filter(|row| match row.status {
                DeliveryStatus::Delivered => true,
                DeliveryStatus::Failed => row.completed_at.is_some_and(|at| at <= failed_before),
                _ => false,
            })
            .filter(|row| {
                !state
                    .archived_outbox
                    .values()
                    .any(|partition| partition.contains_key(&row.id))
            })
            .map(|row| row.id.clone())
            .take(limit as usize)
            .collect();

        let mut moved = Vec::with_capacity(candidates.len());
        for id in candidates {
            let Some(row) = state.outbox.remove(&id) else {
                continue;
            };
            let month = row
                .partition_month
                .parse()
                .unwrap_or_else(|_| PartitionMonth::of(&row.created_at));
            state
                .archived_outbox
                .entry(month)
                .or_default()
                .insert(id.clone(), archived_outbox_event::Model::from_live(row, archived_at));
            moved.push(id);
        }
        Ok(moved)
    }

    async fn archive_inbound(
        &self,
        received_before: DateTimeWithTimeZone,
        limit: u64,
    ) -> AppResult<Vec<String>> {
        let mut state = self.state.lock().await;
        let archived_at = now();

        let mut candidates: Vec<(DateTimeWithTimeZone, String)> = state
            .inbound
            .values()
            .filter(|e| e.received_at <= received_before)
            .filter(|e| {
                state
                    .positions
                    .get(&(e.origin_domain.clone(), e.stream_id.clone()))
                    .is_some_and(|p| e.sequence <= p.last_sequence)
            })
            .filter(|e| {
                !state
                    .archived_inbound
                    .values()
                    .any(|partition| partition.contains_key(&e.event_id))
            })
            .map(|e| (e.received_at, e.event_id.clone()))
            .collect();
        candidates.sort();
        candidates.truncate(limit as usize);

        let mut moved = Vec::with_capacity(candidates.len());
        for (_, event_id) in candidates {
            let Some(event) = state.inbound.remove(&event_id) else {
                continue;
            };
            let month = PartitionMonth::of(&event.received_at);
            state.archived_inbound.entry(month).or_default().insert(
                event_id.clone(),
                archived_inbound_event::Model::from_live(event, month.to_string(), archived_at),
            );
            moved.push(event_id);
        }
        Ok(moved)
    }

    async fn find_archived_outbox(
        &self,
        id: &str,
    ) -> AppResult<Option<archived_outbox_event::Model>> {
        let state = self.state.lock().await;
        Ok(state
            .archived_outbox
            .values()
            .find_map(|partition| partition.get(id))
            .cloned())
    }

    async fn replay_inbound(
        &self,
        origin_domain: &str,
        stream_id: &str,
        after: i64,
        limit: u64,
    ) -> AppResult<Vec<archived_inbound_event::Model>> {
        let state = self.state.lock().await;
        let mut events: Vec<_> = state
            .archived_inbound
            .values()
            .flat_map(BTreeMap::values)
            .filter(|e| {
                e.origin_domain == origin_domain && e.stream_id == stream_id && e.sequence > after
            })
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            a.sequence
                .cmp(&b.sequence)
                .then_with(|| a.received_at.cmp(&b.received_at))
        });
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn list_partitions(&self) -> AppResult<Vec<PartitionInfo>> {
        let state = self.state.lock().await;
        let mut partitions: BTreeMap<PartitionMonth, PartitionInfo> = BTreeMap::new();

        for (month, rows) in &state.archived_outbox {
            partitions
                .entry(*month)
                .or_insert(PartitionInfo {
                    month: *month,
                    outbox_rows: 0,
                    inbound_rows: 0,
                })
                .outbox_rows = rows.len() as u64;
        }
        for (month, rows) in &state.archived_inbound {
            partitions
                .entry(*month)
                .or_insert(PartitionInfo {
                    month: *month,
                    outbox_rows: 0,
                    inbound_rows: 0,
                })
                .inbound_rows = rows.len() as u64;
        }
        Ok(partitions.into_values().collect())
    }

    async fn drop_partitions_before(
        &self,
        month: PartitionMonth,
    ) -> AppResult<Vec<PartitionMonth>> {
        let mut state = self.state.lock().await;

        let mut dropped: Vec<PartitionMonth> = state
            .archived_outbox
            .keys()
            .chain(state.archived_inbound.keys())
            .filter(|m| **m < month)
            .copied()
            .collect();
        dropped.sort();
        dropped.dedup();

        state.archived_outbox.retain(|m, _| *m >= month);
        state.archived_inbound.retain(|m, _| *m >= month);
        Ok(dropped)
    }
}

#[async_trait]
impl PeerHealthStore for MemoryStore {
    async fn record_failure(
        &self,
        domain: &str,
        error: &str,
        at: DateTimeWithTimeZone,
    ) -> AppResult<peer_health::Model> {
        let mut state = self.state.lock().await;
        let peer = state
            .peers
            .entry(domain.to_string())
            .or_insert_with(|| peer_health::Model {
                domain: domain.to_string(),
                unreachable_since: None,
                consecutive_failure_count: 0,
                last_error: None,
                last_failure_at: None,
                last_success_at: None,
                created_at: at,
                updated_at: None,
            });

        peer.unreachable_since.get_or_insert(at);
        peer.consecutive_failure_count += 1;
        peer.last_error = Some(error.to_string());
        peer.last_failure_at = Some(at);
        peer.updated_at = Some(at);
        Ok(peer.clone())
    }

    async fn record_success(&self, domain: &str, at: DateTimeWithTimeZone) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let peer = state
            .peers
            .entry(domain.to_string())
            .or_insert_with(|| peer_health::Model {
                domain: domain.to_string(),
                unreachable_since: None,
                consecutive_failure_count: 0,
                last_error: None,
                last_failure_at: None,
                last_success_at: None,
                created_at: at,
                updated_at: None,
            });

        peer.unreachable_since = None;
        peer.consecutive_failure_count = 0;
        peer.last_success_at = Some(at);
        peer.updated_at = Some(at);
        Ok(())
    }

    async fn find(&self, domain: &str) -> AppResult<Option<peer_health::Model>> {
        Ok(self.state.lock().await.peers.get(domain).cloned())
    }

    async fn list_unreachable(&self, limit: u64) -> AppResult<Vec<peer_health::Model>> {
        let state = self.state.lock().await;
        let mut peers: Vec<_> = state
            .peers
            .values()
            .filter(|p| p.unreachable_since.is_some())
            .cloned()
            .collect();
        peers.sort_by(|a, b| {
            a.unreachable_since
                .cmp(&b.unreachable_since)
                .then_with(|| a.domain.cmp(&b.domain))
        });
        peers.truncate(limit as usize);
        Ok(peers)
    }
}
