//! End-to-end delivery scenarios against the in-memory store.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use courier_core::{
    DeliveryOutcome, DeliveryRequest, DeliveryTransport, OutboxService, PeerHealthService,
    ProduceEventInput, SequenceService, StaticTargetResolver,
};
use courier_db::entities::{DeliveryStatus, outbox_event};
use courier_db::memory::MemoryStore;
use courier_db::store::OutboxStore;
use courier_queue::{Dispatcher, DispatcherConfig, RetryConfig};

/// Replays queued outcomes per domain, then falls back to a fixed one.
#[derive(Default)]
struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<DeliveryOutcome>>>,
    fallback: Mutex<HashMap<String, DeliveryOutcome>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedTransport {
    fn script(&self, domain: &str, outcomes: impl IntoIterator<Item = DeliveryOutcome>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(domain.to_string(), outcomes.into_iter().collect());
    }

    fn always(&self, domain: &str, outcome: DeliveryOutcome) {
        self.fallback
            .lock()
            .unwrap()
            .insert(domain.to_string(), outcome);
    }

    fn calls(&self, domain: &str) -> usize {
        self.calls.lock().unwrap().get(domain).copied().unwrap_or(0)
    }
}

#[async_trait]
impl DeliveryTransport for ScriptedTransport {
    async fn deliver(&self, request: DeliveryRequest<'_>) -> DeliveryOutcome {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(request.domain.to_string())
            .or_default() += 1;

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(request.domain)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| {
            self.fallback
                .lock()
                .unwrap()
                .get(request.domain)
                .cloned()
                .unwrap_or(DeliveryOutcome::Delivered)
        })
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    outbox: OutboxService,
    peers: PeerHealthService,
    transport: Arc<ScriptedTransport>,
    dispatcher: Dispatcher,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let outbox = OutboxService::new(
            store.clone(),
            store.clone(),
            SequenceService::new(store.clone()),
            Arc::new(StaticTargetResolver::new()),
            "local.example",
            8,
        );
        let peers = PeerHealthService::new(store.clone());
        let transport = Arc::new(ScriptedTransport::default());
        let config = DispatcherConfig {
            unreachable_grace: Duration::from_secs(3600),
            retry: RetryConfig {
                jitter_ratio: 0.0,
                ..RetryConfig::default()
            },
            ..DispatcherConfig::default()
        };
        let dispatcher = Dispatcher::new(store.clone(), peers.clone(), transport.clone(), config);

        Self {
            store,
            outbox,
            peers,
            transport,
            dispatcher,
        }
    }

    async fn produce(&self, targets: &[&str], max_attempts: u32) -> String {
        self.outbox
            .produce_event(ProduceEventInput {
                stream_id: "notes".to_string(),
                event_type: "note.created".to_string(),
                payload: br#"{"text":"hi"}"#.to_vec(),
                target_domains: Some(targets.iter().map(ToString::to_string).collect()),
                max_attempts: Some(max_attempts),
            })
            .await
            .unwrap()
            .id
    }

    async fn row(&self, id: &str) -> outbox_event::Model {
        OutboxStore::find_by_id(self.store.as_ref(), id)
            .await
            .unwrap()
            .unwrap()
    }

    /// Run cycles, each one just after the row becomes due, until it is
    /// terminal or `limit` cycles ran.
    async fn drive(&self, id: &str, limit: usize) -> outbox_event::Model {
        let mut clock = Utc::now() + chrono::Duration::seconds(1);
        for _ in 0..limit {
            self.dispatcher.run_cycle("worker-a", clock).await.unwrap();
            let row = self.row(id).await;
            if row.status.is_terminal() {
                return row;
            }
            clock = row.next_retry_at.with_timezone(&Utc) + chrono::Duration::seconds(1);
        }
        self.row(id).await
    }
}

fn transient(reason: &str) -> DeliveryOutcome {
    DeliveryOutcome::Transient(reason.to_string())
}

#[tokio::test]
async fn test_recovering_target_is_eventually_delivered() {
    let h = Harness::new();
    h.transport.script(
        "c.example",
        [transient("503"), transient("503"), transient("connection reset")],
    );
    let id = h.produce(&["b.example", "c.example"], 8).await;

    let row = h.drive(&id, 10).await;

    assert_eq!(row.status, DeliveryStatus::Delivered);
    assert!(row.attempt_count <= 4);
    assert!(row.delivered_domains.contains("b.example"));
    assert!(row.delivered_domains.contains("c.example"));
    assert!(row.completed_at.is_some());
    // Delivered targets are never retried
    assert_eq!(h.transport.calls("b.example"), 1);
    assert_eq!(h.transport.calls("c.example"), 4);
}

#[tokio::test]
async fn test_partial_progress_is_visible_between_cycles() {
    let h = Harness::new();
    h.transport.always("c.example", transient("503"));
    let id = h.produce(&["b.example", "c.example"], 8).await;

    let now = Utc::now() + chrono::Duration::seconds(1);
    h.dispatcher.run_cycle("worker-a", now).await.unwrap();

    let row = h.row(&id).await;
    assert_eq!(row.status, DeliveryStatus::PartiallyFailed);
    assert_eq!(row.attempt_count, 1);
    assert_eq!(row.last_error.as_deref(), Some("c.example: 503"));
    assert!(row.next_retry_at > now.fixed_offset());
    assert!(row.lease_owner.is_none());

    // Not due again yet
    let stats = h.dispatcher.run_cycle("worker-a", now).await.unwrap();
    assert_eq!(stats.leased, 0);
}

#[tokio::test]
async fn test_unreachable_peer_is_skipped_without_attempt() {
    let h = Harness::new();
    let now = Utc::now() + chrono::Duration::seconds(1);
    h.peers
        .record_failure("x.example", "connection refused", now - chrono::Duration::hours(2))
        .await
        .unwrap();
    h.peers
        .record_failure("x.example", "connection refused", now - chrono::Duration::minutes(10))
        .await
        .unwrap();
    let id = h.produce(&["x.example"], 8).await;

    h.dispatcher.run_cycle("worker-a", now).await.unwrap();

    let row = h.row(&id).await;
    assert_eq!(h.transport.calls("x.example"), 0);
    assert_eq!(row.status, DeliveryStatus::Pending);
    assert_eq!(row.attempt_count, 0);
    assert!(row.next_retry_at > now.fixed_offset());
}

#[tokio::test]
async fn test_unreachable_peer_that_recovers_receives_its_events() {
    let h = Harness::new();
    let now = Utc::now();
    h.peers
        .record_failure("x.example", "connection refused", now - chrono::Duration::hours(2))
        .await
        .unwrap();
    h.peers
        .record_failure("x.example", "connection refused", now - chrono::Duration::minutes(30))
        .await
        .unwrap();
    let id = h.produce(&["x.example"], 8).await;

    let row = h.drive(&id, 200).await;

    assert_eq!(row.status, DeliveryStatus::Delivered);
    assert_eq!(row.attempt_count, 0);
    assert_eq!(h.transport.calls("x.example"), 1);
    let peer = h.peers.find("x.example").await.unwrap().unwrap();
    assert!(peer.unreachable_since.is_none());
}

#[tokio::test]
async fn test_peer_that_stays_down_eventually_fails_the_event() {
    let h = Harness::new();
    h.transport.always("x.example", transient("connection refused"));
    h.peers
        .record_failure("x.example", "connection refused", Utc::now() - chrono::Duration::hours(2))
        .await
        .unwrap();
    let id = h.produce(&["x.example"], 3).await;

    let row = h.drive(&id, 500).await;

    assert_eq!(row.status, DeliveryStatus::Failed);
    assert_eq!(row.attempt_count, 3);
    // One trial per grace window, never one per cycle
    assert_eq!(h.transport.calls("x.example"), 3);
}

#[tokio::test]
async fn test_recently_failing_peer_is_still_attempted() {
    let h = Harness::new();
    let now = Utc::now() + chrono::Duration::seconds(1);
    h.peers
        .record_failure("x.example", "connection refused", now - chrono::Duration::minutes(5))
        .await
        .unwrap();
    let id = h.produce(&["x.example"], 8).await;

    h.dispatcher.run_cycle("worker-a", now).await.unwrap();

    assert_eq!(h.transport.calls("x.example"), 1);
    assert_eq!(h.row(&id).await.status, DeliveryStatus::Delivered);
    // Success clears the streak
    let peer = h.peers.find("x.example").await.unwrap().unwrap();
    assert!(peer.unreachable_since.is_none());
    assert_eq!(peer.consecutive_failure_count, 0);
}

#[tokio::test]
async fn test_exhausted_event_keeps_partial_delivery() {
    let h = Harness::new();
    h.transport.always("b.example", transient("timeout"));
    let id = h.produce(&["a.example", "b.example"], 3).await;

    let row = h.drive(&id, 10).await;

    assert_eq!(row.status, DeliveryStatus::Failed);
    assert_eq!(row.attempt_count, 3);
    assert!(row.delivered_domains.contains("a.example"));
    assert!(!row.delivered_domains.contains("b.example"));
    assert_eq!(h.transport.calls("a.example"), 1);
    assert_eq!(h.transport.calls("b.example"), 3);

    // Failed rows are never leased again
    let later = Utc::now() + chrono::Duration::days(30);
    let stats = h.dispatcher.run_cycle("worker-a", later).await.unwrap();
    assert_eq!(stats.leased, 0);
}

#[tokio::test]
async fn test_rejection_drops_target() {
    let h = Harness::new();
    h.transport
        .always("gone.example", DeliveryOutcome::Rejected("410 Gone".to_string()));
    let id = h.produce(&["b.example", "gone.example"], 8).await;

    let row = h.drive(&id, 3).await;

    assert_eq!(row.status, DeliveryStatus::Delivered);
    assert_eq!(row.attempt_count, 0);
    assert!(!row.target_domains.contains("gone.example"));
    assert!(row.rejected_domains.contains("gone.example"));
    assert_eq!(h.transport.calls("gone.example"), 1);
}

#[tokio::test]
async fn test_local_domain_is_never_targeted() {
    let h = Harness::new();
    let id = h.produce(&["local.example"], 8).await;

    let row = h.row(&id).await;
    assert_eq!(row.status, DeliveryStatus::Delivered);
    assert!(row.target_domains.is_empty());

    let stats = h
        .dispatcher
        .run_cycle("worker-a", Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(stats.leased, 0);
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed_by_another_worker() {
    let h = Harness::new();
    let id = h.produce(&["b.example"], 8).await;
    let now = Utc::now() + chrono::Duration::seconds(1);

    // A worker leases the row and dies
    let leased = h
        .store
        .lease_due(&courier_db::store::LeaseRequest {
            owner: "worker-dead".to_string(),
            now: now.fixed_offset(),
            lease_until: (now + chrono::Duration::minutes(5)).fixed_offset(),
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(leased.len(), 1);

    let stats = h.dispatcher.run_cycle("worker-b", now).await.unwrap();
    assert_eq!(stats.leased, 0);

    let after_expiry = now + chrono::Duration::minutes(6);
    let stats = h.dispatcher.run_cycle("worker-b", after_expiry).await.unwrap();
    assert_eq!(stats.delivered, 1);
    assert_eq!(h.row(&id).await.status, DeliveryStatus::Delivered);

    // The dead worker's late writes are refused
    assert!(!h.store.mark_delivered(&id, "worker-dead", "b.example").await.unwrap());
}

