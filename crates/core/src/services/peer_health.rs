//! Peer health bookkeeping.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use courier_common::AppResult;
use courier_db::entities::{DomainSet, peer_health};
use courier_db::store::PeerHealthStore;
use tracing::{info, warn};

/// Tracks failure streaks of remote peers.
///
/// Only the dispatcher writes here. Ingestion never consults it.
#[derive(Clone)]
pub struct PeerHealthService {
    store: Arc<dyn PeerHealthStore>,
}

impl PeerHealthService {
    #[must_use]
    pub fn new(store: Arc<dyn PeerHealthStore>) -> Self {
        Self { store }
    }

    pub async fn record_failure(
        &self,
        domain: &str,
        error: &str,
        at: DateTime<Utc>,
    ) -> AppResult<peer_health::Model> {
        let peer = self
            .store
            .record_failure(&DomainSet::normalize(domain), error, at.fixed_offset())
            .await?;
        if peer.consecutive_failure_count == 1 {
            warn!(domain = %peer.domain, error = %error, "Peer started failing");
        }
        Ok(peer)
    }

    pub async fn record_success(&self, domain: &str, at: DateTime<Utc>) -> AppResult<()> {
        let domain = DomainSet::normalize(domain);
        let recovered = self
            .store
            .find(&domain)
            .await?
            .is_some_and(|p| p.unreachable_since.is_some());
        self.store.record_success(&domain, at.fixed_offset()).await?;
        if recovered {
            info!(domain = %domain, "Peer recovered");
        }
        Ok(())
    }

    /// Whether the peer has been failing for longer than `grace`.
    pub async fn is_unreachable(
        &self,
        domain: &str,
        grace: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        Ok(self
            .find(domain)
            .await?
            .is_some_and(|peer| unreachable_past_grace(&peer, grace, now)))
    }

    /// Whether a delivery to the peer should be skipped this cycle.
    ///
    /// An unreachable peer is still tried once per `grace` window after its
    /// last failure. That trial's success clears the streak and its failure
    /// pushes the next trial out by another window.
    pub async fn should_skip(
        &self,
        domain: &str,
        grace: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        Ok(self
            .find(domain)
            .await?
            .is_some_and(|peer| unreachable_past_grace(&peer, grace, now) && !trial_due(&peer, grace, now)))
    }

    pub async fn find(&self, domain: &str) -> AppResult<Option<peer_health::Model>> {
        self.store.find(&DomainSet::normalize(domain)).await
    }

    pub async fn list_unreachable(&self, limit: u64) -> AppResult<Vec<peer_health::Model>> {
        self.store.list_unreachable(limit.clamp(1, 1000)).await
    }
}

/// `unreachable_since <= now - grace`.
#[must_use]
pub fn unreachable_past_grace(peer: &peer_health::Model, grace: Duration, now: DateTime<Utc>) -> bool {
    peer.unreachable_since
        .is_some_and(|since| since.with_timezone(&Utc) <= now - grace)
}

/// `last_failure_at <= now - grace`, or no failure time recorded.
#[must_use]
pub fn trial_due(peer: &peer_health::Model, grace: Duration, now: DateTime<Utc>) -> bool {
    peer.last_failure_at
        .is_none_or(|at| at.with_timezone(&Utc) <= now - grace)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use courier_db::memory::MemoryStore;

    #[tokio::test]
    async fn test_unreachable_only_after_grace() {
        let service = PeerHealthService::new(Arc::new(MemoryStore::new()));
        let t0 = Utc::now();
        let grace = Duration::hours(1);

        service.record_failure("x.example", "refused", t0).await.unwrap();
        service
            .record_failure("x.example", "refused", t0 + Duration::minutes(30))
            .await
            .unwrap();

        assert!(!service.is_unreachable("x.example", grace, t0 + Duration::minutes(59)).await.unwrap());
        assert!(service.is_unreachable("X.example", grace, t0 + Duration::hours(1)).await.unwrap());

        let peer = service.find("x.example").await.unwrap().unwrap();
        assert_eq!(peer.consecutive_failure_count, 2);
    }

    #[tokio::test]
    async fn test_success_clears_streak() {
        let service = PeerHealthService::new(Arc::new(MemoryStore::new()));
        let t0 = Utc::now();

        service.record_failure("x.example", "refused", t0).await.unwrap();
        service.record_success("x.example", t0 + Duration::minutes(1)).await.unwrap();

        let peer = service.find("x.example").await.unwrap().unwrap();
        assert!(peer.unreachable_since.is_none());
        assert_eq!(peer.consecutive_failure_count, 0);
        assert!(service.list_unreachable(10).await.unwrap().is_empty());
        assert!(!service.is_unreachable("x.example", Duration::zero(), t0 + Duration::days(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_peer_gets_one_trial_per_grace_window() {
        let service = PeerHealthService::new(Arc::new(MemoryStore::new()));
        let t0 = Utc::now();
        let grace = Duration::hours(1);

        service.record_failure("x.example", "refused", t0).await.unwrap();
        service
            .record_failure("x.example", "refused", t0 + Duration::minutes(50))
            .await
            .unwrap();

        // Unreachable, and the last failure is recent
        assert!(service.should_skip("x.example", grace, t0 + Duration::minutes(70)).await.unwrap());
        // A full window since the last failure lets one attempt through
        assert!(!service.should_skip("x.example", grace, t0 + Duration::minutes(110)).await.unwrap());
        assert!(service.is_unreachable("x.example", grace, t0 + Duration::minutes(110)).await.unwrap());

        // A failed trial re-arms the skip
        service
            .record_failure("x.example", "refused", t0 + Duration::minutes(110))
            .await
            .unwrap();
        assert!(service.should_skip("x.example", grace, t0 + Duration::minutes(111)).await.unwrap());
    }

    #[tokio::test]
    async fn test_recently_failing_peer_is_not_skipped() {
        let service = PeerHealthService::new(Arc::new(MemoryStore::new()));
        let t0 = Utc::now();
        service.record_failure("x.example", "refused", t0).await.unwrap();
        assert!(!service.should_skip("x.example", Duration::hours(1), t0 + Duration::minutes(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_peer_is_reachable() {
        let service = PeerHealthService::new(Arc::new(MemoryStore::new()));
        assert!(!service.is_unreachable("new.example", Duration::zero(), Utc::now()).await.unwrap());
    }
}
