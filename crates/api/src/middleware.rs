//! Shared handler state.

#![allow(missing_docs)]

use std::sync::Arc;

use courier_common::config::Config;
use courier_core::{
    ArchiveService, IngestHooks, IngestService, OutboxService, PeerHealthService, SequenceService,
    StaticTargetResolver, StreamPositionService,
};
use courier_db::Stores;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub outbox_service: OutboxService,
    pub ingest_service: IngestService,
    pub position_service: StreamPositionService,
    pub peer_health_service: PeerHealthService,
    pub archive_service: ArchiveService,
    pub subscriptions: Arc<StaticTargetResolver>,
}

impl AppState {
    /// Build every service over one set of stores.
    #[must_use]
    pub fn new(stores: &Stores, config: &Config, hooks: IngestHooks) -> Self {
        let subscriptions = Arc::new(StaticTargetResolver::new());
        let outbox_service = OutboxService::new(
            Arc::clone(&stores.outbox),
            Arc::clone(&stores.archive),
            SequenceService::new(Arc::clone(&stores.sequences)),
            subscriptions.clone(),
            &config.federation.local_domain,
            config.delivery.max_attempts,
        );

        Self {
            outbox_service,
            ingest_service: IngestService::new(
                Arc::clone(&stores.inbound),
                Arc::clone(&stores.positions),
                hooks,
            ),
            position_service: StreamPositionService::new(Arc::clone(&stores.positions)),
            peer_health_service: PeerHealthService::new(Arc::clone(&stores.peers)),
            archive_service: ArchiveService::new(Arc::clone(&stores.archive), config.archive.clone()),
            subscriptions,
        }
    }
}
