//! Storage layer for courier.
//!
//! Two interchangeable backends implement the [`store`] traits:
//! `PostgreSQL` via the [`repositories`] and the in-process [`memory`] store.

pub mod entities;
pub mod memory;
pub mod migrations;
pub mod repositories;
pub mod store;
pub mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use courier_common::{AppError, AppResult, Config};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tracing::info;
use tracing::log::LevelFilter;

use memory::MemoryStore;
use repositories::{
    ArchiveRepository, InboundEventRepository, OutboxRepository, PeerHealthRepository,
    StreamCounterRepository, StreamPositionRepository,
};
use store::{
    ArchiveStore, InboundEventStore, OutboxStore, PeerHealthStore, SequenceStore,
    StreamPositionStore,
};

/// Initialize database connection.
pub async fn init(config: &Config) -> Result<DatabaseConnection, AppError> {
    let mut opt = ConnectOptions::new(&config.database.url);

    opt.max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(LevelFilter::Debug);

    Database::connect(opt)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}

/// Run pending migrations.
pub async fn migrate(db: &DatabaseConnection) -> Result<(), AppError> {
    use sea_orm_migration::MigratorTrait;
    migrations::Migrator::up(db, None)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}

/// Handles to every store, backed by one backend.
#[derive(Clone)]
pub struct Stores {
    pub sequences: Arc<dyn SequenceStore>,
    pub inbound: Arc<dyn InboundEventStore>,
    pub positions: Arc<dyn StreamPositionStore>,
    pub outbox: Arc<dyn OutboxStore>,
    pub archive: Arc<dyn ArchiveStore>,
    pub peers: Arc<dyn PeerHealthStore>,
}

impl Stores {
    /// Stores backed by a fresh in-process [`MemoryStore`].
    #[must_use]
    pub fn memory() -> Self {
        Self::from_memory(Arc::new(MemoryStore::new()))
    }

    /// Stores sharing an existing [`MemoryStore`].
    #[must_use]
    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            sequences: store.clone(),
            inbound: store.clone(),
            positions: store.clone(),
            outbox: store.clone(),
            archive: store.clone(),
            peers: store,
        }
    }

    /// Stores backed by `PostgreSQL`.
    #[must_use]
    pub fn postgres(db: Arc<DatabaseConnection>) -> Self {
        Self {
            sequences: Arc::new(StreamCounterRepository::new(Arc::clone(&db))),
            inbound: Arc::new(InboundEventRepository::new(Arc::clone(&db))),
            positions: Arc::new(StreamPositionRepository::new(Arc::clone(&db))),
            outbox: Arc::new(OutboxRepository::new(Arc::clone(&db))),
            archive: Arc::new(ArchiveRepository::new(Arc::clone(&db))),
            peers: Arc::new(PeerHealthRepository::new(db)),
        }
    }

    /// Open the backend named by `database.url`, running migrations for
    /// `PostgreSQL`.
    pub async fn connect(config: &Config) -> AppResult<Self> {
        if config.database.is_memory() {
            info!("Using in-memory storage, nothing will survive a restart");
            return Ok(Self::memory());
        }

        let db = init(config).await?;
        info!("Connected to database");

        migrate(&db).await?;
        info!("Database migrations completed");

        Ok(Self::postgres(Arc::new(db)))
    }
}
