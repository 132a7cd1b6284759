//! Peer health repository.

use std::sync::Arc;

use async_trait::async_trait;
use courier_common::{AppError, AppResult};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Statement,
};

use crate::entities::{PeerHealth, peer_health};
use crate::store::PeerHealthStore;

/// Failure streaks in the `peer_health` table.
#[derive(Clone)]
pub struct PeerHealthRepository {
    db: Arc<DatabaseConnection>,
}

impl PeerHealthRepository {
    /// Create a new peer health repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PeerHealthStore for PeerHealthRepository {
    async fn record_failure(
        &self,
        domain: &str,
        error: &str,
        at: DateTimeWithTimeZone,
    ) -> AppResult<peer_health::Model> {
        // COALESCE keeps the start of a running streak
        PeerHealth::find()
            .from_raw_sql(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r"
                INSERT INTO peer_health (
                    domain, unreachable_since, consecutive_failure_count,
                    last_error, last_failure_at, created_at, updated_at
                )
                VALUES ($1, $3, 1, $2, $3, $3, $3)
                ON CONFLICT (domain) DO UPDATE
                SET unreachable_since = COALESCE(peer_health.unreachable_since, EXCLUDED.unreachable_since),
                    consecutive_failure_count = peer_health.consecutive_failure_count + 1,
                    last_error = EXCLUDED.last_error,
                    last_failure_at = EXCLUDED.last_failure_at,
                    updated_at = EXCLUDED.updated_at
                RETURNING *
                ",
                [domain.into(), error.into(), at.into()],
            ))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::Database(format!("peer health upsert returned no row: {domain}")))
    }

    async fn record_success(&self, domain: &str, at: DateTimeWithTimeZone) -> AppResult<()> {
        self.db
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r"
                INSERT INTO peer_health (
                    domain, unreachable_since, consecutive_failure_count,
                    last_success_at, created_at, updated_at
                )
                VALUES ($1, NULL, 0, $2, $2, $2)
                ON CONFLICT (domain) DO UPDATE
                SET unreachable_since = NULL,
                    consecutive_failure_count = 0,
                    last_success_at = EXCLUDED.last_success_at,
                    updated_at = EXCLUDED.updated_at
                ",
                [domain.into(), at.into()],
            ))
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    async fn find(&self, domain: &str) -> AppResult<Option<peer_health::Model>> {
        PeerHealth::find_by_id(domain)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn list_unreachable(&self, limit: u64) -> AppResult<Vec<peer_health::Model>> {
        PeerHealth::find()
            .filter(peer_health::Column::UnreachableSince.is_not_null())
            .order_by_asc(peer_health::Column::UnreachableSince)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
