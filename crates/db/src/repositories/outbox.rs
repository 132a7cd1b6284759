//! Outbox repository.

use std::sync::Arc;

use async_trait::async_trait;
use courier_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    FromQueryResult, QueryFilter, QueryOrder, QuerySelect, Statement,
};
use tracing::warn;

use crate::entities::{DeliveryStatus, OutboxEvent, outbox_event};
use crate::store::{CycleUpdate, LeaseRequest, OutboxStore};

/// Outbox rows in the `outbox_event` table.
#[derive(Clone)]
pub struct OutboxRepository {
    db: Arc<DatabaseConnection>,
}

#[derive(Debug, FromQueryResult)]
struct StatusCount {
    status: String,
    count: i64,
}

impl OutboxRepository {
    /// Create a new outbox repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn execute_guarded(&self, sql: &str, id: &str, owner: &str, domain: &str) -> AppResult<bool> {
        let result = self
            .db
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                sql,
                [id.into(), domain.into(), owner.into()],
            ))
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl OutboxStore for OutboxRepository {
    async fn insert(&self, row: outbox_event::Model) -> AppResult<outbox_event::Model> {
        outbox_event::ActiveModel::from(row)
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn find_by_id(&self, id: &str) -> AppResult<Option<outbox_event::Model>> {
        OutboxEvent::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn lease_due(&self, request: &LeaseRequest) -> AppResult<Vec<outbox_event::Model>> {
        // SKIP LOCKED lets parallel workers scan without blocking each other
        // or leasing the same row twice. Expired leases are reclaimed here.
        OutboxEvent::find()
            .from_raw_sql(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r"
                UPDATE outbox_event
                SET status = 'in_flight',
                    lease_owner = $1,
                    lease_expires_at = $2,
                    updated_at = $3
                WHERE id IN (
                    SELECT id FROM outbox_event
                    WHERE (status IN ('pending', 'partially_failed') AND next_retry_at <= $3)
                       OR (status = 'in_flight' AND lease_expires_at <= $3)
                    ORDER BY next_retry_at, id
                    LIMIT $4
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING *
                ",
                [
                    request.owner.clone().into(),
                    request.lease_until.into(),
                    request.now.into(),
                    (request.limit as i64).into(),
                ],
            ))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn mark_delivered(&self, id: &str, owner: &str, domain: &str) -> AppResult<bool> {
        self.execute_guarded(
            r"
            UPDATE outbox_event
            SET delivered_domains = delivered_domains || jsonb_build_array($2::text),
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
              AND lease_owner = $3
              AND status = 'in_flight'
              AND target_domains ? $2
              AND NOT (delivered_domains ? $2)
            ",
            id,
            owner,
            domain,
        )
        .await
    }

    async fn reject_target(&self, id: &str, owner: &str, domain: &str) -> AppResult<bool> {
        self.execute_guarded(
            r"
            UPDATE outbox_event
            SET target_domains = target_domains - $2::text,
                rejected_domains = CASE
                    WHEN rejected_domains ? $2 THEN rejected_domains
                    ELSE rejected_domains || jsonb_build_array($2::text)
                END,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
              AND lease_owner = $3
              AND status = 'in_flight'
              AND target_domains ? $2
              AND NOT (delivered_domains ? $2)
            ",
            id,
            owner,
            domain,
        )
        .await
    }

    async fn finish_cycle(
        &self,
        id: &str,
        owner: &str,
        update: &CycleUpdate,
    ) -> AppResult<Option<outbox_event::Model>> {
        OutboxEvent::find()
            .from_raw_sql(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r"
                UPDATE outbox_event
                SET status = $3,
                    attempt_count = $4,
                    next_retry_at = $5,
                    last_error = $6,
                    completed_at = $7,
                    lease_owner = NULL,
                    lease_expires_at = NULL,
                    updated_at = CURRENT_TIMESTAMP
                WHERE id = $1 AND lease_owner = $2 AND status = 'in_flight'
                RETURNING *
                ",
                [
                    id.into(),
                    owner.into(),
                    update.status.as_str().into(),
                    update.attempt_count.into(),
                    update.next_retry_at.into(),
                    update.last_error.clone().into(),
                    update.completed_at.into(),
                ],
            ))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn list_by_status(
        &self,
        status: Option<DeliveryStatus>,
        limit: u64,
    ) -> AppResult<Vec<outbox_event::Model>> {
        let mut query = OutboxEvent::find();
        if let Some(status) = status {
            query = query.filter(outbox_event::Column::Status.eq(status));
        }

        query
            .order_by_asc(outbox_event::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn count_by_status(&self) -> AppResult<Vec<(DeliveryStatus, u64)>> {
        let rows = StatusCount::find_by_statement(Statement::from_string(
            DbBackend::Postgres,
            "SELECT status, COUNT(*) AS count FROM outbox_event GROUP BY status",
        ))
        .all(self.db.as_ref())
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in rows {
            match DeliveryStatus::parse(&row.status) {
                Some(status) => counts.push((status, row.count as u64)),
                None => warn!(status = %row.status, "Unknown outbox status in database"),
            }
        }
        Ok(counts)
    }
}
