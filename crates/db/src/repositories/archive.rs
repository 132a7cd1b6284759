//! Archive repository.
//!
//! Archive tables are list-partitioned by `YYYY-MM`. Partitions are created
//! on demand right before rows are moved into them, and dropped wholesale
//! when pruning.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use courier_common::{AppError, AppResult, PartitionMonth};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr, EntityTrait,
    FromQueryResult, QueryFilter, QueryOrder, QuerySelect, Statement, TransactionTrait,
};
use tracing::{debug, info, warn};

use crate::entities::{
    ArchivedInboundEvent, ArchivedOutboxEvent, archived_inbound_event, archived_outbox_event,
};
use crate::store::{ArchiveStore, PartitionInfo};

const OUTBOX_ARCHIVE: &str = "archived_outbox_event";
const INBOUND_ARCHIVE: &str = "archived_inbound_event";

/// Moves terminal rows into the month-partitioned archive tables.
#[derive(Clone)]
pub struct ArchiveRepository {
    db: Arc<DatabaseConnection>,
}

#[derive(Debug, FromQueryResult)]
struct MonthRow {
    month: String,
}

#[derive(Debug, FromQueryResult)]
struct MonthCount {
    month: String,
    row_count: i64,
}

#[derive(Debug, FromQueryResult)]
struct MovedId {
    id: String,
}

#[derive(Debug, FromQueryResult)]
struct PartitionName {
    name: String,
}

fn parse_months(rows: Vec<MonthRow>) -> Vec<PartitionMonth> {
    rows.into_iter()
        .filter_map(|row| match row.month.parse() {
            Ok(month) => Some(month),
            Err(e) => {
                warn!(month = %row.month, error = %e, "Skipping malformed partition month");
                None
            }
        })
        .collect()
}

async fn ensure_partition<C: ConnectionTrait>(
    conn: &C,
    table: &str,
    month: PartitionMonth,
) -> Result<(), DbErr> {
    // `month` is validated, so splicing it into DDL is safe
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {table}_{suffix} PARTITION OF {table} FOR VALUES IN ('{month}')",
        suffix = month.table_suffix(),
    );
    conn.execute_unprepared(&sql).await?;
    debug!(table, %month, "Ensured archive partition");
    Ok(())
}

async fn child_partitions<C: ConnectionTrait>(
    conn: &C,
    table: &str,
) -> Result<Vec<PartitionMonth>, DbErr> {
    let rows = PartitionName::find_by_statement(Statement::from_sql_and_values(
        DbBackend::Postgres,
        r"
        SELECT c.relname AS name
        FROM pg_inherits i
        JOIN pg_class c ON c.oid = i.inhrelid
        JOIN pg_class p ON p.oid = i.inhparent
        WHERE p.relname = $1
        ",
        [table.into()],
    ))
    .all(conn)
    .await?;

    let prefix = format!("{table}_");
    Ok(rows
        .iter()
        .filter_map(|row| row.name.strip_prefix(&prefix))
        .filter_map(PartitionMonth::from_table_suffix)
        .collect())
}

impl ArchiveRepository {
    /// Create a new archive repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn count_by_month(&self, table: &str) -> AppResult<Vec<MonthCount>> {
        MonthCount::find_by_statement(Statement::from_string(
            DbBackend::Postgres,
            format!(
                "SELECT partition_month AS month, COUNT(*) AS row_count FROM {table} GROUP BY partition_month"
            ),
        ))
        .all(self.db.as_ref())
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[async_trait]
impl ArchiveStore for ArchiveRepository {
    async fn archive_outbox(
        &self,
        failed_before: DateTimeWithTimeZone,
        limit: u64,
    ) -> AppResult<Vec<String>> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let months = MonthRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            r"
            SELECT DISTINCT partition_month AS month FROM outbox_event
            WHERE status = 'delivered' OR (status = 'failed' AND completed_at <= $1)
            ",
            [failed_before.into()],
        ))
        .all(&txn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        for month in parse_months(months) {
            ensure_partition(&txn, OUTBOX_ARCHIVE, month)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }

        // Delete and insert in one statement: a row is either live or
        // archived, never both and never neither. IDs already in the archive
        // stay live, and a conflict from a concurrent move aborts the whole
        // transaction.
        let moved = MovedId::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            r"
            WITH candidates AS (
                SELECT id FROM outbox_event
                WHERE (status = 'delivered' OR (status = 'failed' AND completed_at <= $1))
                  AND NOT EXISTS (SELECT 1 FROM archived_outbox_event a WHERE a.id = outbox_event.id)
                ORDER BY id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            ), moved AS (
                DELETE FROM outbox_event o
                USING candidates c
                WHERE o.id = c.id
                RETURNING o.*
            )
            INSERT INTO archived_outbox_event (
                partition_month, id, event_type, stream_id, sequence, payload,
                target_domains, delivered_domains, rejected_domains,
                attempt_count, max_attempts, status, last_error,
                created_at, completed_at, archived_at
            )
            SELECT
                partition_month, id, event_type, stream_id, sequence, payload,
                target_domains, delivered_domains, rejected_domains,
                attempt_count, max_attempts, status, last_error,
                created_at, completed_at, CURRENT_TIMESTAMP
            FROM moved
            RETURNING id
            ",
            [failed_before.into(), (limit as i64).into()],
        ))
        .all(&txn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if !moved.is_empty() {
            info!(count = moved.len(), "Archived outbox rows");
        }
        Ok(moved.into_iter().map(|row| row.id).collect())
    }

    async fn archive_inbound(
        &self,
        received_before: DateTimeWithTimeZone,
        limit: u64,
    ) -> AppResult<Vec<String>> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let months = MonthRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            r"
            SELECT DISTINCT to_char(e.received_at AT TIME ZONE 'UTC', 'YYYY-MM') AS month
            FROM inbound_event e
            JOIN stream_position p
              ON p.origin_domain = e.origin_domain AND p.stream_id = e.stream_id
            WHERE e.sequence <= p.last_sequence AND e.received_at <= $1
            ",
            [received_before.into()],
        ))
        .all(&txn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        for month in parse_months(months) {
            ensure_partition(&txn, INBOUND_ARCHIVE, month)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }

        // Only events at or below the consumer position are eligible
        let moved = MovedId::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            r"
            WITH candidates AS (
                SELECT e.event_id FROM inbound_event e
                JOIN stream_position p
                  ON p.origin_domain = e.origin_domain AND p.stream_id = e.stream_id
                WHERE e.sequence <= p.last_sequence AND e.received_at <= $1
                  AND NOT EXISTS (
                      SELECT 1 FROM archived_inbound_event a WHERE a.event_id = e.event_id
                  )
                ORDER BY e.received_at
                LIMIT $2
                FOR UPDATE OF e SKIP LOCKED
            ), moved AS (
                DELETE FROM inbound_event e
                USING candidates c
                WHERE e.event_id = c.event_id
                RETURNING e.*
            )
            INSERT INTO archived_inbound_event (
                partition_month, event_id, origin_domain, event_type, stream_id,
                sequence, payload, received_at, archived_at
            )
            SELECT
                to_char(received_at AT TIME ZONE 'UTC', 'YYYY-MM'), event_id, origin_domain,
                event_type, stream_id, sequence, payload, received_at, CURRENT_TIMESTAMP
            FROM moved
            RETURNING event_id AS id
            ",
            [received_before.into(), (limit as i64).into()],
        ))
        .all(&txn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if !moved.is_empty() {
            info!(count = moved.len(), "Archived inbound events");
        }
        Ok(moved.into_iter().map(|row| row.id).collect())
    }

    async fn find_archived_outbox(
        &self,
        id: &str,
    ) -> AppResult<Option<archived_outbox_event::Model>> {
        ArchivedOutboxEvent::find()
            .filter(archived_outbox_event::Column::Id.eq(id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn replay_inbound(
        &self,
        origin_domain: &str,
        stream_id: &str,
        after: i64,
        limit: u64,
    ) -> AppResult<Vec<archived_inbound_event::Model>> {
        ArchivedInboundEvent::find()
            .filter(archived_inbound_event::Column::OriginDomain.eq(origin_domain))
            .filter(archived_inbound_event::Column::StreamId.eq(stream_id))
            .filter(archived_inbound_event::Column::Sequence.gt(after))
            .order_by_asc(archived_inbound_event::Column::Sequence)
            .order_by_asc(archived_inbound_event::Column::ReceivedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn list_partitions(&self) -> AppResult<Vec<PartitionInfo>> {
        let mut partitions: BTreeMap<PartitionMonth, PartitionInfo> = BTreeMap::new();
        let empty = |month| PartitionInfo {
            month,
            outbox_rows: 0,
            inbound_rows: 0,
        };

        for table in [OUTBOX_ARCHIVE, INBOUND_ARCHIVE] {
            let months = child_partitions(self.db.as_ref(), table)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
            for month in months {
                partitions.entry(month).or_insert_with(|| empty(month));
            }
        }

        for count in self.count_by_month(OUTBOX_ARCHIVE).await? {
            if let Ok(month) = count.month.parse::<PartitionMonth>() {
                partitions.entry(month).or_insert_with(|| empty(month)).outbox_rows =
                    count.row_count as u64;
            }
        }
        for count in self.count_by_month(INBOUND_ARCHIVE).await? {
            if let Ok(month) = count.month.parse::<PartitionMonth>() {
                partitions.entry(month).or_insert_with(|| empty(month)).inbound_rows =
                    count.row_count as u64;
            }
        }

        Ok(partitions.into_values().collect())
    }

    async fn drop_partitions_before(
        &self,
        month: PartitionMonth,
    ) -> AppResult<Vec<PartitionMonth>> {
        let mut dropped = Vec::new();

        for table in [OUTBOX_ARCHIVE, INBOUND_ARCHIVE] {
            let months = child_partitions(self.db.as_ref(), table)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;

            for old in months.into_iter().filter(|m| *m < month) {
                let sql = format!("DROP TABLE IF EXISTS {table}_{}", old.table_suffix());
                self.db
                    .execute_unprepared(&sql)
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                info!(table, month = %old, "Dropped archive partition");
                dropped.push(old);
            }
        }

        dropped.sort();
        dropped.dedup();
        Ok(dropped)
    }
}
