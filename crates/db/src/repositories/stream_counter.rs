//! Stream counter repository.

use std::sync::Arc;

use async_trait::async_trait;
use courier_common::{AppError, AppResult};
use sea_orm::{DatabaseConnection, DbBackend, EntityTrait, Statement};

use crate::entities::StreamCounter;
use crate::store::SequenceStore;

/// Issues sequences from the `stream_counter` table.
///
/// Issuance is a single upsert, so concurrent callers serialize on the row
/// lock and each receives a distinct value.
#[derive(Clone)]
pub struct StreamCounterRepository {
    db: Arc<DatabaseConnection>,
}

impl StreamCounterRepository {
    /// Create a new stream counter repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SequenceStore for StreamCounterRepository {
    async fn next_sequence(&self, stream_id: &str) -> AppResult<i64> {
        let counter = StreamCounter::find()
            .from_raw_sql(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r"
                INSERT INTO stream_counter (stream_id, next_sequence, updated_at)
                VALUES ($1, 2, CURRENT_TIMESTAMP)
                ON CONFLICT (stream_id) DO UPDATE
                SET next_sequence = stream_counter.next_sequence + 1,
                    updated_at = CURRENT_TIMESTAMP
                RETURNING stream_id, next_sequence, updated_at
                ",
                [stream_id.into()],
            ))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::Database(format!("counter upsert returned no row: {stream_id}")))?;

        Ok(counter.last_issued())
    }

    async fn last_issued(&self, stream_id: &str) -> AppResult<Option<i64>> {
        let counter = StreamCounter::find_by_id(stream_id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(counter.map(|c| c.last_issued()))
    }
}
