//! Stream position repository.

use std::sync::Arc;

use async_trait::async_trait;
use courier_common::{AppError, AppResult};
use sea_orm::{DatabaseConnection, DbBackend, EntityTrait, Statement};

use crate::entities::{StreamPosition, stream_position};
use crate::store::StreamPositionStore;

/// Consumer positions in the `stream_position` table.
#[derive(Clone)]
pub struct StreamPositionRepository {
    db: Arc<DatabaseConnection>,
}

impl StreamPositionRepository {
    /// Create a new stream position repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StreamPositionStore for StreamPositionRepository {
    async fn advance(&self, origin_domain: &str, stream_id: &str, sequence: i64) -> AppResult<i64> {
        // GREATEST keeps the position monotonic even when two consumers race
        let position = StreamPosition::find()
            .from_raw_sql(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r"
                INSERT INTO stream_position (origin_domain, stream_id, last_sequence, updated_at)
                VALUES ($1, $2, $3, CURRENT_TIMESTAMP)
                ON CONFLICT (origin_domain, stream_id) DO UPDATE
                SET last_sequence = GREATEST(stream_position.last_sequence, EXCLUDED.last_sequence),
                    updated_at = CASE
                        WHEN EXCLUDED.last_sequence > stream_position.last_sequence
                        THEN EXCLUDED.updated_at
                        ELSE stream_position.updated_at
                    END
                RETURNING origin_domain, stream_id, last_sequence, updated_at
                ",
                [origin_domain.into(), stream_id.into(), sequence.into()],
            ))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| {
                AppError::Database(format!(
                    "position upsert returned no row: {origin_domain}/{stream_id}"
                ))
            })?;

        Ok(position.last_sequence)
    }

    async fn find(
        &self,
        origin_domain: &str,
        stream_id: &str,
    ) -> AppResult<Option<stream_position::Model>> {
        StreamPosition::find_by_id((origin_domain.to_string(), stream_id.to_string()))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn position(last_sequence: i64) -> stream_position::Model {
        stream_position::Model {
            origin_domain: "a.example".to_string(),
            stream_id: "notes".to_string(),
            last_sequence,
            updated_at: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_advance_returns_stored_position() {
        // A stale advance to 3 comes back with the higher stored value
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[position(5)]])
                .into_connection(),
        );

        let repo = StreamPositionRepository::new(db);
        assert_eq!(repo.advance("a.example", "notes", 3).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_find_missing_position() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<stream_position::Model>::new()])
                .into_connection(),
        );

        let repo = StreamPositionRepository::new(db);
        assert!(repo.find("a.example", "notes").await.unwrap().is_none());
    }
}
