//! Inbound event repository.

use std::sync::Arc;

use async_trait::async_trait;
use courier_common::{AppError, AppResult};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Statement,
};

use crate::entities::{ArchivedInboundEvent, InboundEvent, archived_inbound_event, inbound_event};
use crate::store::{InboundEventStore, InsertOutcome};

/// Received events in the `inbound_event` table.
#[derive(Clone)]
pub struct InboundEventRepository {
    db: Arc<DatabaseConnection>,
}

impl InboundEventRepository {
    /// Create a new inbound event repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn find_archived(&self, event_id: &str) -> AppResult<Option<inbound_event::Model>> {
        let archived = ArchivedInboundEvent::find()
            .filter(archived_inbound_event::Column::EventId.eq(event_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(archived.map(Into::into))
    }
}

#[async_trait]
impl InboundEventStore for InboundEventRepository {
    async fn insert_if_absent(&self, event: inbound_event::Model) -> AppResult<InsertOutcome> {
        // Archived IDs count as seen, otherwise a late redelivery of an
        // archived event would be accepted a second time.
        let result = self
            .db
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r"
                INSERT INTO inbound_event
                    (event_id, origin_domain, event_type, stream_id, sequence, payload, received_at)
                SELECT $1, $2, $3, $4, $5, $6, $7
                WHERE NOT EXISTS (
                    SELECT 1 FROM archived_inbound_event WHERE event_id = $1
                )
                ON CONFLICT (event_id) DO NOTHING
                ",
                [
                    event.event_id.clone().into(),
                    event.origin_domain.clone().into(),
                    event.event_type.clone().into(),
                    event.stream_id.clone().into(),
                    event.sequence.into(),
                    event.payload.clone().into(),
                    event.received_at.into(),
                ],
            ))
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected() > 0 {
            return Ok(InsertOutcome::Inserted(event));
        }

        if let Some(existing) = self.find_by_id(&event.event_id).await? {
            return Ok(InsertOutcome::Duplicate(existing));
        }
        if let Some(archived) = self.find_archived(&event.event_id).await? {
            return Ok(InsertOutcome::Duplicate(archived));
        }

        Err(AppError::Conflict(format!(
            "inbound event {} was neither inserted nor found",
            event.event_id
        )))
    }

    async fn find_by_id(&self, event_id: &str) -> AppResult<Option<inbound_event::Model>> {
        InboundEvent::find_by_id(event_id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn list_after(
        &self,
        origin_domain: &str,
        stream_id: &str,
        after: i64,
        limit: u64,
    ) -> AppResult<Vec<inbound_event::Model>> {
        InboundEvent::find()
            .filter(inbound_event::Column::OriginDomain.eq(origin_domain))
            .filter(inbound_event::Column::StreamId.eq(stream_id))
            .filter(inbound_event::Column::Sequence.gt(after))
            .order_by_asc(inbound_event::Column::Sequence)
            .order_by_asc(inbound_event::Column::ReceivedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn event(event_id: &str, sequence: i64) -> inbound_event::Model {
        inbound_event::Model {
            event_id: event_id.to_string(),
            origin_domain: "a.example".to_string(),
            event_type: "note.created".to_string(),
            stream_id: "notes".to_string(),
            sequence,
            payload: b"{}".to_vec(),
            received_at: Utc::now().into(),
        }
    }

    fn exec(rows_affected: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected,
        }
    }

    #[tokio::test]
    async fn test_insert_new_event() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(1)])
                .into_connection(),
        );

        let repo = InboundEventRepository::new(db);
        let outcome = repo.insert_if_absent(event("e1", 1)).await.unwrap();

        assert!(!outcome.is_duplicate());
        assert_eq!(outcome.into_event().event_id, "e1");
    }

    #[tokio::test]
    async fn test_insert_duplicate_returns_stored_copy() {
        let stored = event("e1", 1);
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(0)])
                .append_query_results([[stored.clone()]])
                .into_connection(),
        );

        let repo = InboundEventRepository::new(db);
        // Same ID, different body: the first copy wins
        let outcome = repo.insert_if_absent(event("e1", 99)).await.unwrap();

        assert!(outcome.is_duplicate());
        assert_eq!(outcome.into_event().sequence, 1);
    }

    #[tokio::test]
    async fn test_insert_duplicate_of_archived_event() {
        let live = event("e1", 4);
        let archived = archived_inbound_event::Model::from_live(
            live.clone(),
            "2026-01".to_string(),
            Utc::now().into(),
        );
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(0)])
                .append_query_results([Vec::<inbound_event::Model>::new()])
                .append_query_results([[archived]])
                .into_connection(),
        );

        let repo = InboundEventRepository::new(db);
        let outcome = repo.insert_if_absent(live).await.unwrap();

        assert!(outcome.is_duplicate());
        assert_eq!(outcome.into_event().sequence, 4);
    }

    #[tokio::test]
    async fn test_list_after() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[event("e2", 2), event("e3", 3)]])
                .into_connection(),
        );

        let repo = InboundEventRepository::new(db);
        let events = repo.list_after("a.example", "notes", 1, 10).await.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 2);
    }
}
