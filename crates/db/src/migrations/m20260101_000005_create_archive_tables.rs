//! Create the month-partitioned archive tables.
//!
//! Partitions themselves are created on demand by the archive repository.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE TABLE IF NOT EXISTS archived_outbox_event (
                    partition_month VARCHAR(7) NOT NULL,
                    id VARCHAR NOT NULL,
                    event_type VARCHAR NOT NULL,
                    stream_id VARCHAR NOT NULL,
                    sequence BIGINT NOT NULL,
                    payload BYTEA NOT NULL,
                    target_domains JSONB NOT NULL DEFAULT '[]'::jsonb,
                    delivered_domains JSONB NOT NULL DEFAULT '[]'::jsonb,
                    rejected_domains JSONB NOT NULL DEFAULT '[]'::jsonb,
                    attempt_count INTEGER NOT NULL DEFAULT 0,
                    max_attempts INTEGER NOT NULL,
                    status VARCHAR(16) NOT NULL,
                    last_error TEXT,
                    created_at TIMESTAMPTZ NOT NULL,
                    completed_at TIMESTAMPTZ,
                    archived_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                    PRIMARY KEY (partition_month, id)
                ) PARTITION BY LIST (partition_month);
                ",
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE INDEX IF NOT EXISTS idx_archived_outbox_event_id
                ON archived_outbox_event (id);
                ",
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE INDEX IF NOT EXISTS idx_archived_outbox_event_stream_sequence
                ON archived_outbox_event (stream_id, sequence);
                ",
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE TABLE IF NOT EXISTS archived_inbound_event (
                    partition_month VARCHAR(7) NOT NULL,
                    event_id VARCHAR NOT NULL,
                    origin_domain VARCHAR NOT NULL,
                    event_type VARCHAR NOT NULL,
                    stream_id VARCHAR NOT NULL,
                    sequence BIGINT NOT NULL,
                    payload BYTEA NOT NULL,
                    received_at TIMESTAMPTZ NOT NULL,
                    archived_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                    PRIMARY KEY (partition_month, event_id)
                ) PARTITION BY LIST (partition_month);
                ",
            )
            .await?;

        // Duplicate checks on ingest look events up by ID alone
        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE INDEX IF NOT EXISTS idx_archived_inbound_event_id
                ON archived_inbound_event (event_id);
                ",
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE INDEX IF NOT EXISTS idx_archived_inbound_event_stream_sequence
                ON archived_inbound_event (origin_domain, stream_id, sequence);
                ",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS archived_inbound_event CASCADE;")
            .await?;

        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS archived_outbox_event CASCADE;")
            .await?;

        Ok(())
    }
}
