//! Create outbox event table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OutboxEvent::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OutboxEvent::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OutboxEvent::EventType).string().not_null())
                    .col(ColumnDef::new(OutboxEvent::StreamId).string().not_null())
                    .col(ColumnDef::new(OutboxEvent::Sequence).big_integer().not_null())
                    .col(ColumnDef::new(OutboxEvent::Payload).binary().not_null())
                    .col(
                        ColumnDef::new(OutboxEvent::TargetDomains)
                            .json_binary()
                            .not_null()
                            .default(Expr::cust("'[]'::jsonb")),
                    )
                    .col(
                        ColumnDef::new(OutboxEvent::DeliveredDomains)
                            .json_binary()
                            .not_null()
                            .default(Expr::cust("'[]'::jsonb")),
                    )
                    .col(
                        ColumnDef::new(OutboxEvent::RejectedDomains)
                            .json_binary()
                            .not_null()
                            .default(Expr::cust("'[]'::jsonb")),
                    )
                    .col(
                        ColumnDef::new(OutboxEvent::AttemptCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(OutboxEvent::MaxAttempts).integer().not_null())
                    .col(
                        ColumnDef::new(OutboxEvent::Status)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(OutboxEvent::NextRetryAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(OutboxEvent::LeaseOwner).string().null())
                    .col(
                        ColumnDef::new(OutboxEvent::LeaseExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(OutboxEvent::LastError).text().null())
                    .col(
                        ColumnDef::new(OutboxEvent::PartitionMonth)
                            .string_len(7)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OutboxEvent::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(OutboxEvent::UpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OutboxEvent::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_outbox_event_stream_sequence")
                    .table(OutboxEvent::Table)
                    .col(OutboxEvent::StreamId)
                    .col(OutboxEvent::Sequence)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_outbox_event_status")
                    .table(OutboxEvent::Table)
                    .col(OutboxEvent::Status)
                    .to_owned(),
            )
            .await?;

        // Lease scans only look at due rows and expired leases
        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE INDEX IF NOT EXISTS idx_outbox_event_due
                ON outbox_event (next_retry_at)
                WHERE status IN ('pending', 'partially_failed');
                ",
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE INDEX IF NOT EXISTS idx_outbox_event_lease_expiry
                ON outbox_event (lease_expires_at)
                WHERE status = 'in_flight';
                ",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OutboxEvent::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum OutboxEvent {
    Table,
    Id,
    EventType,
    StreamId,
    Sequence,
    Payload,
    TargetDomains,
    DeliveredDomains,
    RejectedDomains,
    AttemptCount,
    MaxAttempts,
    Status,
    NextRetryAt,
    LeaseOwner,
    LeaseExpiresAt,
    LastError,
    PartitionMonth,
    CreatedAt,
    UpdatedAt,
    CompletedAt,
}
