//! Create inbound event table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(InboundEvent::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(InboundEvent::EventId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(InboundEvent::OriginDomain).string().not_null())
                    .col(ColumnDef::new(InboundEvent::EventType).string().not_null())
                    .col(ColumnDef::new(InboundEvent::StreamId).string().not_null())
                    .col(ColumnDef::new(InboundEvent::Sequence).big_integer().not_null())
                    .col(ColumnDef::new(InboundEvent::Payload).binary().not_null())
                    .col(
                        ColumnDef::new(InboundEvent::ReceivedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Ordered reads per stream. Not unique: a misbehaving origin may reuse
        // a sequence under a new event ID and both copies are kept.
        manager
            .create_index(
                Index::create()
                    .name("idx_inbound_event_stream_sequence")
                    .table(InboundEvent::Table)
                    .col(InboundEvent::OriginDomain)
                    .col(InboundEvent::StreamId)
                    .col(InboundEvent::Sequence)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_inbound_event_received_at")
                    .table(InboundEvent::Table)
                    .col(InboundEvent::ReceivedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(InboundEvent::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum InboundEvent {
    Table,
    EventId,
    OriginDomain,
    EventType,
    StreamId,
    Sequence,
    Payload,
    ReceivedAt,
}
