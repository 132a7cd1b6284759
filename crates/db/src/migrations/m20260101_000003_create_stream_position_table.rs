//! Create stream position table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(StreamPosition::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StreamPosition::OriginDomain)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(StreamPosition::StreamId).string().not_null())
                    .col(
                        ColumnDef::new(StreamPosition::LastSequence)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(StreamPosition::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(StreamPosition::OriginDomain)
                            .col(StreamPosition::StreamId),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StreamPosition::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum StreamPosition {
    Table,
    OriginDomain,
    StreamId,
    LastSequence,
    UpdatedAt,
}
