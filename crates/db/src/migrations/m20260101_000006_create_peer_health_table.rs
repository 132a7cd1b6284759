//! Create peer health table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PeerHealth::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PeerHealth::Domain)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PeerHealth::UnreachableSince)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PeerHealth::ConsecutiveFailureCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(PeerHealth::LastError).text().null())
                    .col(
                        ColumnDef::new(PeerHealth::LastFailureAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PeerHealth::LastSuccessAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PeerHealth::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PeerHealth::UpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Listing unreachable peers
        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE INDEX IF NOT EXISTS idx_peer_health_unreachable_since
                ON peer_health (unreachable_since)
                WHERE unreachable_since IS NOT NULL;
                ",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PeerHealth::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum PeerHealth {
    Table,
    Domain,
    UnreachableSince,
    ConsecutiveFailureCount,
    LastError,
    LastFailureAt,
    LastSuccessAt,
    CreatedAt,
    UpdatedAt,
}
