//! Database migrations.

use sea_orm_migration::prelude::*;

mod m20260101_000001_create_stream_counter_table;
mod m20260101_000002_create_inbound_event_table;
mod m20260101_000003_create_stream_position_table;
mod m20260101_000004_create_outbox_event_table;
mod m20260101_000005_create_archive_tables;
mod m20260101_000006_create_peer_health_table;

/// Migrator for all courier tables.
pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260101_000001_create_stream_counter_table::Migration),
            Box::new(m20260101_000002_create_inbound_event_table::Migration),
            Box::new(m20260101_000003_create_stream_position_table::Migration),
            Box::new(m20260101_000004_create_outbox_event_table::Migration),
            Box::new(m20260101_000005_create_archive_tables::Migration),
            Box::new(m20260101_000006_create_peer_health_table::Migration),
        ]
    }
}
