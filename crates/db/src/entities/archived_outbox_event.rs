//! Archived outbox event entity.
//!
//! The table is list-partitioned by `partition_month`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::domain_set::DomainSet;
use super::outbox_event::DeliveryStatus;

/// Terminal outbox row moved out of the live table.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "archived_outbox_event")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub partition_month: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub event_type: String,

    pub stream_id: String,

    pub sequence: i64,

    pub payload: Vec<u8>,

    #[sea_orm(column_type = "JsonBinary")]
    pub target_domains: DomainSet,

    #[sea_orm(column_type = "JsonBinary")]
    pub delivered_domains: DomainSet,

    #[sea_orm(column_type = "JsonBinary")]
    pub rejected_domains: DomainSet,

    pub attempt_count: i32,

    pub max_attempts: i32,

    pub status: DeliveryStatus,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub completed_at: Option<DateTimeWithTimeZone>,

    pub archived_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Build the archive copy of a live row.
    #[must_use]
    pub fn from_live(row: super::outbox_event::Model, archived_at: DateTimeWithTimeZone) -> Self {
        Self {
            partition_month: row.partition_month,
            id: row.id,
            event_type: row.event_type,
            stream_id: row.stream_id,
            sequence: row.sequence,
            payload: row.payload,
            target_domains: row.target_domains,
            delivered_domains: row.delivered_domains,
            rejected_domains: row.rejected_domains,
            attempt_count: row.attempt_count,
            max_attempts: row.max_attempts,
            status: row.status,
            last_error: row.last_error,
            created_at: row.created_at,
            completed_at: row.completed_at,
            archived_at,
        }
    }
}
