//! Archived inbound event entity.
//!
//! The table is list-partitioned by `partition_month`, derived from
//! `received_at` in UTC.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Consumed inbound event moved out of the live table.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "archived_inbound_event")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub partition_month: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub event_id: String,

    pub origin_domain: String,

    pub event_type: String,

    pub stream_id: String,

    pub sequence: i64,

    pub payload: Vec<u8>,

    pub received_at: DateTimeWithTimeZone,

    pub archived_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Build the archive copy of a live event.
    #[must_use]
    pub fn from_live(
        event: super::inbound_event::Model,
        partition_month: String,
        archived_at: DateTimeWithTimeZone,
    ) -> Self {
        Self {
            partition_month,
            event_id: event.event_id,
            origin_domain: event.origin_domain,
            event_type: event.event_type,
            stream_id: event.stream_id,
            sequence: event.sequence,
            payload: event.payload,
            received_at: event.received_at,
            archived_at,
        }
    }
}

impl From<Model> for super::inbound_event::Model {
    fn from(archived: Model) -> Self {
        Self {
            event_id: archived.event_id,
            origin_domain: archived.origin_domain,
            event_type: archived.event_type,
            stream_id: archived.stream_id,
            sequence: archived.sequence,
            payload: archived.payload,
            received_at: archived.received_at,
        }
    }
}
