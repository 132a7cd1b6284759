//! Inbound event entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Event received from a remote peer.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inbound_event")]
pub struct Model {
    /// Globally unique event ID assigned by the origin.
    #[sea_orm(primary_key, auto_increment = false)]
    pub event_id: String,

    pub origin_domain: String,

    pub event_type: String,

    pub stream_id: String,

    /// Sequence assigned by the origin within its stream.
    pub sequence: i64,

    pub payload: Vec<u8>,

    pub received_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
