//! Stream position entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Highest sequence processed for a remote `(origin, stream)` pair.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stream_position")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub origin_domain: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub stream_id: String,

    pub last_sequence: i64,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
