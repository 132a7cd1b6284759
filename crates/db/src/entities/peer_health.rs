//! Peer health entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Delivery health of one remote peer.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "peer_health")]
pub struct Model {
    /// Normalized peer domain.
    #[sea_orm(primary_key, auto_increment = false)]
    pub domain: String,

    /// Start of the current failure streak. Cleared on success.
    #[sea_orm(nullable)]
    pub unreachable_since: Option<DateTimeWithTimeZone>,

    #[sea_orm(default_value = 0)]
    pub consecutive_failure_count: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,

    #[sea_orm(nullable)]
    pub last_failure_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub last_success_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
