//! Per-stream sequence counter entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Sequence counter for one local stream.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stream_counter")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub stream_id: String,

    /// Value the next issuance will return.
    pub next_sequence: i64,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Last sequence handed out for this stream.
    #[must_use]
    pub const fn last_issued(&self) -> i64 {
        self.next_sequence - 1
    }
}
