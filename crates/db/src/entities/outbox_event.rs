//! Outbox event entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::domain_set::DomainSet;

/// Delivery lifecycle of an outbox row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting for its first delivery cycle.
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Leased by a dispatch worker.
    #[sea_orm(string_value = "in_flight")]
    InFlight,
    /// Every target acknowledged.
    #[sea_orm(string_value = "delivered")]
    Delivered,
    /// Some targets acknowledged, the rest will be retried.
    #[sea_orm(string_value = "partially_failed")]
    PartiallyFailed,
    /// Retry budget exhausted.
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl DeliveryStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Delivered => "delivered",
            Self::PartiallyFailed => "partially_failed",
            Self::Failed => "failed",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            "delivered" => Some(Self::Delivered),
            "partially_failed" => Some(Self::PartiallyFailed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether the row will never be attempted again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    /// Whether a worker may lease the row once it is due.
    #[must_use]
    pub const fn is_leasable(self) -> bool {
        matches!(self, Self::Pending | Self::PartiallyFailed)
    }
}

/// Locally produced event awaiting fan-out to remote peers.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "outbox_event")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub event_type: String,

    pub stream_id: String,

    pub sequence: i64,

    pub payload: Vec<u8>,

    /// Peers that must acknowledge the event.
    #[sea_orm(column_type = "JsonBinary")]
    pub target_domains: DomainSet,

    /// Peers that acknowledged. Always a subset of `target_domains`.
    #[sea_orm(column_type = "JsonBinary")]
    pub delivered_domains: DomainSet,

    /// Peers that permanently refused the event and were dropped from the
    /// target set.
    #[sea_orm(column_type = "JsonBinary")]
    pub rejected_domains: DomainSet,

    #[sea_orm(default_value = 0)]
    pub attempt_count: i32,

    pub max_attempts: i32,

    pub status: DeliveryStatus,

    pub next_retry_at: DateTimeWithTimeZone,

    /// Worker holding the row while `in_flight`.
    #[sea_orm(nullable)]
    pub lease_owner: Option<String>,

    #[sea_orm(nullable)]
    pub lease_expires_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,

    /// `YYYY-MM` of `created_at`, the archive partition key.
    pub partition_month: String,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub updated_at: Option<DateTimeWithTimeZone>,

    /// Set when the row reaches `delivered` or `failed`.
    #[sea_orm(nullable)]
    pub completed_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Targets that have not acknowledged yet.
    #[must_use]
    pub fn remaining_targets(&self) -> Vec<String> {
        self.target_domains.difference(&self.delivered_domains)
    }
}
