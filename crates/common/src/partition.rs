//! Month partition keys for archived events.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::AppError;

/// A `YYYY-MM` partition key, always in UTC.
///
/// Values are validated on construction, so the key is safe to splice into
/// partition table names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartitionMonth {
    year: i32,
    month: u32,
}

impl PartitionMonth {
    /// Create a partition key from a year and a 1-based month.
    pub fn new(year: i32, month: u32) -> Result<Self, AppError> {
        if !(1..=12).contains(&month) {
            return Err(AppError::Validation(format!("invalid month: {month}")));
        }
        if !(1970..=9999).contains(&year) {
            return Err(AppError::Validation(format!("invalid year: {year}")));
        }
        Ok(Self { year, month })
    }

    /// Partition that a timestamp falls into.
    #[must_use]
    pub fn of<Tz: TimeZone>(at: &DateTime<Tz>) -> Self {
        let utc = at.with_timezone(&Utc);
        Self {
            year: utc.year(),
            month: utc.month(),
        }
    }

    /// Partition `months` months before this one.
    #[must_use]
    pub const fn minus_months(self, months: u32) -> Self {
        let index = self.year * 12 + (self.month as i32 - 1) - months as i32;
        Self {
            year: index.div_euclid(12),
            month: (index.rem_euclid(12) + 1) as u32,
        }
    }

    /// Suffix used for physical partition tables, e.g. `p202610`.
    #[must_use]
    pub fn table_suffix(&self) -> String {
        format!("p{:04}{:02}", self.year, self.month)
    }

    /// Parse a suffix produced by [`Self::table_suffix`].
    #[must_use]
    pub fn from_table_suffix(suffix: &str) -> Option<Self> {
        let digits = suffix.strip_prefix('p')?;
        if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let year = digits[..4].parse().ok()?;
        let month = digits[4..].parse().ok()?;
        Self::new(year, month).ok()
    }
}

impl fmt::Display for PartitionMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for PartitionMonth {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::Validation(format!("invalid partition month: {s}"));
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for PartitionMonth {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PartitionMonth> for String {
    fn from(value: PartitionMonth) -> Self {
        value.to_string()
    }
}
