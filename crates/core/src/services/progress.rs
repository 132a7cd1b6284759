//! Per-row delivery state machine.
//!
//! ```text
//! pending ──lease──▶ in_flight ──▶ delivered
//!    ▲                   │
//!    │                   ├──▶ partially_failed ──lease──▶ in_flight
//!    └───────────────────┤
//!                        └──▶ failed
//! ```
//!
//! Every transition re-checks the row invariants and reports a broken one as
//! [`AppError::InvariantViolation`] instead of writing it back.

use chrono::{DateTime, Utc};
use courier_common::{AppError, AppResult};
use courier_db::entities::{DeliveryStatus, DomainSet, outbox_event};
use courier_db::store::CycleUpdate;
use serde::Serialize;

/// How a delivery cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CycleResult {
    /// Every target acknowledged. Terminal.
    Delivered,
    /// Some targets are still owed. The row goes back to the queue.
    #[serde(rename_all = "camelCase")]
    Rescheduled {
        status: DeliveryStatus,
        attempt_count: u32,
    },
    /// Out of attempts with targets still owed. Terminal.
    #[serde(rename_all = "camelCase")]
    Exhausted { attempt_count: u32 },
}

impl CycleResult {
    #[must_use]
    pub const fn status(&self) -> DeliveryStatus {
        match self {
            Self::Delivered => DeliveryStatus::Delivered,
            Self::Rescheduled { status, .. } => *status,
            Self::Exhausted { .. } => DeliveryStatus::Failed,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

#[derive(Debug, Clone, Default)]
struct Cycle {
    attempted: u32,
    transient_failures: u32,
    skipped: u32,
    last_error: Option<String>,
}

/// Delivery bookkeeping of one outbox row.
#[derive(Debug, Clone)]
pub struct DeliveryProgress {
    targets: DomainSet,
    delivered: DomainSet,
    rejected: DomainSet,
    attempt_count: u32,
    max_attempts: u32,
    status: DeliveryStatus,
    last_error: Option<String>,
    cycle: Option<Cycle>,
}

impl DeliveryProgress {
    /// Progress of a freshly produced row.
    ///
    /// A row without targets has nothing to deliver and starts out delivered.
    pub fn new(targets: DomainSet, max_attempts: u32) -> AppResult<Self> {
        if max_attempts == 0 {
            return Err(AppError::Validation("max_attempts must be at least 1".to_string()));
        }
        let status = if targets.is_empty() {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Pending
        };
        let progress = Self {
            targets,
            delivered: DomainSet::new(),
            rejected: DomainSet::new(),
            attempt_count: 0,
            max_attempts,
            status,
            last_error: None,
            cycle: None,
        };
        progress.check()?;
        Ok(progress)
    }

    /// Rebuild progress from a stored row.
    pub fn from_row(row: &outbox_event::Model) -> AppResult<Self> {
        let count = |name: &str, value: i32| {
            u32::try_from(value).map_err(|_| {
                AppError::InvariantViolation(format!("outbox {}: negative {name}: {value}", row.id))
            })
        };
        let progress = Self {
            targets: row.target_domains.clone(),
            delivered: row.delivered_domains.clone(),
            rejected: row.rejected_domains.clone(),
            attempt_count: count("attempt_count", row.attempt_count)?,
            max_attempts: count("max_attempts", row.max_attempts)?,
            status: row.status,
            last_error: row.last_error.clone(),
            cycle: None,
        };
        progress.check().map_err(|e| match e {
            AppError::InvariantViolation(msg) => {
                AppError::InvariantViolation(format!("outbox {}: {msg}", row.id))
            }
            other => other,
        })?;
        Ok(progress)
    }

    #[must_use]
    pub const fn status(&self) -> DeliveryStatus {
        self.status
    }

    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn targets(&self) -> &DomainSet {
        &self.targets
    }

    #[must_use]
    pub const fn delivered(&self) -> &DomainSet {
        &self.delivered
    }

    #[must_use]
    pub const fn rejected(&self) -> &DomainSet {
        &self.rejected
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Targets still owed the event.
    #[must_use]
    pub fn remaining(&self) -> Vec<String> {
        self.targets.difference(&self.delivered)
    }

    fn is_complete(&self) -> bool {
        self.delivered.len() == self.targets.len() && self.delivered.is_subset(&self.targets)
    }

    /// Start a cycle on a leased row and return the targets to attempt.
    pub fn begin_cycle(&mut self) -> AppResult<Vec<String>> {
        if self.status.is_terminal() {
            return Err(AppError::InvariantViolation(format!(
                "cannot start a cycle on a {} row",
                self.status.as_str()
            )));
        }
        if self.cycle.is_some() {
            return Err(AppError::InvariantViolation("cycle already running".to_string()));
        }
        self.status = DeliveryStatus::InFlight;
        self.cycle = Some(Cycle::default());
        Ok(self.remaining())
    }

    fn cycle_mut(&mut self) -> AppResult<&mut Cycle> {
        self.cycle
            .as_mut()
            .ok_or_else(|| AppError::InvariantViolation("no cycle running".to_string()))
    }

    /// A target acknowledged the event. Returns `false` if it already had.
    pub fn record_delivered(&mut self, domain: &str) -> AppResult<bool> {
        self.cycle_mut()?.attempted += 1;
        if !self.targets.contains(domain) {
            return Err(AppError::InvariantViolation(format!(
                "{domain} is not a target"
            )));
        }
        let added = self.delivered.insert(domain);
        self.check()?;
        Ok(added)
    }

    /// A target permanently refused the event. It leaves the target set and
    /// does not count as a failed attempt.
    pub fn record_rejected(&mut self, domain: &str) -> AppResult<bool> {
        self.cycle_mut()?.attempted += 1;
        if self.delivered.contains(domain) || !self.targets.remove(domain) {
            return Ok(false);
        }
        self.rejected.insert(domain);
        self.check()?;
        Ok(true)
    }

    /// A target failed in a way worth retrying.
    pub fn record_transient(&mut self, domain: &str, error: &str) -> AppResult<()> {
        let cycle = self.cycle_mut()?;
        cycle.attempted += 1;
        cycle.transient_failures += 1;
        cycle.last_error = Some(format!("{domain}: {error}"));
        Ok(())
    }

    /// A target was not attempted because the peer is unreachable.
    pub fn record_skipped(&mut self, _domain: &str) -> AppResult<()> {
        self.cycle_mut()?.skipped += 1;
        Ok(())
    }

    /// Close the cycle and decide the row's next status.
    pub fn finish_cycle(&mut self) -> AppResult<CycleResult> {
        let cycle = self
            .cycle
            .take()
            .ok_or_else(|| AppError::InvariantViolation("no cycle running".to_string()))?;

        let result = if self.is_complete() {
            self.last_error = None;
            CycleResult::Delivered
        } else {
            if cycle.transient_failures > 0 {
                self.attempt_count += 1;
            }
            if cycle.last_error.is_some() {
                self.last_error = cycle.last_error;
            }
            if self.attempt_count >= self.max_attempts {
                CycleResult::Exhausted {
                    attempt_count: self.attempt_count,
                }
            } else {
                let status = if self.delivered.is_empty() {
                    DeliveryStatus::Pending
                } else {
                    DeliveryStatus::PartiallyFailed
                };
                CycleResult::Rescheduled {
                    status,
                    attempt_count: self.attempt_count,
                }
            }
        };

        self.status = result.status();
        self.check()?;
        Ok(result)
    }

    /// Bookkeeping to persist for a finished cycle.
    #[must_use]
    pub fn to_update(&self, next_retry_at: DateTime<Utc>, now: DateTime<Utc>) -> CycleUpdate {
        let terminal = self.status.is_terminal();
        CycleUpdate {
            status: self.status,
            attempt_count: i32::try_from(self.attempt_count).unwrap_or(i32::MAX),
            next_retry_at: if terminal { now } else { next_retry_at }.fixed_offset(),
            last_error: self.last_error.clone(),
            completed_at: terminal.then(|| now.fixed_offset()),
        }
    }

    fn check(&self) -> AppResult<()> {
        let violation = |msg: String| Err(AppError::InvariantViolation(msg));

        if !self.delivered.is_subset(&self.targets) {
            return violation(format!(
                "delivered domains outside the target set: {:?}",
                self.delivered.difference(&self.targets)
            ));
        }
        if self.delivered.intersects(&self.rejected) {
            return violation("a domain is both delivered and rejected".to_string());
        }
        match self.status {
            DeliveryStatus::Delivered if !self.is_complete() => {
                violation("delivered with targets still owed".to_string())
            }
            DeliveryStatus::Failed if self.is_complete() => {
                violation("failed although every target was delivered".to_string())
            }
            DeliveryStatus::Failed if self.attempt_count < self.max_attempts => violation(format!(
                "failed after {} of {} attempts",
                self.attempt_count, self.max_attempts
            )),
            DeliveryStatus::PartiallyFailed if self.delivered.is_empty() => {
                violation("partially failed without any delivery".to_string())
            }
            _ => Ok(()),
        }
    }
}
