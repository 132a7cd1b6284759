//! Outbox dispatcher.
//!
//! A pool of worker loops leases due rows, fans each row out to its
//! remaining targets and writes the cycle result back under the lease.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_common::config::DeliveryConfig;
use courier_common::{AppError, AppResult, IdGenerator, Timer, get_metrics};
use courier_core::{
    CycleResult, DeliveryOutcome, DeliveryProgress, DeliveryRequest, DeliveryTransport,
    PeerHealthService,
};
use courier_db::entities::{DeliveryStatus, outbox_event};
use courier_db::store::{CycleUpdate, LeaseRequest, OutboxStore};
use futures::StreamExt;
use futures::stream;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::retry::RetryConfig;

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub batch_size: usize,
    pub max_in_flight: usize,
    pub target_concurrency: usize,
    pub lease: Duration,
    pub attempt_timeout: Duration,
    pub unreachable_grace: Duration,
    pub scan_interval: Duration,
    pub retry: RetryConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&DeliveryConfig::default())
    }
}

impl From<&DeliveryConfig> for DispatcherConfig {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            batch_size: config.batch_size.max(1),
            max_in_flight: config.max_in_flight.max(1),
            target_concurrency: config.target_concurrency.max(1),
            lease: config.lease_duration(),
            attempt_timeout: config.attempt_timeout(),
            unreachable_grace: config.unreachable_grace(),
            scan_interval: config.scan_interval(),
            retry: RetryConfig::from(config),
        }
    }
}

/// Rows handled by one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub leased: usize,
    pub delivered: usize,
    pub rescheduled: usize,
    pub failed: usize,
    pub lease_lost: usize,
    pub invalid: usize,
}

enum RowOutcome {
    Finished(CycleResult),
    LeaseLost,
    Invalid,
}

/// Leases due outbox rows and delivers them.
pub struct Dispatcher {
    outbox: Arc<dyn OutboxStore>,
    peers: PeerHealthService,
    transport: Arc<dyn DeliveryTransport>,
    config: DispatcherConfig,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        peers: PeerHealthService,
        transport: Arc<dyn DeliveryTransport>,
        config: DispatcherConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight));
        Self {
            outbox,
            peers,
            transport,
            config,
            permits,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Start the worker loops. They stop after their current cycle once
    /// `shutdown` turns `true`.
    pub fn spawn(self: &Arc<Self>, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let id_gen = IdGenerator::new();
        (0..self.config.workers)
            .map(|index| {
                let owner = id_gen.generate_worker_id(&format!("dispatch-{index}"));
                let dispatcher = Arc::clone(self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { dispatcher.worker_loop(owner, shutdown).await })
            })
            .collect()
    }

    async fn worker_loop(self: Arc<Self>, owner: String, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %owner, "Dispatch worker started");

        while !*shutdown.borrow() {
            let idle = match self.run_cycle(&owner, Utc::now()).await {
                Ok(stats) => stats.leased == 0,
                Err(e) => {
                    error!(worker = %owner, error = %e, "Dispatch cycle failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    () = tokio::time::sleep(self.config.scan_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!(worker = %owner, "Dispatch worker stopped");
    }

    /// Lease one batch of due rows as `owner` and run a delivery cycle on
    /// each.
    ///
    /// The scan reserves in-flight permits for a whole batch up front. With
    /// no free permits nothing is leased and the rows wait for a later scan.
    pub async fn run_cycle(&self, owner: &str, now: DateTime<Utc>) -> AppResult<CycleStats> {
        let mut stats = CycleStats::default();

        let wanted = self.config.batch_size.min(self.permits.available_permits());
        if wanted == 0 {
            debug!(worker = %owner, "No free in-flight permits");
            return Ok(stats);
        }
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_many_owned(wanted as u32) else {
            return Ok(stats);
        };

        let lease_until = now
            + chrono::Duration::from_std(self.config.lease)
                .map_err(|e| AppError::Config(format!("invalid lease duration: {e}")))?;
        let rows = self
            .outbox
            .lease_due(&LeaseRequest {
                owner: owner.to_string(),
                now: now.fixed_offset(),
                lease_until: lease_until.fixed_offset(),
                limit: wanted as u64,
            })
            .await?;

        stats.leased = rows.len();
        if rows.is_empty() {
            return Ok(stats);
        }
        get_metrics().record_leased(rows.len());
        debug!(worker = %owner, count = rows.len(), "Leased outbox rows");

        let outcomes = futures::future::join_all(
            rows.into_iter().map(|row| self.process_row(owner, row, now)),
        )
        .await;
        drop(permit);

        for outcome in outcomes {
            match outcome {
                Ok(RowOutcome::Finished(CycleResult::Delivered)) => stats.delivered += 1,
                Ok(RowOutcome::Finished(CycleResult::Rescheduled { .. })) => stats.rescheduled += 1,
                Ok(RowOutcome::Finished(CycleResult::Exhausted { .. })) => stats.failed += 1,
                Ok(RowOutcome::LeaseLost) => stats.lease_lost += 1,
                Ok(RowOutcome::Invalid) => stats.invalid += 1,
                Err(e) => {
                    error!(worker = %owner, error = %e, "Failed to finish outbox row");
                    stats.invalid += 1;
                }
            }
        }

        Ok(stats)
    }

    async fn process_row(
        &self,
        owner: &str,
        row: outbox_event::Model,
        now: DateTime<Utc>,
    ) -> AppResult<RowOutcome> {
        let mut progress = match DeliveryProgress::from_row(&row) {
            Ok(progress) => progress,
            Err(e) => {
                error!(id = %row.id, error = %e, "Outbox row is inconsistent, marking it failed");
                self.park_invalid(owner, &row, &e, now).await?;
                return Ok(RowOutcome::Invalid);
            }
        };
        let remaining = progress.begin_cycle()?;

        let grace = chrono::Duration::from_std(self.config.unreachable_grace)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let mut attempts = Vec::with_capacity(remaining.len());
        for domain in remaining {
            if self.peers.should_skip(&domain, grace, now).await? {
                debug!(id = %row.id, domain = %domain, "Skipping unreachable peer");
                get_metrics().record_skipped();
                progress.record_skipped(&domain)?;
            } else {
                attempts.push(domain);
            }
        }

        let mut results = stream::iter(attempts)
            .map(|domain| self.attempt(owner, &row, domain, now))
            .buffer_unordered(self.config.target_concurrency);

        let mut lease_lost = false;
        while let Some((domain, outcome, persisted)) = results.next().await {
            match (outcome, persisted) {
                (DeliveryOutcome::Delivered, Ok(true)) => {
                    progress.record_delivered(&domain)?;
                }
                (DeliveryOutcome::Rejected(reason), Ok(true)) => {
                    info!(id = %row.id, domain = %domain, reason = %reason, "Peer rejected event, dropping target");
                    progress.record_rejected(&domain)?;
                }
                (DeliveryOutcome::Transient(reason), _) => {
                    progress.record_transient(&domain, &reason)?;
                }
                (_, Ok(false)) => lease_lost = true,
                (_, Err(e)) => {
                    warn!(id = %row.id, domain = %domain, error = %e, "Could not record delivery progress");
                    progress.record_transient(&domain, "delivery could not be recorded")?;
                }
            }
        }
        drop(results);

        if lease_lost {
            warn!(id = %row.id, worker = %owner, "Lease lost during delivery");
            get_metrics().record_lease_lost();
            return Ok(RowOutcome::LeaseLost);
        }

        let result = progress.finish_cycle()?;
        let delay = self.config.retry.jittered_delay(progress.attempt_count());
        let next_retry_at = now
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(1));
        let update = progress.to_update(next_retry_at, now);

        let Some(stored) = self.outbox.finish_cycle(&row.id, owner, &update).await? else {
            warn!(id = %row.id, worker = %owner, "Lease lost before the cycle was written");
            get_metrics().record_lease_lost();
            return Ok(RowOutcome::LeaseLost);
        };

        match result {
            CycleResult::Delivered => {
                get_metrics().record_terminal(true);
                info!(
                    id = %stored.id,
                    targets = stored.target_domains.len(),
                    rejected = stored.rejected_domains.len(),
                    "Outbox event delivered"
                );
            }
            CycleResult::Exhausted { attempt_count } => {
                get_metrics().record_terminal(false);
                error!(
                    id = %stored.id,
                    attempts = attempt_count,
                    undelivered = ?stored.remaining_targets(),
                    last_error = stored.last_error.as_deref().unwrap_or(""),
                    "Outbox event failed permanently"
                );
            }
            CycleResult::Rescheduled {
                status,
                attempt_count,
            } => {
                debug!(
                    id = %stored.id,
                    status = status.as_str(),
                    attempts = attempt_count,
                    next_retry_at = %stored.next_retry_at,
                    "Outbox event rescheduled"
                );
            }
        }

        Ok(RowOutcome::Finished(result))
    }

    /// Move a row that cannot be delivered into `failed` so it surfaces to
    /// operators instead of being leased again.
    async fn park_invalid(
        &self,
        owner: &str,
        row: &outbox_event::Model,
        reason: &AppError,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let update = CycleUpdate {
            status: DeliveryStatus::Failed,
            attempt_count: row.attempt_count,
            next_retry_at: now.fixed_offset(),
            last_error: Some(format!("inconsistent row: {reason}")),
            completed_at: Some(now.fixed_offset()),
        };
        if self.outbox.finish_cycle(&row.id, owner, &update).await?.is_some() {
            get_metrics().record_terminal(false);
        } else {
            warn!(id = %row.id, worker = %owner, "Lease lost before the row could be failed");
        }
        Ok(())
    }

    /// Deliver to one target and persist the result under the lease.
    async fn attempt(
        &self,
        owner: &str,
        row: &outbox_event::Model,
        domain: String,
        now: DateTime<Utc>,
    ) -> (String, DeliveryOutcome, AppResult<bool>) {
        let timer = Timer::start();
        let delivery = self.transport.deliver(DeliveryRequest {
            event_id: &row.id,
            event_type: &row.event_type,
            domain: &domain,
            payload: &row.payload,
        });
        let outcome = tokio::time::timeout(self.config.attempt_timeout, delivery)
            .await
            .unwrap_or_else(|_| {
                DeliveryOutcome::Transient(format!(
                    "timed out after {}s",
                    self.config.attempt_timeout.as_secs()
                ))
            });
        get_metrics().record_attempt(outcome.is_delivered(), timer.elapsed());

        let health = match &outcome {
            DeliveryOutcome::Delivered | DeliveryOutcome::Rejected(_) => {
                self.peers.record_success(&domain, now).await
            }
            DeliveryOutcome::Transient(reason) => {
                self.peers.record_failure(&domain, reason, now).await.map(|_| ())
            }
        };
        if let Err(e) = health {
            warn!(domain = %domain, error = %e, "Failed to update peer health");
        }

        let persisted = match &outcome {
            DeliveryOutcome::Delivered => self.outbox.mark_delivered(&row.id, owner, &domain).await,
            DeliveryOutcome::Rejected(_) => {
                get_metrics().record_rejected();
                self.outbox.reject_target(&row.id, owner, &domain).await
            }
            DeliveryOutcome::Transient(_) => Ok(true),
        };

        (domain, outcome, persisted)
    }
}
