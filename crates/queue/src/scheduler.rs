//! Scheduled jobs for periodic maintenance tasks.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use courier_common::config::ArchiveConfig;
use courier_core::{ArchiveReport, ArchiveService, BacklogEntry, OutboxService};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

type JobError = Box<dyn std::error::Error + Send + Sync>;

/// Scheduled job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduledJob {
    /// Move terminal outbox rows and consumed inbound events to the archive.
    ArchiveTerminal,
    /// Drop expired archive partitions.
    PrunePartitions,
    /// Log the live outbox by status.
    ReportBacklog,
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval for archival runs (default: 10 minutes).
    pub archive_interval: Duration,
    /// Whether to drop old archive partitions.
    pub enable_prune: bool,
    /// Interval for partition pruning (default: daily).
    pub prune_interval: Duration,
    /// Interval for backlog reports (default: 1 minute).
    pub backlog_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            archive_interval: Duration::from_secs(600),
            enable_prune: false,
            prune_interval: Duration::from_secs(86400),
            backlog_interval: Duration::from_secs(60),
        }
    }
}

impl From<&ArchiveConfig> for SchedulerConfig {
    fn from(config: &ArchiveConfig) -> Self {
        Self {
            archive_interval: Duration::from_secs(config.interval_secs.max(1)),
            enable_prune: config.prune_after_months.is_some(),
            ..Self::default()
        }
    }
}

/// Job executor trait for scheduled jobs.
#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync {
    /// Archive everything currently eligible.
    async fn archive_terminal(&self) -> Result<ArchiveReport, JobError>;

    /// Drop expired archive partitions. Returns how many were dropped.
    async fn prune_partitions(&self) -> Result<u64, JobError>;

    /// Count live outbox rows per status.
    async fn report_backlog(&self) -> Result<Vec<BacklogEntry>, JobError>;
}

/// Executor backed by the core services.
#[derive(Clone)]
pub struct ServiceJobExecutor {
    archive: ArchiveService,
    outbox: OutboxService,
}

impl ServiceJobExecutor {
    #[must_use]
    pub const fn new(archive: ArchiveService, outbox: OutboxService) -> Self {
        Self { archive, outbox }
    }
}

#[async_trait::async_trait]
impl JobExecutor for ServiceJobExecutor {
    async fn archive_terminal(&self) -> Result<ArchiveReport, JobError> {
        Ok(self.archive.run_once(Utc::now()).await?)
    }

    async fn prune_partitions(&self) -> Result<u64, JobError> {
        Ok(self.archive.prune(Utc::now()).await?.len() as u64)
    }

    async fn report_backlog(&self) -> Result<Vec<BacklogEntry>, JobError> {
        Ok(self.outbox.backlog().await?)
    }
}

/// Run one job and log its result.
pub async fn run_job<E: JobExecutor + ?Sized>(job: ScheduledJob, executor: &E) {
    match job {
        ScheduledJob::ArchiveTerminal => match executor.archive_terminal().await {
            Ok(report) => {
                if report.outbox_archived > 0 || report.inbound_archived > 0 {
                    tracing::info!(
                        outbox = report.outbox_archived,
                        inbound = report.inbound_archived,
                        "Archive run finished"
                    );
                }
            }
            Err(e) => tracing::error!(error = %e, "Archive run failed"),
        },
        ScheduledJob::PrunePartitions => match executor.prune_partitions().await {
            Ok(count) => {
                if count > 0 {
                    tracing::info!(count, "Pruned archive partitions");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to prune archive partitions"),
        },
        ScheduledJob::ReportBacklog => match executor.report_backlog().await {
            Ok(backlog) => {
                for entry in backlog.iter().filter(|e| !e.status.is_terminal()) {
                    tracing::info!(status = entry.status.as_str(), count = entry.count, "Outbox backlog");
                }
                if let Some(failed) = backlog
                    .iter()
                    .find(|e| e.status == courier_db::entities::DeliveryStatus::Failed && e.count > 0)
                {
                    tracing::warn!(count = failed.count, "Outbox holds permanently failed events");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to read outbox backlog"),
        },
    }
}

fn spawn_periodic<E: JobExecutor + 'static>(
    job: ScheduledJob,
    period: Duration,
    executor: Arc<E>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => run_job(job, executor.as_ref()).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(?job, "Scheduled job stopped");
    })
}

/// Run the scheduler with the given configuration and executor.
pub fn run_scheduler<E: JobExecutor + 'static>(
    config: &SchedulerConfig,
    executor: Arc<E>,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = vec![
        spawn_periodic(
            ScheduledJob::ArchiveTerminal,
            config.archive_interval,
            executor.clone(),
            shutdown.clone(),
        ),
        spawn_periodic(
            ScheduledJob::ReportBacklog,
            config.backlog_interval,
            executor.clone(),
            shutdown.clone(),
        ),
    ];

    if config.enable_prune {
        handles.push(spawn_periodic(
            ScheduledJob::PrunePartitions,
            config.prune_interval,
            executor,
            shutdown.clone(),
        ));
    }

    handles
}
