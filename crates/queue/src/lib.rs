//! Background delivery machinery for courier.
//!
//! - **Dispatcher**: Leases due outbox rows and delivers them to peers
//! - **Transport**: HTTP delivery and response classification
//! - **Retry**: Exponential backoff with jitter
//! - **Scheduler**: Periodic archive, prune and backlog jobs
//! - **Pub/Sub**: Cross-process ingestion notices over Redis

pub mod dispatcher;
pub mod pubsub;
pub mod retry;
pub mod scheduler;
pub mod transport;

pub use dispatcher::{CycleStats, Dispatcher, DispatcherConfig};
pub use pubsub::{PubSubEvent, RedisPubSub, channels as pubsub_channels};
pub use retry::RetryConfig;
pub use scheduler::{
    JobExecutor, ScheduledJob, SchedulerConfig, ServiceJobExecutor, run_job, run_scheduler,
};
pub use transport::{HttpTransport, classify_status};
