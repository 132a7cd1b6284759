//! Event sequencing, ingestion and delivery services.

#![allow(missing_docs)]

pub mod archive;
pub mod consumer;
pub mod hooks;
pub mod ingest;
pub mod outbox;
pub mod peer_health;
pub mod position;
pub mod progress;
pub mod sequence;
pub mod transport;
pub mod validation;

pub use archive::{ArchiveReport, ArchiveService};
pub use consumer::{ConsumeReport, StreamConsumer};
pub use hooks::{ChannelListener, IngestHooks, IngestListener, IngestedEvent};
pub use ingest::{IngestInput, IngestReceipt, IngestService, IngestStatus, SequenceGap};
pub use outbox::{
    BacklogEntry, DeliveryStatusView, OutboxService, ProduceEventInput, StaticTargetResolver,
    TargetResolver,
};
pub use peer_health::{PeerHealthService, trial_due, unreachable_past_grace};
pub use position::StreamPositionService;
pub use progress::{CycleResult, DeliveryProgress};
pub use sequence::SequenceService;
pub use transport::{DeliveryOutcome, DeliveryRequest, DeliveryTransport};
