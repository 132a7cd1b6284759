//! `PostgreSQL` repositories.
//!
//! Each repository implements one of the [`crate::store`] traits.

mod archive;
mod inbound_event;
mod outbox;
mod peer_health;
mod stream_counter;
mod stream_position;

pub use archive::ArchiveRepository;
pub use inbound_event::InboundEventRepository;
pub use outbox::OutboxRepository;
pub use peer_health::PeerHealthRepository;
pub use stream_counter::StreamCounterRepository;
pub use stream_position::StreamPositionRepository;
