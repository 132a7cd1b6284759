//! Database entities.

pub mod archived_inbound_event;
pub mod archived_outbox_event;
pub mod domain_set;
pub mod inbound_event;
pub mod outbox_event;
pub mod peer_health;
pub mod stream_counter;
pub mod stream_position;

pub use archived_inbound_event::Entity as ArchivedInboundEvent;
pub use archived_outbox_event::Entity as ArchivedOutboxEvent;
pub use domain_set::DomainSet;
pub use inbound_event::Entity as InboundEvent;
pub use outbox_event::{DeliveryStatus, Entity as OutboxEvent};
pub use peer_health::Entity as PeerHealth;
pub use stream_counter::Entity as StreamCounter;
pub use stream_position::Entity as StreamPosition;
