//! HTTP API layer for courier.
//!
//! Operator and collaborator endpoints over the outbox, the inbound event
//! store, stream positions, peer health and the archive.
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod encoding;
pub mod endpoints;
pub mod middleware;
pub mod response;

pub use endpoints::router;
pub use middleware::AppState;
