//! Core sequencing, ingestion and delivery logic for courier.

pub mod services;

pub use services::*;
