//! ID generation utilities.

use ulid::Ulid;
use uuid::Uuid;

/// ID generator for outbox events and dispatch workers.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new ULID-based event ID.
    ///
    /// ULIDs sort by creation time, so outbox rows listed by ID come back in
    /// roughly production order.
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// Generate a lease owner token for a dispatch worker.
    ///
    /// The random part keeps two workers with the same label (for example after
    /// a restart) from ever holding the same lease.
    #[must_use]
    pub fn generate_worker_id(&self, label: &str) -> String {
        format!("{label}-{}", Uuid::new_v4().simple())
    }
}
