//! Stream position tracking for consumed remote streams.

use std::sync::Arc;

use courier_common::{AppError, AppResult};
use courier_db::entities::{DomainSet, stream_position};
use courier_db::store::StreamPositionStore;
use tracing::debug;

/// Where consumption of each `(origin, stream)` left off.
#[derive(Clone)]
pub struct StreamPositionService {
    store: Arc<dyn StreamPositionStore>,
}

impl StreamPositionService {
    #[must_use]
    pub fn new(store: Arc<dyn StreamPositionStore>) -> Self {
        Self { store }
    }

    /// Ratchet the position forward. Lower values leave it unchanged.
    ///
    /// Returns the position after the call.
    pub async fn advance(&self, origin_domain: &str, stream_id: &str, sequence: i64) -> AppResult<i64> {
        if sequence < 0 {
            return Err(AppError::Validation(format!(
                "sequence must not be negative: {sequence}"
            )));
        }
        let origin = DomainSet::normalize(origin_domain);
        let position = self.store.advance(&origin, stream_id, sequence).await?;
        debug!(origin = %origin, stream = %stream_id, requested = sequence, position, "Advanced stream position");
        Ok(position)
    }

    /// Last fully processed sequence, or 0 when the stream was never consumed.
    pub async fn current_position(&self, origin_domain: &str, stream_id: &str) -> AppResult<i64> {
        Ok(self
            .find(origin_domain, stream_id)
            .await?
            .map_or(0, |p| p.last_sequence))
    }

    pub async fn find(
        &self,
        origin_domain: &str,
        stream_id: &str,
    ) -> AppResult<Option<stream_position::Model>> {
        self.store
            .find(&DomainSet::normalize(origin_domain), stream_id)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use courier_db::memory::MemoryStore;

    #[tokio::test]
    async fn test_position_never_regresses() {
        let service = StreamPositionService::new(Arc::new(MemoryStore::new()));

        assert_eq!(service.current_position("a.example", "notes").await.unwrap(), 0);
        assert_eq!(service.advance("a.example", "notes", 7).await.unwrap(), 7);
        assert_eq!(service.advance("A.example", "notes", 6).await.unwrap(), 7);
        assert_eq!(service.current_position("a.example", "notes").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_negative_sequence_is_rejected() {
        let service = StreamPositionService::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            service.advance("a.example", "notes", -1).await,
            Err(AppError::Validation(_))
        ));
    }
}
