//! Per-stream sequence issuance.

use std::sync::Arc;

use courier_common::{AppError, AppResult};
use courier_db::store::SequenceStore;
use tracing::debug;

use super::validation::MAX_ID_LEN;

/// Issues monotonically increasing sequence numbers for local streams.
///
/// Values are unique per stream even under concurrent callers. A caller that
/// reserves a value and then fails leaves a gap, which is allowed for
/// outgoing streams.
#[derive(Clone)]
pub struct SequenceService {
    store: Arc<dyn SequenceStore>,
}

impl SequenceService {
    #[must_use]
    pub fn new(store: Arc<dyn SequenceStore>) -> Self {
        Self { store }
    }

    /// Issue the next sequence for `stream_id`.
    pub async fn next_sequence(&self, stream_id: &str) -> AppResult<u64> {
        check_stream_id(stream_id)?;
        let sequence = self.store.next_sequence(stream_id).await?;
        debug!(stream_id, sequence, "Issued sequence");
        u64::try_from(sequence)
            .map_err(|_| AppError::InvariantViolation(format!("negative sequence {sequence}")))
    }

    /// Last sequence issued for `stream_id`, or 0 if none was.
    pub async fn last_issued(&self, stream_id: &str) -> AppResult<u64> {
        check_stream_id(stream_id)?;
        Ok(self
            .store
            .last_issued(stream_id)
            .await?
            .map_or(0, |s| s.max(0) as u64))
    }
}

fn check_stream_id(stream_id: &str) -> AppResult<()> {
    if stream_id.is_empty() || stream_id.len() > MAX_ID_LEN {
        return Err(AppError::Validation(format!(
            "stream_id must be 1..={MAX_ID_LEN} bytes"
        )));
    }
    Ok(())
}
