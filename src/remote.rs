use crate::error::Result;
use crate::types::{MessageRequest, Outcome, RequestId};
use async_trait::async_trait;

/// The backend queue, as seen by the dispatch engine.
///
/// Implementations own transport concerns: base URL, credentials and
/// request timeouts. A timeout is reported like any other failure.
#[async_trait]
pub trait RemoteQueueClient: Send + Sync {
    /// Every request the backend currently lists, in backend order.
    /// Fails with `RelayError::Fetch`.
    async fn fetch_pending(&self) -> Result<Vec<MessageRequest>>;

    /// Report the terminal outcome for `id`. Fails with `RelayError::Push`.
    async fn push_status(&self, id: &RequestId, outcome: Outcome) -> Result<()>;
}
