use async_trait::async_trait;
use sts_core_types::SyncError;

/// One data source a [`PollingScheduler`](crate::PollingScheduler) keeps fresh.
///
/// Errors are reported back to the scheduler, which logs and counts them;
/// they never stop polling.
#[async_trait]
pub trait Refresh: Send + Sync {
    /// Label for log lines, e.g. `roster` or `system:42`.
    fn scope(&self) -> String;

    async fn refresh(&self) -> Result<(), SyncError>;
}
