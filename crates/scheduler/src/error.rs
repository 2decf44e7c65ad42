use sts_core_types::SyncError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("polling interval must be positive")]
    ZeroInterval,
    #[error("no tokio runtime available to drive polling")]
    NoRuntime,
}

impl From<SchedulerError> for SyncError {
    fn from(value: SchedulerError) -> Self {
        SyncError::scheduler(value.to_string())
    }
}
