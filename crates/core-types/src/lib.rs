use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod snapshot;

pub use snapshot::{
    DetailSnapshot, RosterEntry, RosterSnapshot, SystemAttrs, TransitionBatch, TransitionRecord,
};

/// Shared error type for the monitor crates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("transport error: {message}")]
    Transport { message: String },
    #[error("malformed snapshot: {reason}")]
    Malformed { reason: String },
    #[error("unknown system {0}")]
    UnknownSystem(SystemId),
    #[error("scheduler error: {message}")]
    Scheduler { message: String },
}

impl SyncError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    pub fn scheduler(message: impl Into<String>) -> Self {
        Self::Scheduler {
            message: message.into(),
        }
    }

    /// Short label used for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Transport { .. } => "transport",
            SyncError::Malformed { .. } => "malformed",
            SyncError::UnknownSystem(_) => "unknown_system",
            SyncError::Scheduler { .. } => "scheduler",
        }
    }
}

/// Server-assigned identity of one tracked state machine.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SystemId(pub String);

impl SystemId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SystemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SystemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for SystemId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_and_string_ids_compare_equal() {
        assert_eq!(SystemId::from(7u64), SystemId::from("7"));
        assert_eq!(SystemId::new("7").to_string(), "7");
    }

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(SyncError::transport("down").kind(), "transport");
        assert_eq!(SyncError::malformed("bad").kind(), "malformed");
        assert_eq!(
            SyncError::UnknownSystem(SystemId::from("x")).to_string(),
            "unknown system x"
        );
    }
}
