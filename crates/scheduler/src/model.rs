use std::time::Duration;

use crate::error::SchedulerError;

/// Roster staleness tolerance.
pub const DEFAULT_ROSTER_INTERVAL: Duration = Duration::from_secs(30);
/// Detail staleness tolerance for the visible system.
pub const DEFAULT_DETAIL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollState {
    Idle,
    Running,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollConfig {
    interval: Duration,
}

impl PollConfig {
    pub fn new(interval: Duration) -> Result<Self, SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::ZeroInterval);
        }
        Ok(Self { interval })
    }

    pub fn roster() -> Self {
        Self {
            interval: DEFAULT_ROSTER_INTERVAL,
        }
    }

    pub fn detail() -> Self {
        Self {
            interval: DEFAULT_DETAIL_INTERVAL,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::detail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_is_rejected() {
        assert_eq!(
            PollConfig::new(Duration::ZERO),
            Err(SchedulerError::ZeroInterval)
        );
    }

    #[test]
    fn roster_polls_less_often_than_detail() {
        assert!(PollConfig::roster().interval() > PollConfig::detail().interval());
    }
}
