pub mod error;
pub mod metrics;
pub mod model;
pub mod refresh;
pub mod runtime;

pub use error::SchedulerError;
pub use model::{PollConfig, PollState, DEFAULT_DETAIL_INTERVAL, DEFAULT_ROSTER_INTERVAL};
pub use refresh::Refresh;
pub use runtime::PollingScheduler;
