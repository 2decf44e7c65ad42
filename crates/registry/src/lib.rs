//! Client-side mirror of server-hosted state machines: the roster of known
//! systems, each system's transition log, and the single active detail view.

pub mod api;
pub mod coordinator;
pub mod log;
pub mod metrics;
pub mod model;
pub mod present;
pub mod state;
pub mod stats;
pub mod sync;

pub use api::{DetailRequest, ScriptedSource, SystemSource};
pub use coordinator::{ActiveViewCoordinator, ViewEvent};
pub use log::{BatchOutcome, LogEvent, TransitionLog};
pub use model::{SyncStatus, SystemChange, SystemRecord, SystemStatus, VisibilityChange};
pub use present::{natural_duration, timestamp_label, BarView, TransitionStatus};
pub use state::{RefreshOutcome, RegistryConfig, RosterEvent, SystemRegistry};
pub use stats::{max_duration, percentage, DurationStats};
pub use sync::SyncEngine;
