//! Live client for server-hosted state transition systems.
//!
//! The engine itself lives in the workspace crates; this crate adds the
//! HTTP data source, configuration, logging bootstrap and the watch loop
//! used by the `sts-monitor` binary.

pub mod config;
pub mod http;
pub mod metrics;
pub mod runtime;
pub mod watch;

pub use config::{ConfigOverrides, MonitorConfig};
pub use http::HttpSource;
pub use watch::{run_live, run_once, OnceReport, RosterLine, TransitionRow};
