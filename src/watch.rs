//! Drives the engine the way a view would: log roster membership, the
//! active system and its transitions as they change.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use sts_core_types::SystemId;
use sts_event_bus::Subscription;
use sts_registry::{
    timestamp_label, ActiveViewCoordinator, BarView, LogEvent, RosterEvent, SystemRecord,
    SystemRegistry, SystemSource, SystemStatus, TransitionStatus, ViewEvent,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;

#[derive(Clone, Debug, PartialEq)]
pub struct RosterLine {
    pub id: SystemId,
    pub name: String,
    pub status: SystemStatus,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransitionRow {
    pub state: String,
    pub status: TransitionStatus,
    pub ratio: Option<f64>,
    pub duration: Option<String>,
    pub started: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OnceReport {
    pub systems: Vec<RosterLine>,
    pub detail: Option<(SystemId, Vec<TransitionRow>)>,
}

pub fn roster_lines(registry: &SystemRegistry) -> Vec<RosterLine> {
    registry
        .records()
        .iter()
        .map(|record| RosterLine {
            id: record.id().clone(),
            name: record.name(),
            status: record.status(),
        })
        .collect()
}

/// Transition rows in presentation order, newest first.
pub fn transition_rows(record: &SystemRecord) -> Vec<TransitionRow> {
    let log = record.log();
    let stats = log.stats();
    log.newest_first()
        .iter()
        .map(|transition| {
            let bar = BarView::for_record(transition, &stats);
            TransitionRow {
                state: transition.state.clone(),
                status: bar.status,
                ratio: bar.ratio,
                duration: bar.label,
                started: timestamp_label(&transition.start_time),
            }
        })
        .collect()
}

fn log_row(id: &SystemId, row: &TransitionRow) {
    info!(
        system = %id,
        state = %row.state,
        status = row.status.as_str(),
        bar = row.ratio.map(|ratio| format!("{:.0}%", ratio * 100.0)).unwrap_or_default(),
        duration = row.duration.as_deref().unwrap_or(""),
        started = %row.started,
        "transition"
    );
}

fn log_roster_line(line: &RosterLine) {
    info!(system = %line.id, name = %line.name, status = ?line.status, "system");
}

/// Fetch the roster, and the configured system's detail if any, once.
pub async fn run_once(source: Arc<dyn SystemSource>, config: &MonitorConfig) -> Result<OnceReport> {
    let registry_config = sts_registry::RegistryConfig {
        poll: false,
        ..config.registry_config()
    };
    let registry =
        SystemRegistry::new(source, registry_config).context("invalid polling intervals")?;
    registry.refresh().await.context("fetching roster")?;

    let mut report = OnceReport {
        systems: roster_lines(&registry),
        detail: None,
    };
    report.systems.iter().for_each(log_roster_line);

    if let Some(id) = config.initial_system() {
        let record = registry.require(&id)?;
        record
            .sync()
            .refresh_now()
            .await
            .with_context(|| format!("fetching detail of system {id}"))?;
        let rows = transition_rows(&record);
        rows.iter().for_each(|row| log_row(&id, row));
        report.detail = Some((id, rows));
    }

    registry.shutdown();
    Ok(report)
}

struct LogFeed {
    id: SystemId,
    _subscription: Subscription,
    events: UnboundedReceiver<LogEvent>,
}

async fn next_log_event(feed: &mut Option<LogFeed>) -> Option<LogEvent> {
    match feed {
        Some(feed) => feed.events.recv().await,
        None => std::future::pending().await,
    }
}

fn report_log_event(record: &SystemRecord, event: &LogEvent) {
    match event {
        LogEvent::Reset { records, .. } => {
            info!(system = %record.id(), transitions = records.len(), "transition log loaded");
            for row in transition_rows(record) {
                log_row(record.id(), &row);
            }
        }
        LogEvent::Appended { position, .. } | LogEvent::Replaced { position, .. } => {
            let rows = transition_rows(record);
            // Rows are newest first.
            if let Some(row) = rows.len().checked_sub(position + 1).and_then(|i| rows.get(i)) {
                log_row(record.id(), row);
            }
        }
    }
}

/// Keep polling until `shutdown` resolves.
pub async fn run_live<F>(
    source: Arc<dyn SystemSource>,
    config: &MonitorConfig,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let registry = SystemRegistry::new(source, config.registry_config())
        .context("invalid polling intervals")?;
    let coordinator = ActiveViewCoordinator::attach(Arc::clone(&registry));
    let (_roster_subscription, mut roster_events) = registry.events().channel();
    let (_view_subscription, mut view_events) = coordinator.events().channel();
    let mut pending = config.initial_system();
    let mut feed: Option<LogFeed> = None;

    if config.poll_roster {
        registry.start_polling()?;
    } else if let Err(err) = registry.refresh().await {
        warn!(error = %err, "initial roster fetch failed");
    }

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutting down");
                break;
            }
            Some(event) = roster_events.recv() => {
                match &event {
                    RosterEvent::Reset(_) => roster_lines(&registry).iter().for_each(log_roster_line),
                    RosterEvent::Added(record) => {
                        info!(system = %record.id(), name = %record.name(), "system added");
                    }
                    RosterEvent::Updated(record) => {
                        debug!(system = %record.id(), status = ?record.status(), "system updated");
                    }
                }
                if let Some(id) = pending.clone() {
                    if registry.get(&id).is_some() {
                        pending = None;
                        coordinator.select(&id)?;
                    }
                }
            }
            Some(event) = view_events.recv() => {
                match event {
                    ViewEvent::Activated { id, .. } => {
                        if let Some(record) = registry.get(&id) {
                            info!(system = %id, name = %record.name(), "showing system");
                            let (subscription, events) = record.log().events().channel();
                            for row in transition_rows(&record) {
                                log_row(&id, &row);
                            }
                            feed = Some(LogFeed { id, _subscription: subscription, events });
                        }
                    }
                    ViewEvent::Deactivated { id } => {
                        if feed.as_ref().map(|feed| feed.id == id).unwrap_or(false) {
                            feed = None;
                        }
                    }
                }
            }
            Some(event) = next_log_event(&mut feed) => {
                let record = feed.as_ref().and_then(|feed| registry.get(&feed.id));
                if let Some(record) = record {
                    report_log_event(&record, &event);
                }
            }
        }
    }

    coordinator.detach();
    registry.shutdown();
    Ok(())
}
