use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use sts_core_types::{RosterSnapshot, SyncError, SystemId};
use sts_event_bus::{Subscription, Topic};
use sts_scheduler::{
    PollConfig, PollingScheduler, Refresh, SchedulerError, DEFAULT_DETAIL_INTERVAL,
    DEFAULT_ROSTER_INTERVAL,
};
use tracing::{info, warn};

use crate::api::SystemSource;
use crate::metrics;
use crate::model::{SystemChange, SystemRecord};

/// Membership notifications, delivered in snapshot order.
#[derive(Clone, Debug)]
pub enum RosterEvent {
    /// First successful load: the whole roster as one ordered batch.
    Reset(Vec<Arc<SystemRecord>>),
    Added(Arc<SystemRecord>),
    Updated(Arc<SystemRecord>),
}

impl RosterEvent {
    pub fn records(&self) -> Vec<Arc<SystemRecord>> {
        match self {
            RosterEvent::Reset(records) => records.clone(),
            RosterEvent::Added(record) | RosterEvent::Updated(record) => vec![Arc::clone(record)],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Keep the roster polled in the background.
    pub poll: bool,
    pub roster_interval: Duration,
    pub detail_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            poll: true,
            roster_interval: DEFAULT_ROSTER_INTERVAL,
            detail_interval: DEFAULT_DETAIL_INTERVAL,
        }
    }
}

impl RegistryConfig {
    pub fn with_intervals(roster_interval: Duration, detail_interval: Duration) -> Self {
        Self {
            roster_interval,
            detail_interval,
            ..Self::default()
        }
    }

    /// Roster and detail poll configs; both intervals must be positive.
    pub fn validate(&self) -> Result<(PollConfig, PollConfig), SchedulerError> {
        Ok((
            PollConfig::new(self.roster_interval)?,
            PollConfig::new(self.detail_interval)?,
        ))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub reset: bool,
    pub added: usize,
    pub updated: usize,
    /// Known systems the snapshot left out. They are kept.
    pub retained: usize,
}

/// Authoritative set of known systems, ordered like the latest roster.
pub struct SystemRegistry {
    systems: DashMap<SystemId, Arc<SystemRecord>>,
    order: RwLock<Vec<SystemId>>,
    loaded: AtomicBool,
    delivery: ReentrantMutex<()>,
    apply_lock: Mutex<()>,
    source: Arc<dyn SystemSource>,
    detail: PollConfig,
    poll: bool,
    events: Topic<RosterEvent>,
    poller: PollingScheduler,
}

impl SystemRegistry {
    pub fn new(
        source: Arc<dyn SystemSource>,
        config: RegistryConfig,
    ) -> Result<Arc<Self>, SchedulerError> {
        let (roster, detail) = config.validate()?;
        Ok(Arc::new_cyclic(|weak: &Weak<SystemRegistry>| Self {
            systems: DashMap::new(),
            order: RwLock::new(Vec::new()),
            loaded: AtomicBool::new(false),
            delivery: ReentrantMutex::new(()),
            apply_lock: Mutex::new(()),
            source,
            detail,
            poll: config.poll,
            events: Topic::new(),
            poller: PollingScheduler::new(
                Arc::new(RosterRefresh {
                    registry: weak.clone(),
                }),
                roster,
            ),
        }))
    }

    /// Build a registry and, when the config asks for it, start roster
    /// polling right away.
    pub fn spawn(
        source: Arc<dyn SystemSource>,
        config: RegistryConfig,
    ) -> Result<Arc<Self>, SchedulerError> {
        let registry = Self::new(source, config)?;
        if registry.poll {
            registry.start_polling()?;
        }
        Ok(registry)
    }

    pub fn start_polling(&self) -> Result<(), SchedulerError> {
        self.poller.start(true)
    }

    pub fn stop_polling(&self) -> bool {
        self.poller.stop()
    }

    pub fn poller(&self) -> &PollingScheduler {
        &self.poller
    }

    /// Fetch the roster once and apply it. Failures leave membership as it was.
    pub async fn refresh(&self) -> Result<RefreshOutcome, SyncError> {
        let raw = self.source.fetch_roster().await?;
        let snapshot = RosterSnapshot::validate(raw).map_err(|err| {
            metrics::record_malformed("roster");
            warn!(error = %err, "rejected roster snapshot");
            err
        })?;
        Ok(self.apply_roster(snapshot))
    }

    /// Diff a validated roster against current membership.
    ///
    /// New ids become records, known ids are updated in place, ids the
    /// snapshot omits are kept and ordered after the snapshot's entries.
    ///
    /// Notifications go out after the merge lock is released, attribute
    /// changes first. Concurrent refreshes deliver their notifications one
    /// whole refresh at a time, in merge order.
    pub fn apply_roster(&self, snapshot: RosterSnapshot) -> RefreshOutcome {
        let _delivery = self.delivery.lock();
        let merged = {
            let _guard = self.apply_lock.lock();
            self.merge_roster(snapshot)
        };
        let Merged {
            outcome,
            batch,
            changes,
            events,
        } = merged;

        for (record, change) in &changes {
            record.emit_change(change);
        }
        if outcome.reset {
            info!(systems = batch.len(), "roster loaded");
            self.events.emit(&RosterEvent::Reset(batch));
        } else {
            for event in &events {
                self.events.emit(event);
            }
        }
        outcome
    }

    fn merge_roster(&self, snapshot: RosterSnapshot) -> Merged {
        let mut outcome = RefreshOutcome {
            reset: !self.loaded.load(Ordering::SeqCst),
            ..RefreshOutcome::default()
        };
        let mut batch = Vec::with_capacity(snapshot.entries.len());
        let mut events = Vec::with_capacity(snapshot.entries.len());
        let mut changes = Vec::new();
        let mut ordered = Vec::with_capacity(snapshot.entries.len());
        let mut seen = HashSet::new();

        for entry in snapshot.entries {
            if !seen.insert(entry.id.clone()) {
                warn!(system = %entry.id, "duplicate id in roster; keeping first entry");
                continue;
            }
            ordered.push(entry.id.clone());
            let existing = self
                .systems
                .get(&entry.id)
                .map(|record| Arc::clone(record.value()));
            let record = match existing {
                Some(record) => {
                    if let Some(change) = record.merge_attrs(entry.attrs) {
                        changes.push((Arc::clone(&record), change));
                    }
                    outcome.updated += 1;
                    events.push(RosterEvent::Updated(Arc::clone(&record)));
                    record
                }
                None => {
                    let id = entry.id.clone();
                    let record = SystemRecord::new(entry, Arc::clone(&self.source), self.detail);
                    self.systems.insert(id, Arc::clone(&record));
                    outcome.added += 1;
                    events.push(RosterEvent::Added(Arc::clone(&record)));
                    record
                }
            };
            batch.push(record);
        }

        {
            let mut order = self.order.write();
            let retained: Vec<SystemId> = order
                .iter()
                .filter(|id| !seen.contains(*id))
                .cloned()
                .collect();
            outcome.retained = retained.len();
            ordered.extend(retained);
            *order = ordered;
        }
        self.loaded.store(true, Ordering::SeqCst);
        metrics::set_system_count(self.systems.len());
        metrics::record_roster_refresh();
        Merged {
            outcome,
            batch,
            changes,
            events,
        }
    }

    pub fn get(&self, id: &SystemId) -> Option<Arc<SystemRecord>> {
        self.systems.get(id).map(|record| Arc::clone(record.value()))
    }

    /// Look up a record, failing with `UnknownSystem` when it is absent.
    pub fn require(&self, id: &SystemId) -> Result<Arc<SystemRecord>, SyncError> {
        self.get(id)
            .ok_or_else(|| SyncError::UnknownSystem(id.clone()))
    }

    /// Records in roster order.
    pub fn records(&self) -> Vec<Arc<SystemRecord>> {
        self.order
            .read()
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    pub fn ids(&self) -> Vec<SystemId> {
        self.order.read().clone()
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn visible(&self) -> Vec<Arc<SystemRecord>> {
        self.records()
            .into_iter()
            .filter(|record| record.is_visible())
            .collect()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RosterEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn events(&self) -> &Topic<RosterEvent> {
        &self.events
    }

    /// Stop every poller and forget all records. The next successful
    /// refresh loads the roster from scratch.
    pub fn shutdown(&self) {
        let _guard = self.apply_lock.lock();
        self.poller.stop();
        for entry in self.systems.iter() {
            entry.value().sync().stop();
        }
        self.systems.clear();
        self.order.write().clear();
        self.loaded.store(false, Ordering::SeqCst);
        metrics::set_system_count(0);
    }
}

impl std::fmt::Debug for SystemRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemRegistry")
            .field("systems", &self.len())
            .field("loaded", &self.is_loaded())
            .field("poller", &self.poller)
            .finish()
    }
}

struct Merged {
    outcome: RefreshOutcome,
    batch: Vec<Arc<SystemRecord>>,
    changes: Vec<(Arc<SystemRecord>, SystemChange)>,
    events: Vec<RosterEvent>,
}

struct RosterRefresh {
    registry: Weak<SystemRegistry>,
}

#[async_trait]
impl Refresh for RosterRefresh {
    fn scope(&self) -> String {
        "roster".to_string()
    }

    async fn refresh(&self) -> Result<(), SyncError> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| SyncError::scheduler("registry dropped"))?;
        registry.refresh().await.map(|_| ())
    }
}
