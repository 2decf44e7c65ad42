use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use sts_core_types::{SyncError, SystemId};
use sts_event_bus::{Subscription, Topic};
use tracing::{debug, info, warn};

use crate::metrics;
use crate::model::SystemRecord;
use crate::state::SystemRegistry;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewEvent {
    Activated {
        id: SystemId,
        previous: Option<SystemId>,
    },
    Deactivated {
        id: SystemId,
    },
}

struct Watch {
    record: Weak<SystemRecord>,
    _subscription: Subscription,
}

/// Keeps at most one system active.
///
/// The coordinator listens to the visibility topic of every record in the
/// registry. A record turning visible becomes the active one: the previous
/// active record's engine is stopped and its flag cleared before the new
/// engine starts, all under one lock. Visibility notifications carrying
/// `false` are ignored.
pub struct ActiveViewCoordinator {
    registry: Arc<SystemRegistry>,
    active: Mutex<Option<Arc<SystemRecord>>>,
    watches: DashMap<SystemId, Watch>,
    roster: Mutex<Option<Subscription>>,
    events: Topic<ViewEvent>,
}

impl ActiveViewCoordinator {
    pub fn attach(registry: Arc<SystemRegistry>) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            registry: Arc::clone(&registry),
            active: Mutex::new(None),
            watches: DashMap::new(),
            roster: Mutex::new(None),
            events: Topic::new(),
        });

        let weak = Arc::downgrade(&coordinator);
        let subscription = registry.subscribe(move |event| {
            if let Some(coordinator) = weak.upgrade() {
                for record in event.records() {
                    coordinator.watch(&record);
                }
            }
        });
        *coordinator.roster.lock() = Some(subscription);

        for record in registry.records() {
            coordinator.watch(&record);
        }
        coordinator
    }

    fn watch(self: &Arc<Self>, record: &Arc<SystemRecord>) {
        let watched = self
            .watches
            .get(record.id())
            .and_then(|watch| watch.record.upgrade())
            .map(|known| Arc::ptr_eq(&known, record))
            .unwrap_or(false);
        if watched {
            return;
        }

        let coordinator = Arc::downgrade(self);
        let target = Arc::downgrade(record);
        let subscription = record.on_visibility_change(move |change| {
            if !change.visible {
                return;
            }
            if let (Some(coordinator), Some(record)) = (coordinator.upgrade(), target.upgrade()) {
                coordinator.activate(record);
            }
        });
        self.watches.insert(
            record.id().clone(),
            Watch {
                record: Arc::downgrade(record),
                _subscription: subscription,
            },
        );
        debug!(system = %record.id(), "watching visibility");

        if record.is_visible() {
            let adopt = self.active.lock().is_none();
            if adopt {
                self.activate(Arc::clone(record));
            } else if !self.is_active(record) {
                record.set_visible(false);
            }
        }
    }

    fn is_active(&self, record: &Arc<SystemRecord>) -> bool {
        self.active
            .lock()
            .as_ref()
            .map(|active| Arc::ptr_eq(active, record))
            .unwrap_or(false)
    }

    fn activate(&self, record: Arc<SystemRecord>) {
        let (previous, previous_cleared, announce) = {
            let mut active = self.active.lock();
            if let Some(current) = active.as_ref() {
                if Arc::ptr_eq(current, &record) {
                    return;
                }
            }
            let previous = active.take();
            let previous_cleared = previous
                .as_ref()
                .map(|previous| {
                    previous.sync().stop();
                    previous.swap_visible(false)
                })
                .unwrap_or(false);
            let announce = record.swap_visible(true);
            if let Err(err) = record.sync().start() {
                warn!(system = %record.id(), error = %err, "detail polling did not start");
            }
            *active = Some(Arc::clone(&record));
            (previous, previous_cleared, announce)
        };

        if let Some(previous) = &previous {
            if previous_cleared {
                previous.announce_visibility(false);
            }
            info!(system = %previous.id(), "system deactivated");
            self.events.emit(&ViewEvent::Deactivated {
                id: previous.id().clone(),
            });
        }
        if announce {
            record.announce_visibility(true);
        }
        metrics::record_active_switch();
        info!(system = %record.id(), name = %record.name(), "system activated");
        self.events.emit(&ViewEvent::Activated {
            id: record.id().clone(),
            previous: previous.map(|previous| previous.id().clone()),
        });
    }

    /// Make `id` the visible system.
    pub fn select(&self, id: &SystemId) -> Result<(), SyncError> {
        let record = self.registry.require(id)?;
        record.set_visible(true);
        self.activate(record);
        Ok(())
    }

    /// Deactivate the current system, leaving none visible.
    pub fn clear(&self) -> Option<SystemId> {
        let (previous, cleared) = {
            let mut active = self.active.lock();
            let previous = active.take()?;
            previous.sync().stop();
            let cleared = previous.swap_visible(false);
            (previous, cleared)
        };
        if cleared {
            previous.announce_visibility(false);
        }
        info!(system = %previous.id(), "system deactivated");
        self.events.emit(&ViewEvent::Deactivated {
            id: previous.id().clone(),
        });
        Some(previous.id().clone())
    }

    pub fn active(&self) -> Option<Arc<SystemRecord>> {
        self.active.lock().clone()
    }

    pub fn active_id(&self) -> Option<SystemId> {
        self.active.lock().as_ref().map(|record| record.id().clone())
    }

    /// Engines currently polling across the registry. Never more than one.
    pub fn running_engines(&self) -> usize {
        self.registry
            .records()
            .iter()
            .filter(|record| record.sync().is_running())
            .count()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ViewEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn events(&self) -> &Topic<ViewEvent> {
        &self.events
    }

    /// Stop the active engine and drop every subscription this
    /// coordinator holds.
    pub fn detach(&self) {
        self.roster.lock().take();
        self.watches.clear();
        self.clear();
    }
}

impl std::fmt::Debug for ActiveViewCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveViewCoordinator")
            .field("active", &self.active_id())
            .field("watching", &self.watches.len())
            .finish()
    }
}
