use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sts_core_types::{DetailSnapshot, RosterEntry, SyncError, SystemAttrs, SystemId};
use sts_event_bus::{Subscription, Topic};
use sts_scheduler::PollConfig;

use crate::api::SystemSource;
use crate::log::{BatchOutcome, TransitionLog};
use crate::sync::SyncEngine;

/// Attribute change notification. Carries the attributes after the change.
#[derive(Clone, Debug, PartialEq)]
pub struct SystemChange {
    pub id: SystemId,
    pub attrs: SystemAttrs,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VisibilityChange {
    pub id: SystemId,
    pub visible: bool,
}

/// Whether the detail of a system has ever been fetched successfully.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncStatus {
    Loading,
    Ready,
}

/// Roster-level status of a system.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SystemStatus {
    Loading,
    InTransition,
    FailedLastTransition,
    Idle,
}

/// One tracked state machine: server attributes, visibility flag and its
/// transition log.
///
/// Records are shared as `Arc<SystemRecord>` and keep their identity across
/// roster refreshes, so subscriptions taken on a record stay valid for its
/// whole life. A record never clears the visibility of other records; that
/// is the coordinator's job.
pub struct SystemRecord {
    id: SystemId,
    attrs: RwLock<SystemAttrs>,
    visible: AtomicBool,
    synced_at: RwLock<Option<DateTime<Utc>>>,
    log: TransitionLog,
    changes: Topic<SystemChange>,
    visibility: Topic<VisibilityChange>,
    sync: SyncEngine,
}

impl SystemRecord {
    pub fn new(entry: RosterEntry, source: Arc<dyn SystemSource>, detail: PollConfig) -> Arc<Self> {
        let RosterEntry { id, attrs } = entry;
        Arc::new_cyclic(|weak| Self {
            sync: SyncEngine::new(weak.clone(), id.clone(), source, detail),
            id,
            attrs: RwLock::new(attrs),
            visible: AtomicBool::new(false),
            synced_at: RwLock::new(None),
            log: TransitionLog::new(),
            changes: Topic::new(),
            visibility: Topic::new(),
        })
    }

    pub fn id(&self) -> &SystemId {
        &self.id
    }

    pub fn attrs(&self) -> SystemAttrs {
        self.attrs.read().clone()
    }

    pub fn name(&self) -> String {
        self.attrs.read().name.clone()
    }

    pub fn log(&self) -> &TransitionLog {
        &self.log
    }

    pub fn sync(&self) -> &SyncEngine {
        &self.sync
    }

    /// Merge roster-level attributes in place. Fires `on_change` only when
    /// something actually differs; returns whether it did.
    pub fn apply_snapshot(&self, attrs: SystemAttrs) -> bool {
        match self.merge_attrs(attrs) {
            Some(change) => {
                self.emit_change(&change);
                true
            }
            None => false,
        }
    }

    /// Store `attrs` without notifying. Returns the change to announce, if
    /// anything differed.
    pub(crate) fn merge_attrs(&self, attrs: SystemAttrs) -> Option<SystemChange> {
        let mut current = self.attrs.write();
        if *current == attrs {
            return None;
        }
        *current = attrs.clone();
        Some(SystemChange {
            id: self.id.clone(),
            attrs,
        })
    }

    pub(crate) fn emit_change(&self, change: &SystemChange) {
        self.changes.emit(change);
    }

    /// Apply a validated detail response: attributes first, then the
    /// transition batch in the mode the response declared.
    pub fn apply_detail(&self, detail: DetailSnapshot) -> Result<BatchOutcome, SyncError> {
        if detail.entry.id != self.id {
            return Err(SyncError::malformed(format!(
                "detail for {} delivered to {}",
                detail.entry.id, self.id
            )));
        }
        self.apply_snapshot(detail.entry.attrs);
        let outcome = match detail.transitions {
            Some(batch) => self.log.apply_batch(batch),
            None => BatchOutcome::default(),
        };
        *self.synced_at.write() = Some(Utc::now());
        Ok(outcome)
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    /// Set the visibility flag. Fires `on_visibility_change` only on an
    /// actual flip; returns whether one happened.
    pub fn set_visible(&self, visible: bool) -> bool {
        let changed = self.swap_visible(visible);
        if changed {
            self.announce_visibility(visible);
        }
        changed
    }

    pub(crate) fn swap_visible(&self, visible: bool) -> bool {
        self.visible.swap(visible, Ordering::SeqCst) != visible
    }

    pub(crate) fn announce_visibility(&self, visible: bool) {
        self.visibility.emit(&VisibilityChange {
            id: self.id.clone(),
            visible,
        });
    }

    pub fn synced_at(&self) -> Option<DateTime<Utc>> {
        *self.synced_at.read()
    }

    pub fn sync_status(&self) -> SyncStatus {
        if self.synced_at.read().is_some() {
            SyncStatus::Ready
        } else {
            SyncStatus::Loading
        }
    }

    /// A visible system whose detail has not arrived yet reads as loading;
    /// otherwise the roster flags decide.
    pub fn status(&self) -> SystemStatus {
        if self.is_visible() && self.sync_status() == SyncStatus::Loading {
            return SystemStatus::Loading;
        }
        let attrs = self.attrs.read();
        if attrs.in_transition {
            SystemStatus::InTransition
        } else if attrs.failed_last_transition {
            SystemStatus::FailedLastTransition
        } else {
            SystemStatus::Idle
        }
    }

    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SystemChange) + Send + Sync + 'static,
    {
        self.changes.subscribe(listener)
    }

    pub fn on_visibility_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&VisibilityChange) + Send + Sync + 'static,
    {
        self.visibility.subscribe(listener)
    }
}

impl std::fmt::Debug for SystemRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemRecord")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("visible", &self.is_visible())
            .field("log", &self.log)
            .field("sync", &self.sync)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ScriptedSource;
    use parking_lot::Mutex;
    use serde_json::json;
    use sts_core_types::{TransitionBatch, TransitionRecord};

    fn attrs(name: &str) -> SystemAttrs {
        SystemAttrs {
            name: name.to_string(),
            url: None,
            content_type: None,
            created: "2013-04-02T10:00:00".to_string(),
            modified: "2013-04-02T10:00:00".to_string(),
            in_transition: false,
            failed_last_transition: false,
        }
    }

    fn record(id: &str) -> Arc<SystemRecord> {
        SystemRecord::new(
            RosterEntry {
                id: SystemId::from(id),
                attrs: attrs("S1"),
            },
            ScriptedSource::new(),
            PollConfig::detail(),
        )
    }

    #[test]
    fn snapshot_change_notifies_only_on_difference() {
        let record = record("1");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = record.on_change(move |change| sink.lock().push(change.attrs.name.clone()));

        assert!(!record.apply_snapshot(attrs("S1")));
        assert!(record.apply_snapshot(attrs("S1 renamed")));
        assert_eq!(*seen.lock(), vec!["S1 renamed".to_string()]);
    }

    #[test]
    fn visibility_is_separate_from_attribute_changes() {
        let record = record("1");
        let flips = Arc::new(Mutex::new(Vec::new()));
        let attr_changes = Arc::new(Mutex::new(0));
        let _vis = {
            let flips = Arc::clone(&flips);
            record.on_visibility_change(move |change| flips.lock().push(change.visible))
        };
        let _attrs = {
            let attr_changes = Arc::clone(&attr_changes);
            record.on_change(move |_| *attr_changes.lock() += 1)
        };

        assert!(record.set_visible(true));
        assert!(!record.set_visible(true));
        assert!(record.set_visible(false));
        assert_eq!(*flips.lock(), vec![true, false]);
        assert_eq!(*attr_changes.lock(), 0);
    }

    #[test]
    fn detail_with_full_history_resets_log() {
        let record = record("1");
        assert_eq!(record.sync_status(), SyncStatus::Loading);
        assert!(record.synced_at().is_none());
        let detail = DetailSnapshot::validate(json!({
            "id": 1,
            "name": "S1",
            "created": "2013-04-02T10:00:00",
            "modified": "2013-04-02T10:00:00",
            "in_transition": true,
            "transitions": [
                {"state": "start", "duration": 0, "start_time": "t0", "end_time": null, "failed": false}
            ]
        }))
        .unwrap();

        let outcome = record.apply_detail(detail).unwrap();
        assert!(outcome.reset);
        assert_eq!(record.log().len(), 1);
        assert!(record.log().latest().unwrap().in_progress());
        assert_eq!(record.log().percentage(0), None);
        assert_eq!(record.sync_status(), SyncStatus::Ready);
        assert!(record.synced_at().is_some());
        assert_eq!(record.status(), SystemStatus::InTransition);
    }

    #[test]
    fn detail_for_another_system_is_rejected() {
        let record = record("1");
        let detail = DetailSnapshot {
            entry: RosterEntry {
                id: SystemId::from("2"),
                attrs: attrs("S2"),
            },
            transitions: Some(TransitionBatch::Full(vec![TransitionRecord::completed(
                "a", 1.0,
            )])),
        };
        let err = record.apply_detail(detail).unwrap_err();
        assert_eq!(err.kind(), "malformed");
        assert!(record.log().is_empty());
        assert_eq!(record.name(), "S1");
    }

    #[test]
    fn visible_unsynced_system_reads_as_loading() {
        let record = record("1");
        assert_eq!(record.status(), SystemStatus::Idle);
        record.set_visible(true);
        assert_eq!(record.status(), SystemStatus::Loading);
    }
}
