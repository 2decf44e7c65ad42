use parking_lot::{ReentrantMutex, RwLock};
use sts_core_types::{TransitionBatch, TransitionRecord};
use sts_event_bus::{Subscription, Topic};
use tracing::warn;

use crate::stats::DurationStats;

/// Change notifications from a [`TransitionLog`]. Every variant carries the
/// stats of the log after the change so a renderer can rescale its bars.
#[derive(Clone, Debug)]
pub enum LogEvent {
    Reset {
        records: Vec<TransitionRecord>,
        stats: DurationStats,
    },
    Appended {
        position: usize,
        record: TransitionRecord,
        stats: DurationStats,
    },
    Replaced {
        position: usize,
        record: TransitionRecord,
        stats: DurationStats,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub reset: bool,
    pub appended: usize,
    pub replaced: usize,
    pub skipped: usize,
}

#[derive(Default)]
struct LogState {
    records: Vec<TransitionRecord>,
    stats: DurationStats,
}

impl LogState {
    fn reset(&mut self, records: Vec<TransitionRecord>, events: &mut Vec<LogEvent>) {
        self.stats = DurationStats::from_records(&records);
        self.records = records;
        events.push(LogEvent::Reset {
            records: self.records.clone(),
            stats: self.stats,
        });
    }

    fn tail_open(&self) -> bool {
        self.records.last().map(|last| last.in_progress()).unwrap_or(false)
    }

    /// Only the most recent record may be in progress, so nothing is
    /// appended behind an open tail.
    fn append(&mut self, record: TransitionRecord, events: &mut Vec<LogEvent>) -> Option<usize> {
        if self.tail_open() {
            return None;
        }
        let position = self.records.len();
        self.records.push(record.clone());
        self.stats = DurationStats::from_records(&self.records);
        events.push(LogEvent::Appended {
            position,
            record,
            stats: self.stats,
        });
        Some(position)
    }

    fn replace_open(
        &mut self,
        position: usize,
        record: TransitionRecord,
        events: &mut Vec<LogEvent>,
    ) -> bool {
        match self.records.get_mut(position) {
            Some(slot) if slot.in_progress() => {
                *slot = record.clone();
                self.stats = DurationStats::from_records(&self.records);
                events.push(LogEvent::Replaced {
                    position,
                    record,
                    stats: self.stats,
                });
                true
            }
            _ => false,
        }
    }
}

/// Chronological transition history of one system.
///
/// Mutations happen under a write lock; notifications are delivered after
/// the lock is released. Delivery holds a reentrant lock from before the
/// mutation until the last listener returns, so listeners observe events in
/// the order the mutations happened even across threads.
#[derive(Default)]
pub struct TransitionLog {
    delivery: ReentrantMutex<()>,
    state: RwLock<LogState>,
    events: Topic<LogEvent>,
}

impl TransitionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutate<R>(&self, apply: impl FnOnce(&mut LogState, &mut Vec<LogEvent>) -> R) -> R {
        let _delivery = self.delivery.lock();
        let mut events = Vec::new();
        let result = {
            let mut state = self.state.write();
            apply(&mut state, &mut events)
        };
        for event in &events {
            self.events.emit(event);
        }
        result
    }

    /// Replace the whole log and fire a single `Reset`.
    pub fn reset_all(&self, records: Vec<TransitionRecord>) {
        self.mutate(|state, events| state.reset(records, events));
    }

    /// Add one record at the chronological end and fire `Appended`.
    /// Returns `None` without touching the log while the tail is still in
    /// progress.
    pub fn append_one(&self, record: TransitionRecord) -> Option<usize> {
        let position = self.mutate(|state, events| state.append(record, events));
        if position.is_none() {
            warn!("append behind an open transition rejected");
        }
        position
    }

    /// Overwrite the record at `position` if it is still in progress.
    /// Completed records are immutable; returns false for them.
    pub fn replace_in_progress(&self, position: usize, record: TransitionRecord) -> bool {
        self.mutate(|state, events| state.replace_open(position, record, events))
    }

    pub fn apply_batch(&self, batch: TransitionBatch) -> BatchOutcome {
        self.mutate(|state, events| match batch {
            TransitionBatch::Full(records) => {
                state.reset(records, events);
                BatchOutcome {
                    reset: true,
                    ..BatchOutcome::default()
                }
            }
            TransitionBatch::Since { offset, records } => {
                let mut outcome = BatchOutcome::default();
                let total = records.len();
                for (index, record) in records.into_iter().enumerate() {
                    let position = offset + index;
                    let len = state.records.len();
                    if position < len {
                        if state.replace_open(position, record, events) {
                            outcome.replaced += 1;
                        } else {
                            outcome.skipped += 1;
                        }
                    } else if position == len && state.append(record, events).is_some() {
                        outcome.appended += 1;
                    } else {
                        warn!(
                            position,
                            len,
                            open_tail = state.tail_open(),
                            "gap in incremental transitions; discarding rest of batch"
                        );
                        outcome.skipped += total - index;
                        break;
                    }
                }
                outcome
            }
        })
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }

    pub fn records(&self) -> Vec<TransitionRecord> {
        self.state.read().records.clone()
    }

    /// Presentation order: most recent first.
    pub fn newest_first(&self) -> Vec<TransitionRecord> {
        self.state.read().records.iter().rev().cloned().collect()
    }

    pub fn latest(&self) -> Option<TransitionRecord> {
        self.state.read().records.last().cloned()
    }

    pub fn current_state(&self) -> Option<String> {
        self.state
            .read()
            .records
            .last()
            .map(|record| record.state.clone())
    }

    pub fn stats(&self) -> DurationStats {
        self.state.read().stats
    }

    pub fn max_duration(&self) -> Option<f64> {
        self.state.read().stats.max_duration()
    }

    pub fn percentage(&self, position: usize) -> Option<f64> {
        let state = self.state.read();
        state
            .records
            .get(position)
            .and_then(|record| state.stats.percentage(record))
    }

    /// Position an incremental fetch should start from: the open tail if
    /// there is one, otherwise the end of the log.
    pub fn resume_position(&self) -> usize {
        let state = self.state.read();
        match state.records.last() {
            Some(last) if last.in_progress() => state.records.len() - 1,
            _ => state.records.len(),
        }
    }

    pub fn events(&self) -> &Topic<LogEvent> {
        &self.events
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&LogEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn on_reset<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[TransitionRecord], &DurationStats) + Send + Sync + 'static,
    {
        self.events.subscribe(move |event| {
            if let LogEvent::Reset { records, stats } = event {
                listener(records, stats);
            }
        })
    }

    pub fn on_append<F>(&self, listener: F) -> Subscription
    where
        F: Fn(usize, &TransitionRecord, &DurationStats) + Send + Sync + 'static,
    {
        self.events.subscribe(move |event| {
            if let LogEvent::Appended {
                position,
                record,
                stats,
            } = event
            {
                listener(*position, record, stats);
            }
        })
    }
}

impl std::fmt::Debug for TransitionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionLog")
            .field("len", &self.len())
            .field("max_duration", &self.max_duration())
            .finish()
    }
}
