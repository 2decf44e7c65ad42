use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    refreshed: AtomicU64,
    failed: AtomicU64,
    started: AtomicU64,
    stopped: AtomicU64,
}

static COUNTERS: Lazy<Counters> = Lazy::new(Counters::default);

fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn record_tick() {
    increment(&COUNTERS.ticks);
}

pub fn record_refreshed() {
    increment(&COUNTERS.refreshed);
}

pub fn record_failed() {
    increment(&COUNTERS.failed);
}

pub fn record_started() {
    increment(&COUNTERS.started);
}

pub fn record_stopped() {
    increment(&COUNTERS.stopped);
}

#[derive(Clone, Debug, Default)]
pub struct SchedulerMetricsSnapshot {
    pub ticks: u64,
    pub refreshed: u64,
    pub failed: u64,
    pub started: u64,
    pub stopped: u64,
}

pub fn snapshot() -> SchedulerMetricsSnapshot {
    SchedulerMetricsSnapshot {
        ticks: COUNTERS.ticks.load(Ordering::Relaxed),
        refreshed: COUNTERS.refreshed.load(Ordering::Relaxed),
        failed: COUNTERS.failed.load(Ordering::Relaxed),
        started: COUNTERS.started.load(Ordering::Relaxed),
        stopped: COUNTERS.stopped.load(Ordering::Relaxed),
    }
}
