use lazy_static::lazy_static;
use prometheus::{core::Collector, opts, IntCounter, IntCounterVec, IntGauge, Registry};
use tracing::error;

lazy_static! {
    static ref REGISTRY_SYSTEMS_TOTAL: IntGauge =
        IntGauge::new("sts_registry_systems_total", "Systems tracked by the registry").unwrap();
    static ref REGISTRY_ROSTER_REFRESH: IntCounter = IntCounter::new(
        "sts_registry_roster_refresh_total",
        "Roster snapshots applied",
    )
    .unwrap();
    static ref REGISTRY_DETAIL_REFRESH: IntCounter = IntCounter::new(
        "sts_registry_detail_refresh_total",
        "Detail snapshots applied",
    )
    .unwrap();
    static ref REGISTRY_MALFORMED_SNAPSHOTS: IntCounterVec = IntCounterVec::new(
        opts!(
            "sts_registry_malformed_snapshots_total",
            "Rejected snapshots grouped by scope"
        ),
        &["scope"]
    )
    .unwrap();
    static ref REGISTRY_ACTIVE_SWITCHES: IntCounter = IntCounter::new(
        "sts_registry_active_switches_total",
        "Times the active system changed",
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register registry metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, REGISTRY_SYSTEMS_TOTAL.clone());
    register(registry, REGISTRY_ROSTER_REFRESH.clone());
    register(registry, REGISTRY_DETAIL_REFRESH.clone());
    register(registry, REGISTRY_MALFORMED_SNAPSHOTS.clone());
    register(registry, REGISTRY_ACTIVE_SWITCHES.clone());
}

pub fn set_system_count(count: usize) {
    REGISTRY_SYSTEMS_TOTAL.set(count as i64);
}

pub fn record_roster_refresh() {
    REGISTRY_ROSTER_REFRESH.inc();
}

pub fn record_detail_refresh() {
    REGISTRY_DETAIL_REFRESH.inc();
}

pub fn record_malformed(scope: &str) {
    REGISTRY_MALFORMED_SNAPSHOTS
        .with_label_values(&[scope])
        .inc();
}

pub fn record_active_switch() {
    REGISTRY_ACTIVE_SWITCHES.inc();
}
