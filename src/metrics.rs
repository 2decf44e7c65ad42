use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::HeaderValue,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};
use sts_registry::metrics as registry_metrics;
use sts_scheduler::metrics as scheduler_metrics;
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{error, info};

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

/// Scheduler counters live outside prometheus; they are mirrored into
/// gauges on every scrape.
struct SchedulerGauges {
    ticks: IntGauge,
    refreshed: IntGauge,
    failed: IntGauge,
    started: IntGauge,
    stopped: IntGauge,
}

static SCHEDULER_GAUGES: OnceCell<SchedulerGauges> = OnceCell::new();

fn scheduler_gauge(registry: &Registry, name: &str, help: &str) -> Option<IntGauge> {
    let gauge = match IntGauge::new(name, help) {
        Ok(gauge) => gauge,
        Err(err) => {
            error!(?err, name, "failed to create scheduler gauge");
            return None;
        }
    };
    if let Err(err) = registry.register(Box::new(gauge.clone())) {
        error!(?err, name, "failed to register scheduler gauge");
        return None;
    }
    Some(gauge)
}

fn scheduler_gauges(registry: &Registry) -> Option<SchedulerGauges> {
    Some(SchedulerGauges {
        ticks: scheduler_gauge(registry, "sts_scheduler_ticks", "Poll ticks fired")?,
        refreshed: scheduler_gauge(
            registry,
            "sts_scheduler_refreshed",
            "Refreshes that succeeded",
        )?,
        failed: scheduler_gauge(registry, "sts_scheduler_failed", "Refreshes that failed")?,
        started: scheduler_gauge(registry, "sts_scheduler_started", "Poller starts")?,
        stopped: scheduler_gauge(registry, "sts_scheduler_stopped", "Poller stops")?,
    })
}

fn sync_scheduler_gauges() {
    if let Some(gauges) = SCHEDULER_GAUGES.get() {
        let snapshot = scheduler_metrics::snapshot();
        gauges.ticks.set(snapshot.ticks as i64);
        gauges.refreshed.set(snapshot.refreshed as i64);
        gauges.failed.set(snapshot.failed as i64);
        gauges.started.set(snapshot.started as i64);
        gauges.stopped.set(snapshot.stopped as i64);
    }
}

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        registry_metrics::register_metrics(registry);
        if let Some(gauges) = scheduler_gauges(registry) {
            let _ = SCHEDULER_GAUGES.set(gauges);
        }
    });
}

pub fn spawn_metrics_server(port: u16) -> Option<JoinHandle<()>> {
    if port == 0 {
        return None;
    }

    register_metrics();
    let registry = Arc::new(global_registry().clone());
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry);

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(%addr, "metrics server listening");
    Some(tokio::spawn(async move {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(err) = axum::serve(listener, app.into_make_service()).await {
                    error!(?err, "metrics server exited with error");
                }
            }
            Err(err) => {
                error!(?err, "failed to bind metrics listener");
            }
        }
    }))
}

/// Prometheus text exposition of everything registered so far.
pub fn render(registry: &Registry) -> Result<String, String> {
    sync_scheduler_gauges();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .map_err(|err| format!("metric encode error: {err}"))?;
    String::from_utf8(buffer).map_err(|err| format!("metric utf8 error: {err}"))
}

async fn metrics_handler(State(registry): State<Arc<Registry>>) -> Response {
    let format_type = TextEncoder::new().format_type().to_string();
    match render(&registry) {
        Ok(body) => match HeaderValue::from_str(&format_type) {
            Ok(value) => ([(axum::http::header::CONTENT_TYPE, value)], body).into_response(),
            Err(err) => {
                error!(?err, "failed to build content-type header");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "metric encode error",
                )
                    .into_response()
            }
        },
        Err(err) => {
            error!(%err, "failed to encode prometheus metrics");
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "metric encode error",
            )
                .into_response()
        }
    }
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}
