use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use sts_core_types::{DetailSnapshot, SyncError, SystemId};
use sts_scheduler::{PollConfig, PollState, PollingScheduler, Refresh, SchedulerError};
use tracing::{debug, warn};

use crate::api::{DetailRequest, SystemSource};
use crate::metrics;
use crate::model::SystemRecord;

/// Detail poller of one system.
///
/// Every `start` asks for full history first; once a full response has been
/// applied, later ticks only ask for records from the log's resume position.
/// A response that lands after `stop` is still applied to the record.
pub struct SyncEngine {
    scheduler: PollingScheduler,
    full_reload: Arc<AtomicBool>,
}

impl SyncEngine {
    pub(crate) fn new(
        record: Weak<SystemRecord>,
        id: SystemId,
        source: Arc<dyn SystemSource>,
        config: PollConfig,
    ) -> Self {
        let full_reload = Arc::new(AtomicBool::new(true));
        let target = DetailRefresh {
            source,
            record,
            id,
            full_reload: Arc::clone(&full_reload),
        };
        Self {
            scheduler: PollingScheduler::new(Arc::new(target), config),
            full_reload,
        }
    }

    /// Fetch full detail now, then keep polling. Restarts a running engine.
    pub fn start(&self) -> Result<(), SchedulerError> {
        self.full_reload.store(true, Ordering::SeqCst);
        self.scheduler.start(true)
    }

    pub fn stop(&self) -> bool {
        self.scheduler.stop()
    }

    pub fn state(&self) -> PollState {
        self.scheduler.state()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn interval(&self) -> Duration {
        self.scheduler.interval()
    }

    pub async fn refresh_now(&self) -> Result<(), SyncError> {
        self.scheduler.refresh_now().await
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state())
            .field("full_reload", &self.full_reload.load(Ordering::SeqCst))
            .finish()
    }
}

struct DetailRefresh {
    source: Arc<dyn SystemSource>,
    record: Weak<SystemRecord>,
    id: SystemId,
    full_reload: Arc<AtomicBool>,
}

impl DetailRefresh {
    fn record(&self) -> Result<Arc<SystemRecord>, SyncError> {
        self.record
            .upgrade()
            .ok_or_else(|| SyncError::UnknownSystem(self.id.clone()))
    }
}

#[async_trait]
impl Refresh for DetailRefresh {
    fn scope(&self) -> String {
        format!("system:{}", self.id)
    }

    async fn refresh(&self) -> Result<(), SyncError> {
        let request = {
            let record = self.record()?;
            let full = self.full_reload.load(Ordering::SeqCst);
            DetailRequest {
                id: self.id.clone(),
                url: record.attrs().url,
                since: (!full).then(|| record.log().resume_position()),
            }
        };

        let raw = self.source.fetch_detail(&request).await?;
        let snapshot = DetailSnapshot::validate(raw).map_err(|err| {
            metrics::record_malformed("detail");
            warn!(system = %self.id, error = %err, "rejected detail snapshot");
            err
        })?;

        let received = snapshot
            .transitions
            .as_ref()
            .map(|batch| batch.records().len())
            .unwrap_or(0);
        let record = self.record()?;
        let outcome = record.apply_detail(snapshot).map_err(|err| {
            metrics::record_malformed("detail");
            err
        })?;
        if request.since.is_none() {
            self.full_reload.store(false, Ordering::SeqCst);
        }
        metrics::record_detail_refresh();
        debug!(
            system = %self.id,
            received,
            reset = outcome.reset,
            appended = outcome.appended,
            replaced = outcome.replaced,
            "detail applied"
        );
        Ok(())
    }
}
