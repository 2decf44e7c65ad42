use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sts_core_types::SyncError;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SchedulerError;
use crate::metrics;
use crate::model::{PollConfig, PollState};
use crate::refresh::Refresh;

struct PollHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Drives one [`Refresh`] target on a fixed interval.
///
/// At most one timer exists per scheduler: `start` on a running scheduler
/// restarts it. Each tick spawns its refresh as a separate task, so a slow
/// response never delays the next tick and `stop` never cancels a fetch that
/// is already in flight.
pub struct PollingScheduler {
    target: Arc<dyn Refresh>,
    config: PollConfig,
    running: Mutex<Option<PollHandle>>,
    ticks: Arc<AtomicU64>,
}

impl PollingScheduler {
    pub fn new(target: Arc<dyn Refresh>, config: PollConfig) -> Self {
        Self {
            target,
            config,
            running: Mutex::new(None),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.config.interval()
    }

    pub fn state(&self) -> PollState {
        let running = self
            .running
            .lock()
            .as_ref()
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false);
        if running {
            PollState::Running
        } else {
            PollState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == PollState::Running
    }

    /// Ticks fired since this scheduler was created.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Start polling. With `immediate`, the first refresh is queued right
    /// away; otherwise it waits one full interval.
    pub fn start(&self, immediate: bool) -> Result<(), SchedulerError> {
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        let mut guard = self.running.lock();
        if guard.take().is_some() {
            metrics::record_stopped();
            debug!(scope = %self.target.scope(), "restarting poller");
        }

        let cancel = CancellationToken::new();
        let task = runtime.spawn(tick_loop(
            Arc::clone(&self.target),
            self.config.interval(),
            immediate,
            cancel.clone(),
            Arc::clone(&self.ticks),
        ));
        *guard = Some(PollHandle { cancel, task });
        metrics::record_started();
        Ok(())
    }

    /// Stop future ticks. Returns false if the scheduler was already idle.
    pub fn stop(&self) -> bool {
        let previous = self.running.lock().take();
        match previous {
            Some(handle) => {
                drop(handle);
                metrics::record_stopped();
                debug!(scope = %self.target.scope(), "poller stopped");
                true
            }
            None => false,
        }
    }

    /// Run one refresh outside the timer, reporting its outcome.
    pub async fn refresh_now(&self) -> Result<(), SyncError> {
        run_refresh(self.target.as_ref()).await
    }
}

impl std::fmt::Debug for PollingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingScheduler")
            .field("scope", &self.target.scope())
            .field("interval", &self.config.interval())
            .field("state", &self.state())
            .finish()
    }
}

async fn tick_loop(
    target: Arc<dyn Refresh>,
    period: Duration,
    immediate: bool,
    cancel: CancellationToken,
    ticks: Arc<AtomicU64>,
) {
    let first = if immediate {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            }
            _ = ticker.tick() => {
                if cancel.is_cancelled() {
                    break;
                }
                ticks.fetch_add(1, Ordering::Relaxed);
                metrics::record_tick();
                debug!(scope = %target.scope(), "poll tick");
                let target = Arc::clone(&target);
                tokio::spawn(async move {
                    let _ = run_refresh(target.as_ref()).await;
                });
            }
        }
    }
}

async fn run_refresh(target: &dyn Refresh) -> Result<(), SyncError> {
    match target.refresh().await {
        Ok(()) => {
            metrics::record_refreshed();
            Ok(())
        }
        Err(err) => {
            metrics::record_failed();
            warn!(
                scope = %target.scope(),
                kind = err.kind(),
                error = %err,
                "refresh failed; keeping previous state"
            );
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    const PERIOD: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct Counting {
        calls: AtomicU64,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Refresh for Counting {
        fn scope(&self) -> String {
            "test".to_string()
        }

        async fn refresh(&self) -> Result<(), SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(SyncError::transport("connection refused"));
            }
            Ok(())
        }
    }

    fn scheduler() -> (Arc<Counting>, PollingScheduler) {
        let target = Arc::new(Counting::default());
        let config = PollConfig::new(PERIOD).unwrap();
        let scheduler = PollingScheduler::new(target.clone(), config);
        (target, scheduler)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn calls(target: &Counting) -> u64 {
        target.calls.load(Ordering::SeqCst)
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_start_refreshes_before_first_interval() {
        let (target, scheduler) = scheduler();
        scheduler.start(true).unwrap();
        settle().await;
        assert_eq!(calls(&target), 1);
        assert_eq!(scheduler.state(), PollState::Running);

        tokio::time::sleep(PERIOD).await;
        assert_eq!(calls(&target), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_start_waits_one_interval() {
        let (target, scheduler) = scheduler();
        scheduler.start(false).unwrap();
        settle().await;
        assert_eq!(calls(&target), 0);

        tokio::time::sleep(PERIOD).await;
        assert_eq!(calls(&target), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_keeps_a_single_timer() {
        let (target, scheduler) = scheduler();
        scheduler.start(false).unwrap();
        scheduler.start(false).unwrap();

        tokio::time::sleep(PERIOD * 3 + Duration::from_millis(1)).await;
        assert_eq!(calls(&target), 3);
        assert_eq!(scheduler.ticks(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_future_ticks() {
        let (target, scheduler) = scheduler();
        scheduler.start(true).unwrap();
        settle().await;
        assert!(scheduler.stop());
        assert_eq!(scheduler.state(), PollState::Idle);

        tokio::time::sleep(PERIOD * 3).await;
        assert_eq!(calls(&target), 1);
        assert!(!scheduler.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_polling() {
        let (target, scheduler) = scheduler();
        target.fail.store(true, Ordering::SeqCst);
        scheduler.start(true).unwrap();

        tokio::time::sleep(PERIOD * 2 + Duration::from_millis(1)).await;
        assert_eq!(calls(&target), 3);
        assert!(scheduler.is_running());
    }

    #[tokio::test]
    async fn refresh_now_reports_outcome() {
        let (target, scheduler) = scheduler();
        assert!(scheduler.refresh_now().await.is_ok());
        target.fail.store(true, Ordering::SeqCst);
        let err = scheduler.refresh_now().await.unwrap_err();
        assert_eq!(err.kind(), "transport");
        assert_eq!(scheduler.state(), PollState::Idle);
    }

    #[test]
    fn start_without_runtime_fails() {
        let (_, scheduler) = scheduler();
        assert_eq!(scheduler.start(true), Err(SchedulerError::NoRuntime));
        assert_eq!(scheduler.state(), PollState::Idle);
    }
}
