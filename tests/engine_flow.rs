use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use sts_core_types::SystemId;
use sts_monitor::{run_live, run_once, MonitorConfig};
use sts_registry::{
    ActiveViewCoordinator, RegistryConfig, RosterEvent, ScriptedSource, SystemRegistry,
    TransitionStatus,
};

/// Collects labels from synchronous listeners.
#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    fn push(&self, line: String) {
        self.0.lock().push(line);
    }

    fn lines(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

fn system(id: u64, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "created": "2013-04-02T10:00:00",
        "modified": "2013-04-02T10:00:00",
        "in_transition": false,
        "failed_last_transition": false,
    })
}

fn detail(id: u64, transitions: Value) -> Value {
    let mut body = system(id, &format!("S{id}"));
    body["transitions"] = transitions;
    body
}

fn id(value: u64) -> SystemId {
    SystemId::from(value)
}

fn quiet_registry(source: &Arc<ScriptedSource>) -> Arc<SystemRegistry> {
    let config = RegistryConfig {
        poll: false,
        ..RegistryConfig::default()
    };
    SystemRegistry::new(source.clone(), config).unwrap()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

const DETAIL_PERIOD: Duration = Duration::from_secs(5);

#[tokio::test]
async fn roster_reset_then_update_and_add() {
    let source = ScriptedSource::new();
    source.push_roster(json!([system(1, "S1")]));
    source.push_roster(json!([system(1, "S1"), system(2, "S2")]));
    let registry = quiet_registry(&source);
    let recorder = Recorder::default();
    let _sub = {
        let recorder = recorder.clone();
        registry.subscribe(move |event| {
            recorder.push(match event {
                RosterEvent::Reset(records) => format!("reset:{}", records.len()),
                RosterEvent::Added(record) => format!("add:{}", record.id()),
                RosterEvent::Updated(record) => format!("update:{}", record.id()),
            })
        })
    };

    registry.refresh().await.unwrap();
    registry.refresh().await.unwrap();

    assert_eq!(recorder.lines(), vec!["reset:1", "update:1", "add:2"]);
    assert_eq!(registry.ids(), vec![id(1), id(2)]);
}

#[tokio::test]
async fn in_progress_zero_duration_has_no_bar() {
    let source = ScriptedSource::new();
    source.push_roster(json!([system(1, "S1")]));
    source.push_detail(
        1u64,
        detail(
            1,
            json!([{"state": "start", "duration": 0, "start_time": "2013-04-02T10:00:00", "end_time": null, "failed": false}]),
        ),
    );
    let registry = quiet_registry(&source);
    registry.refresh().await.unwrap();
    let record = registry.require(&id(1)).unwrap();

    record.sync().refresh_now().await.unwrap();

    let log = record.log();
    assert_eq!(log.len(), 1);
    assert_eq!(log.max_duration(), Some(0.0));
    assert_eq!(log.percentage(0), None);
    let latest = log.latest().unwrap();
    assert!(latest.in_progress());
    assert_eq!(TransitionStatus::of(&latest), TransitionStatus::InProgress);
}

#[tokio::test(start_paused = true)]
async fn making_another_system_visible_switches_polling() {
    let source = ScriptedSource::new();
    source.push_roster(json!([system(1, "S1"), system(2, "S2")]));
    source.push_detail(1u64, detail(1, json!([])));
    source.push_detail(2u64, detail(2, json!([])));
    let registry = quiet_registry(&source);
    registry.refresh().await.unwrap();
    let coordinator = ActiveViewCoordinator::attach(Arc::clone(&registry));
    let first = registry.require(&id(1)).unwrap();
    let second = registry.require(&id(2)).unwrap();

    first.set_visible(true);
    settle().await;
    assert!(first.sync().is_running());

    second.set_visible(true);
    settle().await;

    assert!(!first.sync().is_running());
    assert!(!first.is_visible());
    assert!(second.sync().is_running());
    assert_eq!(source.detail_requests_for(&id(2)).len(), 1);
    assert_eq!(source.detail_requests_for(&id(2))[0].since, None);

    let first_calls = source.detail_requests_for(&id(1)).len();
    tokio::time::sleep(DETAIL_PERIOD * 3).await;
    assert_eq!(source.detail_requests_for(&id(1)).len(), first_calls);
    assert_eq!(source.detail_requests_for(&id(2)).len(), 4);
    assert_eq!(coordinator.running_engines(), 1);
}

#[tokio::test(start_paused = true)]
async fn late_detail_still_lands_without_reactivating() {
    let source = ScriptedSource::new();
    source.push_roster(json!([system(1, "S1"), system(2, "S2")]));
    source.push_detail(
        1u64,
        detail(
            1,
            json!([{"state": "Initialized", "duration": 2000, "start_time": "t0", "end_time": "t1", "failed": false}]),
        ),
    );
    source.push_detail(2u64, detail(2, json!([])));
    let registry = quiet_registry(&source);
    registry.refresh().await.unwrap();
    let coordinator = ActiveViewCoordinator::attach(Arc::clone(&registry));
    let first = registry.require(&id(1)).unwrap();

    source.hold_details();
    coordinator.select(&id(1)).unwrap();
    settle().await;
    coordinator.select(&id(2)).unwrap();
    settle().await;
    assert!(first.log().is_empty());

    source.release_details();
    settle().await;

    assert_eq!(first.log().len(), 1);
    assert_eq!(coordinator.active_id(), Some(id(2)));
    assert!(!first.is_visible());
    assert!(!first.sync().is_running());
    assert_eq!(registry.visible().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn at_most_one_visible_across_refreshes_and_switches() {
    let source = ScriptedSource::new();
    source.push_roster(json!([system(1, "S1"), system(2, "S2"), system(3, "S3")]));
    for n in 1..=3u64 {
        source.push_detail(n, detail(n, json!([])));
    }
    let registry = quiet_registry(&source);
    registry.refresh().await.unwrap();
    let coordinator = ActiveViewCoordinator::attach(Arc::clone(&registry));

    for step in 0..12u64 {
        let target = id(step % 3 + 1);
        if step % 2 == 0 {
            coordinator.select(&target).unwrap();
        } else {
            registry.require(&target).unwrap().set_visible(true);
        }
        registry.refresh().await.unwrap();
        settle().await;

        assert!(registry.visible().len() <= 1);
        assert!(coordinator.running_engines() <= 1);
        assert_eq!(coordinator.active_id(), Some(target));
    }
}

#[tokio::test]
async fn once_reports_roster_and_selected_detail() {
    let source = ScriptedSource::new();
    source.push_roster(json!([system(1, "S1"), system(2, "S2")]));
    source.push_detail(
        2u64,
        detail(
            2,
            json!([
                {"state": "Initialized", "duration": 1000, "start_time": "2013-04-02T10:00:00", "end_time": "2013-04-02T10:00:01"},
                {"state": "Saved", "duration": 4000, "start_time": "2013-04-02T10:00:01", "end_time": "2013-04-02T10:00:05", "failed": true},
            ]),
        ),
    );
    let config = MonitorConfig {
        initial_system: Some("2".to_string()),
        ..MonitorConfig::default()
    };

    let report = run_once(source.clone(), &config).await.unwrap();

    assert_eq!(report.systems.len(), 2);
    assert_eq!(report.systems[1].name, "S2");
    let (shown, rows) = report.detail.unwrap();
    assert_eq!(shown, id(2));
    assert_eq!(rows[0].state, "Saved");
    assert_eq!(rows[0].status, TransitionStatus::Failed);
    assert_eq!(rows[0].ratio, Some(1.0));
    assert_eq!(rows[1].ratio, Some(0.25));
    assert_eq!(rows[1].started, "4/2/2013 @ 10:00:00 am");
}

#[tokio::test]
async fn once_with_unknown_system_fails() {
    let source = ScriptedSource::new();
    source.push_roster(json!([system(1, "S1")]));
    let config = MonitorConfig {
        initial_system: Some("9".to_string()),
        ..MonitorConfig::default()
    };
    assert!(run_once(source, &config).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn live_watch_selects_initial_system_and_polls_it() {
    let source = ScriptedSource::new();
    source.push_roster(json!([system(1, "S1"), system(2, "S2")]));
    source.push_detail(2u64, detail(2, json!([])));
    let config = MonitorConfig {
        initial_system: Some("2".to_string()),
        ..MonitorConfig::default()
    };

    run_live(
        source.clone(),
        &config,
        tokio::time::sleep(Duration::from_secs(12)),
    )
    .await
    .unwrap();

    assert_eq!(source.roster_calls(), 1);
    let requests = source.detail_requests_for(&id(2));
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].since, None);
    assert_eq!(requests[1].since, Some(0));
    assert!(source.detail_requests_for(&id(1)).is_empty());
}
