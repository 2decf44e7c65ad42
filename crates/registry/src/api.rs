use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use sts_core_types::{SyncError, SystemId};
use tokio::sync::watch;

/// What the detail poll asks the server for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetailRequest {
    pub id: SystemId,
    /// Detail url advertised by the roster, if any.
    pub url: Option<String>,
    /// `None` requests full history; `Some(n)` asks for records from log position `n`.
    pub since: Option<usize>,
}

/// Read-only access to the roster and detail endpoints. Implementations
/// return the raw JSON body; validation happens in the caller.
#[async_trait]
pub trait SystemSource: Send + Sync {
    async fn fetch_roster(&self) -> Result<Value, SyncError>;
    async fn fetch_detail(&self, request: &DetailRequest) -> Result<Value, SyncError>;
}

#[derive(Default)]
struct Script {
    queue: VecDeque<Result<Value, SyncError>>,
    last: Option<Value>,
}

impl Script {
    fn next(&mut self) -> Result<Value, SyncError> {
        match self.queue.pop_front() {
            Some(Ok(value)) => {
                self.last = Some(value.clone());
                Ok(value)
            }
            Some(Err(err)) => Err(err),
            None => self
                .last
                .clone()
                .ok_or_else(|| SyncError::transport("no scripted response")),
        }
    }
}

/// In-memory source that replays queued responses.
///
/// Once a queue drains, the last successful response repeats, which is how a
/// quiet server looks to a poller. Detail responses can be held back with
/// [`ScriptedSource::hold_details`] to model fetches that land late.
pub struct ScriptedSource {
    roster: Mutex<Script>,
    details: DashMap<SystemId, Script>,
    requests: Mutex<Vec<DetailRequest>>,
    roster_calls: AtomicUsize,
    gate: watch::Sender<bool>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        let (gate, _) = watch::channel(false);
        Arc::new(Self {
            roster: Mutex::new(Script::default()),
            details: DashMap::new(),
            requests: Mutex::new(Vec::new()),
            roster_calls: AtomicUsize::new(0),
            gate,
        })
    }

    pub fn push_roster(&self, value: Value) {
        self.roster.lock().queue.push_back(Ok(value));
    }

    pub fn fail_roster(&self, err: SyncError) {
        self.roster.lock().queue.push_back(Err(err));
    }

    pub fn push_detail(&self, id: impl Into<SystemId>, value: Value) {
        self.details
            .entry(id.into())
            .or_default()
            .queue
            .push_back(Ok(value));
    }

    pub fn fail_detail(&self, id: impl Into<SystemId>, err: SyncError) {
        self.details
            .entry(id.into())
            .or_default()
            .queue
            .push_back(Err(err));
    }

    /// Detail fetches issued from now on wait until [`release_details`](Self::release_details).
    pub fn hold_details(&self) {
        self.gate.send_replace(true);
    }

    pub fn release_details(&self) {
        self.gate.send_replace(false);
    }

    pub fn detail_requests(&self) -> Vec<DetailRequest> {
        self.requests.lock().clone()
    }

    pub fn detail_requests_for(&self, id: &SystemId) -> Vec<DetailRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|request| &request.id == id)
            .cloned()
            .collect()
    }

    pub fn roster_calls(&self) -> usize {
        self.roster_calls.load(Ordering::SeqCst)
    }

    async fn wait_for_gate(&self) {
        let mut gate = self.gate.subscribe();
        loop {
            let held = *gate.borrow_and_update();
            if !held {
                break;
            }
            if gate.changed().await.is_err() {
                break;
            }
        }
    }
}

#[async_trait]
impl SystemSource for ScriptedSource {
    async fn fetch_roster(&self) -> Result<Value, SyncError> {
        self.roster_calls.fetch_add(1, Ordering::SeqCst);
        self.roster.lock().next()
    }

    async fn fetch_detail(&self, request: &DetailRequest) -> Result<Value, SyncError> {
        self.requests.lock().push(request.clone());
        let response = self.details.entry(request.id.clone()).or_default().next();
        self.wait_for_gate().await;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn repeats_last_successful_response() {
        let source = ScriptedSource::new();
        source.push_roster(json!([1]));
        source.fail_roster(SyncError::transport("down"));

        assert_eq!(source.fetch_roster().await.unwrap(), json!([1]));
        assert!(source.fetch_roster().await.is_err());
        assert_eq!(source.fetch_roster().await.unwrap(), json!([1]));
        assert_eq!(source.roster_calls(), 3);
    }

    #[tokio::test]
    async fn empty_script_is_a_transport_error() {
        let source = ScriptedSource::new();
        let request = DetailRequest {
            id: SystemId::from("1"),
            url: None,
            since: None,
        };
        let err = source.fetch_detail(&request).await.unwrap_err();
        assert_eq!(err.kind(), "transport");
        assert_eq!(source.detail_requests(), vec![request]);
    }
}
