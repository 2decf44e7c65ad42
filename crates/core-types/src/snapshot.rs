//! Poll responses and the validation stage that turns raw JSON into them.
//!
//! Nothing in this module touches model state: a response either validates
//! into one of the snapshot types here or is rejected as
//! [`SyncError::Malformed`](crate::SyncError::Malformed).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{SyncError, SystemId};

/// Non-transition attributes of a system as reported by the server.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SystemAttrs {
    pub name: String,
    pub url: Option<String>,
    pub content_type: Option<String>,
    pub created: String,
    pub modified: String,
    pub in_transition: bool,
    pub failed_last_transition: bool,
}

/// One completed or running state change. Durations are milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransitionRecord {
    pub id: Option<u64>,
    pub state: String,
    pub event: Option<String>,
    pub message: Option<String>,
    pub delay: Option<f64>,
    pub delay_label: Option<String>,
    pub duration: f64,
    pub natural_duration: Option<String>,
    pub start_time: String,
    pub end_time: Option<String>,
    pub failed: bool,
}

impl TransitionRecord {
    /// Minimal completed record, mostly useful for tests and fixtures.
    pub fn completed(state: impl Into<String>, duration: f64) -> Self {
        Self {
            id: None,
            state: state.into(),
            event: None,
            message: None,
            delay: None,
            delay_label: None,
            duration,
            natural_duration: None,
            start_time: String::new(),
            end_time: Some(String::new()),
            failed: false,
        }
    }

    pub fn in_progress(&self) -> bool {
        self.end_time.is_none()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RosterEntry {
    pub id: SystemId,
    pub attrs: SystemAttrs,
}

/// Ordered roster response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RosterSnapshot {
    pub entries: Vec<RosterEntry>,
}

/// Transition payload of a detail response, tagged with how it must be applied.
#[derive(Clone, Debug, PartialEq)]
pub enum TransitionBatch {
    /// Complete history; replaces the log.
    Full(Vec<TransitionRecord>),
    /// Records starting at log position `offset`.
    Since {
        offset: usize,
        records: Vec<TransitionRecord>,
    },
}

impl TransitionBatch {
    pub fn records(&self) -> &[TransitionRecord] {
        match self {
            TransitionBatch::Full(records) => records,
            TransitionBatch::Since { records, .. } => records,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetailSnapshot {
    pub entry: RosterEntry,
    pub transitions: Option<TransitionBatch>,
}

#[derive(Deserialize)]
struct WireSystem {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    url: Option<String>,
    name: String,
    #[serde(default)]
    content_type: Option<String>,
    created: String,
    modified: String,
    #[serde(default)]
    in_transition: Option<bool>,
    #[serde(default)]
    failed_last_transition: Option<bool>,
    #[serde(default)]
    transitions: Option<Vec<WireTransition>>,
    #[serde(default)]
    transitions_since: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireDelay {
    Millis(f64),
    Label(String),
}

#[derive(Deserialize)]
struct WireTransition {
    #[serde(default)]
    id: Option<u64>,
    state: String,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    delay: Option<WireDelay>,
    duration: f64,
    #[serde(default)]
    natural_duration: Option<String>,
    start_time: String,
    #[serde(default)]
    end_time: Option<String>,
    #[serde(default)]
    failed: Option<bool>,
}

impl RosterSnapshot {
    /// Validate a roster response: a JSON array of system attribute objects.
    /// Any transition data riding along is ignored.
    pub fn validate(raw: Value) -> Result<Self, SyncError> {
        let Value::Array(items) = raw else {
            return Err(SyncError::malformed("roster response must be an array"));
        };
        let mut entries = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let wire: WireSystem = serde_json::from_value(item)
                .map_err(|err| SyncError::malformed(format!("roster entry {index}: {err}")))?;
            let (entry, _, _) = system_entry(wire)?;
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    pub fn ids(&self) -> Vec<SystemId> {
        self.entries.iter().map(|entry| entry.id.clone()).collect()
    }
}

impl DetailSnapshot {
    /// Validate a detail response: one system object, optionally carrying
    /// `transitions` and a `transitions_since` offset.
    pub fn validate(raw: Value) -> Result<Self, SyncError> {
        if !raw.is_object() {
            return Err(SyncError::malformed("detail response must be an object"));
        }
        let wire: WireSystem = serde_json::from_value(raw)
            .map_err(|err| SyncError::malformed(format!("detail: {err}")))?;
        let (entry, transitions, since) = system_entry(wire)?;

        let transitions = match transitions {
            None => None,
            Some(items) => {
                let records = items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| transition(index, item))
                    .collect::<Result<Vec<_>, _>>()?;
                ensure_single_open_tail(&records)?;
                Some(match since {
                    Some(offset) => TransitionBatch::Since {
                        offset: usize::try_from(offset).map_err(|_| {
                            SyncError::malformed("transitions_since out of range")
                        })?,
                        records,
                    },
                    None => TransitionBatch::Full(records),
                })
            }
        };

        Ok(Self { entry, transitions })
    }
}

fn system_entry(
    wire: WireSystem,
) -> Result<(RosterEntry, Option<Vec<WireTransition>>, Option<u64>), SyncError> {
    let id = identity(wire.id, wire.url.as_deref())?;
    let attrs = SystemAttrs {
        name: wire.name,
        url: wire.url,
        content_type: wire.content_type,
        created: wire.created,
        modified: wire.modified,
        in_transition: wire.in_transition.unwrap_or(false),
        failed_last_transition: wire.failed_last_transition.unwrap_or(false),
    };
    Ok((RosterEntry { id, attrs }, wire.transitions, wire.transitions_since))
}

fn identity(id: Option<Value>, url: Option<&str>) -> Result<SystemId, SyncError> {
    match id {
        Some(Value::Number(number)) => Ok(SystemId(number.to_string())),
        Some(Value::String(value)) if !value.is_empty() => Ok(SystemId(value)),
        Some(Value::Null) | Some(Value::String(_)) | None => url
            .filter(|url| !url.is_empty())
            .map(SystemId::from)
            .ok_or_else(|| SyncError::malformed("system has neither id nor url")),
        Some(_) => Err(SyncError::malformed("system id must be a string or number")),
    }
}

fn transition(index: usize, wire: WireTransition) -> Result<TransitionRecord, SyncError> {
    if wire.state.trim().is_empty() {
        return Err(SyncError::malformed(format!(
            "transition {index}: state is empty"
        )));
    }
    if !wire.duration.is_finite() || wire.duration < 0.0 {
        return Err(SyncError::malformed(format!(
            "transition {index}: duration must be a non-negative number"
        )));
    }
    let (delay, delay_label) = match wire.delay {
        Some(WireDelay::Millis(ms)) if ms.is_finite() && ms >= 0.0 => (Some(ms), None),
        Some(WireDelay::Millis(_)) => {
            return Err(SyncError::malformed(format!(
                "transition {index}: delay must be a non-negative number"
            )))
        }
        Some(WireDelay::Label(label)) => (None, Some(label)),
        None => (None, None),
    };
    let failed = wire.failed.unwrap_or(false);
    if failed && wire.end_time.is_none() {
        return Err(SyncError::malformed(format!(
            "transition {index}: failed transition has no end time"
        )));
    }
    Ok(TransitionRecord {
        id: wire.id,
        state: wire.state,
        event: wire.event,
        message: wire.message,
        delay,
        delay_label,
        duration: wire.duration,
        natural_duration: wire.natural_duration,
        start_time: wire.start_time,
        end_time: wire.end_time,
        failed,
    })
}

fn ensure_single_open_tail(records: &[TransitionRecord]) -> Result<(), SyncError> {
    let last = records.len().saturating_sub(1);
    if let Some(index) = records
        .iter()
        .enumerate()
        .position(|(index, record)| record.in_progress() && index != last)
    {
        return Err(SyncError::malformed(format!(
            "transition {index} is in progress but is not the latest"
        )));
    }
    let mut seen = HashSet::new();
    for record in records {
        if let Some(id) = record.id {
            if !seen.insert(id) {
                return Err(SyncError::malformed(format!("duplicate transition id {id}")));
            }
        }
    }
    Ok(())
}
