//! The structured message model.

use std::str::FromStr;

use chrono::NaiveDateTime;
use serde_json::{Map, Value};

use actiongraph_callgraph::{Frame, ThreadId};

/// A structured log message: a free-form key/value map.
///
/// Only `task_uuid` and `action_status` are inspected by the profiler;
/// every other key is passthrough payload.
pub type Payload = Map<String, Value>;

/// Lifecycle markers carried in a message's `action_status` key. Absence
/// marks a mid-action log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    /// Opens an action.
    Started,
    /// Ends an action successfully.
    Succeeded,
    /// Ends an action with a failure.
    Failed,
}

impl ActionStatus {
    /// True for the statuses that end an action.
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionStatus::Succeeded | ActionStatus::Failed)
    }
}

impl FromStr for ActionStatus {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "started" => Ok(ActionStatus::Started),
            "succeeded" => Ok(ActionStatus::Succeeded),
            "failed" => Ok(ActionStatus::Failed),
            other => Err(format!("unknown action status: {other}")),
        }
    }
}

/// Marker for payloads whose routing keys are unusable.
#[derive(Debug)]
pub(crate) struct Malformed;

/// Reads a payload's `task_uuid`, if present. Non-string values are
/// malformed: the key is required for routing.
pub(crate) fn task_uuid(payload: &Payload) -> Result<Option<&str>, Malformed> {
    match payload.get("task_uuid") {
        None => Ok(None),
        Some(Value::String(uuid)) => Ok(Some(uuid)),
        Some(_) => Err(Malformed),
    }
}

/// Reads a payload's `action_status`, if present.
pub(crate) fn action_status(payload: &Payload) -> Result<Option<ActionStatus>, Malformed> {
    match payload.get("action_status") {
        None => Ok(None),
        Some(Value::String(status)) => status.parse().map(Some).map_err(|_| Malformed),
        Some(_) => Err(Malformed),
    }
}

/// A message captured at ingest time, queued for the profiler worker.
///
/// Everything the worker needs is snapshotted here on the ingesting thread:
/// the frame chain as owned values, the thread identity, and both clocks.
#[derive(Debug, Clone)]
pub struct MessageInfo {
    /// The original payload, untouched.
    pub message: Payload,
    /// The task that samples on this thread attribute to once this message
    /// has applied: the top of the thread's action stack after pushes and
    /// pops. `None` when no action remains active.
    pub next_task_uuid: Option<String>,
    /// Snapshot of the ingesting thread's frames, outermost first.
    pub frame: Vec<Frame>,
    /// The ingesting thread.
    pub thread: ThreadId,
    /// Monotonic reading at capture, in seconds since profiler construction.
    pub monotonic: f64,
    /// Wall clock at capture.
    pub clock: NaiveDateTime,
}

#[cfg(test)]
mod tests {

    use serde_json::json;

    use super::{action_status, task_uuid, ActionStatus};

    fn payload(value: serde_json::Value) -> super::Payload {
        value.as_object().cloned().expect("payload must be an object")
    }

    #[test]
    fn statuses_parse() {
        assert_eq!(Ok(ActionStatus::Started), "started".parse());
        assert_eq!(Ok(ActionStatus::Succeeded), "succeeded".parse());
        assert_eq!(Ok(ActionStatus::Failed), "failed".parse());
        assert!("running".parse::<ActionStatus>().is_err());
        assert!(!ActionStatus::Started.is_terminal());
        assert!(ActionStatus::Failed.is_terminal());
    }

    #[test]
    fn routing_keys_validate() {
        let message = payload(json!({"task_uuid": "1", "action_status": "started"}));
        assert_eq!(Some("1"), task_uuid(&message).unwrap());
        assert_eq!(Some(ActionStatus::Started), action_status(&message).unwrap());

        let plain = payload(json!({"msg": "hello"}));
        assert_eq!(None, task_uuid(&plain).unwrap());
        assert_eq!(None, action_status(&plain).unwrap());

        assert!(task_uuid(&payload(json!({"task_uuid": 7}))).is_err());
        assert!(action_status(&payload(json!({"action_status": "finished"}))).is_err());
        assert!(action_status(&payload(json!({"action_status": false}))).is_err());
    }
}
