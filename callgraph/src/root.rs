//! Per-(thread, task) call-graph roots.

use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;

use crate::node::{descend, Child, MessageRecord};
use crate::time::wall_after;
use crate::IngestError;

/// Identifies the thread a call graph was observed on.
///
/// Serializes untagged, so emitted records carry a bare integer for
/// registry-assigned threads and a string for named ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum ThreadId {
    /// A process-unique thread index.
    Index(u64),
    /// An explicit thread name.
    Name(String),
}

impl From<u64> for ThreadId {
    fn from(index: u64) -> Self {
        ThreadId::Index(index)
    }
}

impl From<&str> for ThreadId {
    fn from(name: &str) -> Self {
        ThreadId::Name(name.to_owned())
    }
}

impl From<String> for ThreadId {
    fn from(name: String) -> Self {
        ThreadId::Name(name)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadId::Index(index) => write!(f, "{index}"),
            ThreadId::Name(name) => f.write_str(name),
        }
    }
}

/// The call graph gathered for one task on one thread.
///
/// The root holds one top-level node per distinct outermost instruction
/// observed, and is pinned to the wall and monotonic clocks of its first
/// observation: every later wall timestamp is derived as
/// `anchor_wall + (monotonic - anchor_monotonic)`, so clock skew after the
/// first observation is ignored.
#[derive(Debug, Clone, Serialize)]
pub struct CallGraphRoot {
    task_uuid: String,
    thread: ThreadId,
    children: Vec<Child>,
    #[serde(skip)]
    anchor_wall: NaiveDateTime,
    #[serde(skip)]
    anchor_monotonic: f64,
}

impl CallGraphRoot {
    /// Creates a root anchored at the first observation for the task.
    pub fn new(
        thread: ThreadId,
        task_uuid: impl Into<String>,
        anchor_wall: NaiveDateTime,
        anchor_monotonic: f64,
    ) -> Self {
        CallGraphRoot {
            task_uuid: task_uuid.into(),
            thread,
            children: Vec::new(),
            anchor_wall,
            anchor_monotonic,
        }
    }

    /// The task this tree belongs to.
    pub fn task_uuid(&self) -> &str {
        &self.task_uuid
    }

    /// The thread this tree was observed on.
    pub fn thread(&self) -> &ThreadId {
        &self.thread
    }

    /// The ordered top-level children.
    pub fn children(&self) -> &[Child] {
        &self.children
    }

    /// Merges one observation into the tree.
    ///
    /// Walks `stack` from the outermost instruction, reusing the node for
    /// each shared prefix and opening fresh siblings where the sample
    /// diverges. Every walked node absorbs `delta` into its total time and
    /// advances its end timestamp; the innermost node additionally absorbs
    /// `delta` as self time and receives `message`, if one is supplied. An
    /// empty stack charges the observation to the root itself: the message
    /// lands at the top level and the delta is discarded, since the root
    /// carries no times.
    ///
    /// A `delta` of zero is how messages ride along without inflating any
    /// node's time. Negative deltas fail without touching the tree.
    pub fn ingest(
        &mut self,
        stack: &[String],
        delta: f64,
        now_monotonic: f64,
        message: Option<Value>,
    ) -> Result<(), IngestError> {
        if delta < 0.0 {
            return Err(IngestError::NegativeDelta(delta));
        }
        let now = self.wall(now_monotonic);
        let mut message = message;

        if stack.is_empty() {
            if let Some(message) = message {
                self.children.push(Child::Message(MessageRecord {
                    message,
                    message_time: now,
                }));
            }
            return Ok(());
        }

        let mut children = &mut self.children;
        for (position, instruction) in stack.iter().enumerate() {
            let node = descend(children, instruction, now);
            if position + 1 == stack.len() {
                node.attribute(delta, now)?;
                if let Some(message) = message.take() {
                    node.append_message(MessageRecord {
                        message,
                        message_time: now,
                    });
                }
            } else {
                node.accumulate(delta, now);
            }
            children = &mut node.children;
        }
        Ok(())
    }

    /// Emits the output record for this root: `{task_uuid, thread, children}`
    /// with nodes and message records serialized recursively.
    pub fn jsonize(&self) -> Value {
        serde_json::to_value(self).expect("call graph serialization failed")
    }

    fn wall(&self, now_monotonic: f64) -> NaiveDateTime {
        wall_after(self.anchor_wall, now_monotonic - self.anchor_monotonic)
    }
}
