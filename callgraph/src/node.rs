//! Call-graph tree nodes.

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;

use crate::time::serialize_wall;
use crate::IngestError;

/// A code location in a task's call graph, with the time attributed to it
/// and the children observed beneath it.
///
/// `time` is the total attributed to this node and its descendants;
/// `self_time` is the share attributed directly to this instruction. Child
/// order is insertion order, and children interleave sub-frames with log
/// messages observed while this node was on the stack.
#[derive(Debug, Clone, Serialize)]
pub struct CallGraphNode {
    pub(crate) instruction: String,
    #[serde(serialize_with = "serialize_wall")]
    pub(crate) start_time: NaiveDateTime,
    #[serde(serialize_with = "serialize_wall")]
    pub(crate) end_time: NaiveDateTime,
    pub(crate) time: f64,
    pub(crate) self_time: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) children: Vec<Child>,
}

/// An entry in a node's ordered child list.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Child {
    /// A sub-frame observed beneath the parent instruction.
    Node(CallGraphNode),
    /// A log message observed while the parent was the innermost frame.
    Message(MessageRecord),
}

impl Child {
    /// The sub-frame node, if this child is one.
    pub fn as_node(&self) -> Option<&CallGraphNode> {
        match self {
            Child::Node(node) => Some(node),
            Child::Message(_) => None,
        }
    }

    /// The message record, if this child is one.
    pub fn as_message(&self) -> Option<&MessageRecord> {
        match self {
            Child::Node(_) => None,
            Child::Message(record) => Some(record),
        }
    }
}

/// A log message recorded in a call graph. A leaf; never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    /// The structured payload as handed to the profiler.
    pub message: Value,
    /// Wall clock of the observation, derived from the root anchor.
    #[serde(serialize_with = "serialize_wall")]
    pub message_time: NaiveDateTime,
}

impl CallGraphNode {
    pub(crate) fn new(instruction: &str, now: NaiveDateTime) -> Self {
        CallGraphNode {
            instruction: instruction.to_owned(),
            start_time: now,
            end_time: now,
            time: 0.0,
            self_time: 0.0,
            children: Vec::new(),
        }
    }

    /// Charges `self_delta` seconds directly to this instruction and
    /// advances the end timestamp. Fails only on a negative delta.
    pub fn attribute(&mut self, self_delta: f64, now: NaiveDateTime) -> Result<(), IngestError> {
        if self_delta < 0.0 {
            return Err(IngestError::NegativeDelta(self_delta));
        }
        self.self_time += self_delta;
        self.accumulate(self_delta, now);
        Ok(())
    }

    /// Extends total time and the end timestamp. Applied to every node on a
    /// walked sample path; self time lands only on the innermost node.
    pub(crate) fn accumulate(&mut self, delta: f64, now: NaiveDateTime) {
        self.time += delta;
        if now > self.end_time {
            self.end_time = now;
        }
    }

    /// Finds or creates the child node for `instruction`.
    ///
    /// Sampling is temporally local: the child list is scanned backwards and
    /// message records act as barriers. A sub-node for the same instruction
    /// recorded since the most recent message is reused; otherwise a fresh
    /// sibling is appended with `start_time = now`. A message between two
    /// samples of one instruction therefore splits them into distinct
    /// invocations.
    pub fn descend(&mut self, instruction: &str, now: NaiveDateTime) -> &mut CallGraphNode {
        descend(&mut self.children, instruction, now)
    }

    /// Appends a message record. Message children contribute no time.
    pub fn append_message(&mut self, record: MessageRecord) {
        self.children.push(Child::Message(record));
    }

    /// The instruction this node aggregates time for.
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Wall clock at which this node was first observed.
    pub fn start_time(&self) -> NaiveDateTime {
        self.start_time
    }

    /// Wall clock of the last observation touching this node.
    pub fn end_time(&self) -> NaiveDateTime {
        self.end_time
    }

    /// Total seconds attributed to this node and its descendants.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Seconds attributed directly to this instruction.
    pub fn self_time(&self) -> f64 {
        self.self_time
    }

    /// The ordered children: sub-frames and message records.
    pub fn children(&self) -> &[Child] {
        &self.children
    }
}

pub(crate) fn descend<'a>(
    children: &'a mut Vec<Child>,
    instruction: &str,
    now: NaiveDateTime,
) -> &'a mut CallGraphNode {
    let mut found = None;
    for (index, child) in children.iter().enumerate().rev() {
        match child {
            Child::Message(_) => break,
            Child::Node(node) if node.instruction == instruction => {
                found = Some(index);
                break;
            }
            Child::Node(_) => {}
        }
    }
    let index = match found {
        Some(index) => index,
        None => {
            children.push(Child::Node(CallGraphNode::new(instruction, now)));
            children.len() - 1
        }
    };
    match &mut children[index] {
        Child::Node(node) => node,
        Child::Message(_) => unreachable!("descend resolved to a message child"),
    }
}
