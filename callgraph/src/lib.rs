//! Call-graph assembly for the actiongraph sampling profiler.
//!
//! This crate is the data plane of the profiler: it turns a stream of
//! (stack, elapsed-time, timestamp) observations plus interleaved log
//! messages into a per-task tree of call frames, preserving the temporal
//! order of frames and messages and aggregating self/total time as it goes.
//! It knows nothing about threads as operating-system objects, message
//! queues, or scheduling; those live in the `actiongraph` crate.
//!
//! **Stacks**: the [`stack`] module snapshots call frames as owned values
//! and renders them as textual instructions at file, method, or line
//! granularity.
//!
//! **Trees**: the [`node`] and [`root`] modules hold the per-(thread, task)
//! call graph and implement the merge of new observations into it.
//!
//! **Time**: the [`time`] module pins each root to its first wall-clock
//! observation and derives every later timestamp from monotonic deltas, so
//! wall-clock skew cannot reorder a tree.
//!
//! # Examples
//!
//! ```
//! use actiongraph_callgraph::{CallGraphRoot, ThreadId};
//! use chrono::NaiveDate;
//!
//! let anchor = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(12, 0, 0).unwrap();
//! let mut root = CallGraphRoot::new(ThreadId::Index(1), "task-1", anchor, 0.0);
//!
//! // One sample: 250ms spent in `handle`, called from `main`.
//! root.ingest(&["main".into(), "handle".into()], 0.25, 0.25, None).unwrap();
//!
//! let record = root.jsonize();
//! assert_eq!(record["children"][0]["instruction"], "main");
//! assert_eq!(record["children"][0]["children"][0]["self_time"], 0.25);
//! ```

#![forbid(missing_docs)]

pub mod node;
pub mod root;
pub mod stack;
pub mod time;

pub use node::{CallGraphNode, Child, MessageRecord};
pub use root::{CallGraphRoot, ThreadId};
pub use stack::{extract_stack, CodeGranularity, Frame};

/// Errors surfaced while merging an observation into a call graph.
///
/// Ingestion failures never corrupt the tree; callers drop the offending
/// observation and count it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestError {
    /// An observation claimed a negative elapsed time, which would drive
    /// `self_time` below zero.
    #[error("negative sample delta: {0}")]
    NegativeDelta(f64),
}
