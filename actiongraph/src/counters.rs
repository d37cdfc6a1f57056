//! Dropped-work accounting.
//!
//! The core never raises into application call sites; everything it
//! declines or fails to do is tallied here instead, for observability.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared between `handle_message` and the worker.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    malformed_messages: AtomicU64,
    dropped_messages: AtomicU64,
    rejected_tasks: AtomicU64,
    dropped_samples: AtomicU64,
    sink_failures: AtomicU64,
}

impl Counters {
    pub fn note_malformed(&self) {
        self.malformed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_dropped(&self) {
        self.dropped_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_rejected(&self) {
        self.rejected_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_dropped_sample(&self) {
        self.dropped_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            malformed_messages: self.malformed_messages.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
            rejected_tasks: self.rejected_tasks.load(Ordering::Relaxed),
            dropped_samples: self.dropped_samples.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the profiler's drop counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CountersSnapshot {
    /// Messages whose `task_uuid` or `action_status` keys were unusable.
    pub malformed_messages: u64,
    /// Messages dropped by policy: outside any action, mid-action with
    /// `store_all_logs` off, or beyond the per-run action cap.
    pub dropped_messages: u64,
    /// Tasks never profiled because the concurrency cap was full.
    pub rejected_tasks: u64,
    /// Observations discarded to protect call-graph invariants.
    pub dropped_samples: u64,
    /// Records a destination failed to accept.
    pub sink_failures: u64,
}
