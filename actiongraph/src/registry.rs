//! Shadow frame stacks and the sampling seam.
//!
//! Rust offers no way to walk another thread's stack from safe code, so
//! instrumented threads maintain their own: each pushes a [`Frame`] on
//! entry to interesting code and pops it (via the returned guard) on the
//! way out. The registry holds these shadow stacks behind one short lock,
//! snapshots the caller's chain for message ingestion, and implements the
//! [`StackSource`] seam the sampling worker enumerates threads through.
//!
//! The worker's own thread never registers frames, so the profiler does
//! not observe itself.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use smallvec::SmallVec;

use actiongraph_callgraph::{Frame, ThreadId};

/// Shadow stacks are short and hot; keep small ones off the heap.
type FrameStack = SmallVec<[Frame; 16]>;

/// A thread's frames paired with its identity, as returned by sampling.
#[derive(Debug, Clone)]
pub struct ThreadSample {
    /// The sampled thread.
    pub thread: ThreadId,
    /// Its current frames, outermost first.
    pub frames: Vec<Frame>,
}

/// Enumerates the current frames of live application threads.
///
/// The [`FrameRegistry`] implements this over its shadow stacks; tests and
/// embedders with their own notion of per-thread state substitute their
/// own source.
pub trait StackSource: Send {
    /// Snapshots every thread that currently has frames registered.
    fn current_frames(&mut self) -> Vec<ThreadSample>;
}

static NEXT_THREAD: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_INDEX: Cell<Option<u64>> = const { Cell::new(None) };
}

fn current_index() -> u64 {
    THREAD_INDEX.with(|cell| match cell.get() {
        Some(index) => index,
        None => {
            let index = NEXT_THREAD.fetch_add(1, Ordering::Relaxed);
            cell.set(Some(index));
            index
        }
    })
}

/// The calling thread's process-unique index, assigned on first use.
pub fn current_thread() -> ThreadId {
    ThreadId::Index(current_index())
}

/// Shared shadow stacks, one per instrumented thread.
#[derive(Clone, Default)]
pub struct FrameRegistry {
    stacks: Arc<Mutex<HashMap<u64, FrameStack>>>,
}

impl FrameRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `frame` for the calling thread. The returned guard pops it on
    /// drop; guards nest with ordinary scoping, so drops happen in reverse
    /// entry order.
    #[must_use = "dropping the guard immediately pops the frame"]
    pub fn enter(&self, frame: Frame) -> FrameGuard {
        let index = current_index();
        self.stacks
            .lock()
            .expect("failed to lock frame registry")
            .entry(index)
            .or_default()
            .push(frame);
        FrameGuard {
            registry: self.clone(),
            index,
        }
    }

    /// Snapshot of the calling thread's frames, outermost first.
    pub fn snapshot_current(&self) -> Vec<Frame> {
        let index = current_index();
        self.stacks
            .lock()
            .expect("failed to lock frame registry")
            .get(&index)
            .map(|stack| stack.to_vec())
            .unwrap_or_default()
    }
}

impl StackSource for FrameRegistry {
    fn current_frames(&mut self) -> Vec<ThreadSample> {
        self.stacks
            .lock()
            .expect("failed to lock frame registry")
            .iter()
            .map(|(index, stack)| ThreadSample {
                thread: ThreadId::Index(*index),
                frames: stack.to_vec(),
            })
            .collect()
    }
}

/// Pops one frame from the owning thread's shadow stack on drop. Threads
/// with no remaining frames leave the registry entirely, so finished
/// threads are not enumerated by sampling.
pub struct FrameGuard {
    registry: FrameRegistry,
    index: u64,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let mut stacks = self
            .registry
            .stacks
            .lock()
            .expect("failed to lock frame registry");
        if let Some(stack) = stacks.get_mut(&self.index) {
            stack.pop();
            if stack.is_empty() {
                stacks.remove(&self.index);
            }
        }
    }
}
