//! actiongraph is a low-overhead sampling profiler that correlates CPU
//! samples with structured, causally-linked log actions.
//!
//! For every in-progress action — a span of work delimited by `started` and
//! `succeeded`/`failed` log messages sharing a `task_uuid` — it produces a
//! tree of call frames annotated with wall-clock time, self time, and any
//! interleaved log messages, so that you can see *which code ran while
//! which action was active* without paying for deterministic
//! instrumentation.
//!
//! The crates divide the work so each part depends on as little as
//! possible:
//!
//! **Call graphs**: the [`actiongraph_callgraph`] crate (re-exported as
//! [`callgraph`]) assembles per-task trees from (stack, time, timestamp)
//! observations. It is usable standalone.
//!
//! **Ingestion**: [`Profiler::handle_message`] accepts schemaless log
//! messages from any thread, snapshots the caller's frames and clocks, and
//! queues the result; it never blocks beyond two short locks and never
//! fails.
//!
//! **Scheduling**: a single worker thread drains the queue, samples every
//! instrumented thread with an active task, and paces itself so its
//! steady-state cost stays under the configured overhead budget.
//!
//! **Destinations**: each finished tree is emitted as one JSON-shaped
//! record to every registered [`Destination`].
//!
//! # Examples
//!
//! ```
//! use actiongraph::{Config, Frame, Profiler};
//! use serde_json::json;
//! use std::sync::{Arc, Mutex};
//!
//! let profiler = Profiler::new(Config::default())?;
//!
//! // Collect finished call graphs in memory.
//! let records = Arc::new(Mutex::new(Vec::new()));
//! let collected = records.clone();
//! profiler.add_destination(move |record: &serde_json::Value| {
//!     collected.lock().unwrap().push(record.clone());
//! });
//! profiler.spawn()?;
//!
//! // Instrumented code registers its frames and logs action messages.
//! let _frame = profiler.registry().enter(Frame::new("src/main.rs", "main", 1, "app"));
//! let started = json!({"task_uuid": "t-1", "action_status": "started"});
//! profiler.handle_message(started.as_object().unwrap().clone());
//! let done = json!({"task_uuid": "t-1", "action_status": "succeeded"});
//! profiler.handle_message(done.as_object().unwrap().clone());
//!
//! // Stopping drains the queue and emits the finished graph.
//! profiler.stop();
//! assert_eq!(1, records.lock().unwrap().len());
//! # Ok::<(), actiongraph::Error>(())
//! ```
//!
//! Most programs instead configure the process-wide instance once at
//! startup with [`configure`] and point their log framework's output at
//! [`handle_message`].

#![forbid(missing_docs)]

use std::sync::{Arc, RwLock};

pub mod config;
pub mod counters;
pub mod destination;
pub mod message;
pub mod profiler;
pub mod registry;

mod queue;
mod worker;

/// Re-export of the call-graph crate.
pub use actiongraph_callgraph as callgraph;

pub use actiongraph_callgraph::{
    CallGraphRoot, CodeGranularity, Frame, IngestError, ThreadId,
};
pub use config::Config;
pub use counters::CountersSnapshot;
pub use destination::{Destination, JsonLinesDestination};
pub use message::{ActionStatus, MessageInfo, Payload};
pub use profiler::Profiler;
pub use registry::{current_thread, FrameGuard, FrameRegistry, StackSource, ThreadSample};

/// Errors from profiler lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The worker thread could not be spawned.
    #[error("failed to spawn profiler worker")]
    Spawn(#[source] std::io::Error),
    /// `spawn` was called while a worker was already running.
    #[error("profiler worker already running")]
    AlreadyRunning,
    /// The profiler, or the process-wide instance, has been stopped.
    #[error("profiler already stopped")]
    Stopped,
    /// `configure` was called while an instance was already live.
    #[error("profiler already configured")]
    AlreadyConfigured,
    /// A process-wide operation was invoked before [`configure`].
    #[error("profiler not configured")]
    NotConfigured,
}

enum Slot {
    Idle,
    Running(Arc<Profiler>),
    Stopped,
}

static INSTANCE: RwLock<Slot> = RwLock::new(Slot::Idle);

/// Configures the process-wide profiler and starts its worker.
///
/// The instance lives until [`stop`]. Configuring twice is an error, as is
/// configuring again after `stop`.
pub fn configure(config: Config) -> Result<(), Error> {
    let mut slot = INSTANCE.write().expect("failed to lock profiler instance");
    match &*slot {
        Slot::Idle => {
            let profiler = Arc::new(Profiler::new(config)?);
            profiler.spawn()?;
            *slot = Slot::Running(profiler);
            Ok(())
        }
        Slot::Running(_) => Err(Error::AlreadyConfigured),
        Slot::Stopped => Err(Error::Stopped),
    }
}

/// Ingests one message through the process-wide profiler.
///
/// Total: before [`configure`] or after [`stop`] this is a silent no-op, so
/// log frameworks can call it unconditionally.
pub fn handle_message(message: Payload) {
    let slot = INSTANCE.read().expect("failed to lock profiler instance");
    if let Slot::Running(profiler) = &*slot {
        profiler.handle_message(message);
    }
}

/// Registers a destination with the process-wide profiler.
pub fn add_destination(destination: impl Destination + 'static) -> Result<(), Error> {
    match &*INSTANCE.read().expect("failed to lock profiler instance") {
        Slot::Running(profiler) => {
            profiler.add_destination(destination);
            Ok(())
        }
        Slot::Idle => Err(Error::NotConfigured),
        Slot::Stopped => Err(Error::Stopped),
    }
}

/// The process-wide frame registry, for instrumentation call sites.
pub fn registry() -> Result<FrameRegistry, Error> {
    match &*INSTANCE.read().expect("failed to lock profiler instance") {
        Slot::Running(profiler) => Ok(profiler.registry().clone()),
        Slot::Idle => Err(Error::NotConfigured),
        Slot::Stopped => Err(Error::Stopped),
    }
}

/// Reads the process-wide profiler's drop counters.
pub fn counters() -> Result<CountersSnapshot, Error> {
    match &*INSTANCE.read().expect("failed to lock profiler instance") {
        Slot::Running(profiler) => Ok(profiler.counters()),
        Slot::Idle => Err(Error::NotConfigured),
        Slot::Stopped => Err(Error::Stopped),
    }
}

/// Stops the process-wide profiler: the worker drains the queue, emits
/// every open call graph, and exits. Later [`handle_message`] calls are
/// silent no-ops, and [`configure`] cannot be called again.
pub fn stop() -> Result<(), Error> {
    let mut slot = INSTANCE.write().expect("failed to lock profiler instance");
    match std::mem::replace(&mut *slot, Slot::Stopped) {
        Slot::Running(profiler) => {
            profiler.stop();
            Ok(())
        }
        Slot::Idle => {
            *slot = Slot::Idle;
            Err(Error::NotConfigured)
        }
        Slot::Stopped => Err(Error::Stopped),
    }
}
