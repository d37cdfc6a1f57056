//! The profiler: message ingestion, lifecycle, and the worker thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use actiongraph_callgraph::ThreadId;

use crate::config::Config;
use crate::counters::{Counters, CountersSnapshot};
use crate::destination::{Destination, FanOut};
use crate::message::{self, ActionStatus, MessageInfo, Payload};
use crate::queue::{MessageQueue, Signal};
use crate::registry::{current_thread, FrameRegistry, StackSource};
use crate::worker::ProfileWorker;
use crate::Error;

/// Per-thread action bookkeeping for `handle_message`.
#[derive(Default)]
struct IngestState {
    /// Active task stack per thread: pushed on `started`, popped on
    /// `succeeded` or `failed`. The top is the task new samples and
    /// mid-action messages attach to, which keeps message handling O(1).
    actions: HashMap<ThreadId, Vec<String>>,
    /// Root-action opens admitted so far, charged against
    /// `max_actions_per_run`.
    actions_this_run: usize,
}

/// A sampling profiler correlating stack samples with structured log
/// actions.
///
/// Application threads feed it through [`Profiler::handle_message`], which
/// never blocks beyond two short locks and never fails; a dedicated worker
/// thread (started by [`Profiler::spawn`]) turns the queued messages and
/// periodic stack samples into per-task call graphs and emits each finished
/// graph to the registered destinations.
///
/// Most programs use the process-wide instance through
/// [`configure`](crate::configure); embedders that want ownership construct
/// a `Profiler` directly.
pub struct Profiler {
    config: Config,
    timer: Instant,
    queue: MessageQueue,
    registry: FrameRegistry,
    destinations: FanOut,
    counters: Arc<Counters>,
    state: Mutex<IngestState>,
    running: Arc<AtomicBool>,
    signal: Signal,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Profiler {
    /// Creates a profiler. No sampling happens until [`Profiler::spawn`].
    pub fn new(config: Config) -> Result<Profiler, Error> {
        config.validate().map_err(Error::Config)?;
        Ok(Profiler {
            config,
            timer: Instant::now(),
            queue: MessageQueue::new(),
            registry: FrameRegistry::new(),
            destinations: FanOut::new(),
            counters: Arc::new(Counters::default()),
            state: Mutex::new(IngestState::default()),
            running: Arc::new(AtomicBool::new(true)),
            signal: Signal::new(),
            worker: Mutex::new(None),
        })
    }

    /// The frame registry instrumented threads push their frames through.
    pub fn registry(&self) -> &FrameRegistry {
        &self.registry
    }

    /// Registers a destination for finished call graphs. Destinations are
    /// invoked in registration order.
    pub fn add_destination(&self, destination: impl Destination + 'static) {
        self.destinations.add(Box::new(destination));
    }

    /// Reads the drop counters.
    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    /// Ingests one structured log message.
    ///
    /// This is the single entry point the log framework pushes messages
    /// through, from arbitrary application threads. It is total: messages
    /// the profiler cannot use are counted and dropped, and nothing is ever
    /// raised back into the caller. After [`Profiler::stop`] it is a silent
    /// no-op.
    pub fn handle_message(&self, message: Payload) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let status = match message::action_status(&message) {
            Ok(status) => status,
            Err(_) => {
                self.counters.note_malformed();
                return;
            }
        };
        let task = match message::task_uuid(&message) {
            Ok(task) => task.map(str::to_owned),
            Err(_) => {
                self.counters.note_malformed();
                return;
            }
        };

        let thread = current_thread();
        let next_task_uuid = {
            let mut guard = self.state.lock().expect("failed to lock ingest state");
            let state = &mut *guard;
            let stack = state.actions.entry(thread.clone()).or_default();
            match status {
                Some(ActionStatus::Started) => {
                    let Some(task) = task else {
                        self.counters.note_malformed();
                        return;
                    };
                    if stack.is_empty() {
                        // A root action opens: charge the per-run cap.
                        if let Some(cap) = self.config.max_actions_per_run {
                            if state.actions_this_run >= cap {
                                self.counters.note_dropped();
                                return;
                            }
                        }
                        state.actions_this_run += 1;
                    }
                    stack.push(task.clone());
                    Some(task)
                }
                Some(status) if status.is_terminal() => {
                    let Some(task) = task else {
                        self.counters.note_malformed();
                        return;
                    };
                    match stack.iter().rposition(|active| active == &task) {
                        Some(position) => {
                            stack.remove(position);
                        }
                        None => {
                            // The end of an action that was never admitted.
                            self.counters.note_dropped();
                            return;
                        }
                    }
                    stack.last().cloned()
                }
                _ => {
                    // A mid-action log message.
                    if !self.config.store_all_logs {
                        self.counters.note_dropped();
                        return;
                    }
                    let Some(current) = stack.last() else {
                        // No active action on this thread to attach to.
                        self.counters.note_dropped();
                        return;
                    };
                    Some(current.clone())
                }
            }
        };

        self.queue.push(MessageInfo {
            message,
            next_task_uuid,
            frame: self.registry.snapshot_current(),
            thread,
            monotonic: self.timer.elapsed().as_secs_f64(),
            clock: chrono::Local::now().naive_local(),
        });
    }

    /// Starts the sampling worker on its own thread, sampling this
    /// profiler's frame registry.
    pub fn spawn(&self) -> Result<(), Error> {
        self.spawn_with_source(Box::new(self.registry.clone()))
    }

    /// Starts the sampling worker with a custom stack source.
    pub fn spawn_with_source(&self, source: Box<dyn StackSource>) -> Result<(), Error> {
        let mut slot = self.worker.lock().expect("failed to lock worker handle");
        if slot.is_some() {
            return Err(Error::AlreadyRunning);
        }
        if !self.running.load(Ordering::Acquire) {
            return Err(Error::Stopped);
        }
        let worker = ProfileWorker::new(
            self.config.clone(),
            self.queue.clone(),
            source,
            self.destinations.clone(),
            self.counters.clone(),
        );
        let timer = self.timer;
        let running = self.running.clone();
        let signal = self.signal.clone();
        let handle = std::thread::Builder::new()
            .name("actiongraph-sampler".to_owned())
            .spawn(move || worker.run(timer, running, signal))
            .map_err(Error::Spawn)?;
        *slot = Some(handle);
        Ok(())
    }

    /// Stops the profiler.
    ///
    /// Later messages are ignored; the worker wakes, drains the queue,
    /// emits every open call graph, and exits before this returns.
    /// Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.signal.ping();
        let handle = self
            .worker
            .lock()
            .expect("failed to lock worker handle")
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::warn!("profiler worker panicked during shutdown");
            }
        }
    }
}

impl Drop for Profiler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {

    use serde_json::json;

    use crate::config::Config;
    use crate::message::{MessageInfo, Payload};

    use super::Profiler;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().expect("payload must be an object")
    }

    fn drain(profiler: &Profiler) -> Vec<MessageInfo> {
        let mut messages = Vec::new();
        profiler.queue.drain_into(&mut messages);
        messages
    }

    #[test]
    fn max_actions_per_run_caps_root_actions() {
        let config = Config {
            max_actions_per_run: Some(2),
            ..Config::default()
        };
        let profiler = Profiler::new(config).unwrap();
        profiler.handle_message(payload(json!({"task_uuid": "1", "action_status": "started"})));
        profiler.handle_message(payload(json!({"task_uuid": "1", "action_status": "succeeded"})));
        profiler.handle_message(payload(json!({"task_uuid": "2", "action_status": "started"})));
        profiler.handle_message(payload(json!({"task_uuid": "2a", "action_status": "started"})));
        profiler.handle_message(payload(json!({"task_uuid": "2a", "action_status": "failed"})));
        profiler.handle_message(payload(json!({"task_uuid": "2", "action_status": "failed"})));
        profiler.handle_message(payload(json!({"task_uuid": "3", "action_status": "started"})));
        profiler.handle_message(payload(json!({"task_uuid": "3", "action_status": "succeeded"})));

        let messages = drain(&profiler);
        assert_eq!(6, messages.len());
        let next: Vec<Option<&str>> = messages
            .iter()
            .map(|info| info.next_task_uuid.as_deref())
            .collect();
        assert_eq!(
            vec![Some("1"), None, Some("2"), Some("2a"), Some("2"), None],
            next
        );
        assert_eq!(2, profiler.counters().dropped_messages);
    }

    #[test]
    fn messages_outside_any_action_are_dropped() {
        let config = Config {
            store_all_logs: true,
            ..Config::default()
        };
        let profiler = Profiler::new(config).unwrap();
        profiler.handle_message(payload(json!({"task_uuid": "99", "msg": "outside"})));
        profiler.handle_message(payload(json!({"task_uuid": "1", "action_status": "started"})));
        profiler.handle_message(payload(json!({"task_uuid": "1", "msg": "inside"})));
        profiler.handle_message(payload(json!({"task_uuid": "1", "action_status": "failed"})));

        let messages = drain(&profiler);
        assert_eq!(3, messages.len());
        assert_eq!("started", messages[0].message["action_status"]);
        assert_eq!("inside", messages[1].message["msg"]);
        assert_eq!("failed", messages[2].message["action_status"]);
    }

    #[test]
    fn mid_action_messages_are_dropped_unless_requested() {
        let profiler = Profiler::new(Config::default()).unwrap();
        profiler.handle_message(payload(json!({"task_uuid": "1", "action_status": "started"})));
        profiler.handle_message(payload(json!({"task_uuid": "1", "msg": "inside"})));
        profiler.handle_message(payload(json!({"task_uuid": "1", "action_status": "failed"})));

        let messages = drain(&profiler);
        assert_eq!(2, messages.len());
        assert_eq!("started", messages[0].message["action_status"]);
        assert_eq!("failed", messages[1].message["action_status"]);
        assert_eq!(1, profiler.counters().dropped_messages);
    }

    #[test]
    fn nested_actions_reusing_a_task_uuid_close_outside_in() {
        let profiler = Profiler::new(Config::default()).unwrap();
        profiler.handle_message(payload(json!({"task_uuid": "1", "action_status": "started"})));
        profiler.handle_message(payload(json!({"task_uuid": "1", "action_status": "started"})));
        profiler.handle_message(payload(json!({"task_uuid": "1", "action_status": "succeeded"})));
        profiler.handle_message(payload(json!({"task_uuid": "1", "action_status": "succeeded"})));

        let next: Vec<Option<String>> = drain(&profiler)
            .into_iter()
            .map(|info| info.next_task_uuid)
            .collect();
        // The inner end keeps the task active; only the outer end clears it.
        assert_eq!(
            vec![
                Some("1".to_owned()),
                Some("1".to_owned()),
                Some("1".to_owned()),
                None
            ],
            next
        );
    }

    #[test]
    fn malformed_messages_are_counted_and_ignored() {
        let profiler = Profiler::new(Config::default()).unwrap();
        profiler.handle_message(payload(json!({"task_uuid": 7, "action_status": "started"})));
        profiler.handle_message(payload(json!({"task_uuid": "1", "action_status": "finished"})));
        profiler.handle_message(payload(json!({"action_status": "started"})));

        assert!(drain(&profiler).is_empty());
        assert_eq!(3, profiler.counters().malformed_messages);
    }

    #[test]
    fn handle_message_after_stop_is_a_no_op() {
        let profiler = Profiler::new(Config::default()).unwrap();
        profiler.stop();
        profiler.handle_message(payload(json!({"task_uuid": "1", "action_status": "started"})));
        assert!(drain(&profiler).is_empty());
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        let config = Config {
            max_overhead: 0.0,
            ..Config::default()
        };
        assert!(Profiler::new(config).is_err());
    }
}
