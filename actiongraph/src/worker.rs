//! The sampling worker: the loop that owns all profiling state.
//!
//! Every mutation of call-graph roots, the live-roots map, and emission
//! happens on this one thread, so the trees need no synchronization of
//! their own. Application threads only ever touch the message queue.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use serde_json::Value;

use actiongraph_callgraph::{extract_stack, CallGraphRoot, ThreadId};

use crate::config::Config;
use crate::counters::Counters;
use crate::destination::FanOut;
use crate::message::MessageInfo;
use crate::queue::{MessageQueue, Signal};
use crate::registry::StackSource;

pub(crate) struct ProfileWorker {
    config: Config,
    queue: MessageQueue,
    source: Box<dyn StackSource>,
    destinations: FanOut,
    counters: Arc<Counters>,
    /// Live trees, keyed by the thread and task that own them.
    roots: HashMap<(ThreadId, String), CallGraphRoot>,
    /// Tasks currently holding at least one live root.
    tracked: HashSet<String>,
    /// Tasks turned away because the concurrency cap was full.
    rejected: HashSet<String>,
    /// The task samples on each thread currently attribute to.
    attribution: HashMap<ThreadId, String>,
    message_buffer: Vec<MessageInfo>,
}

impl ProfileWorker {
    pub fn new(
        config: Config,
        queue: MessageQueue,
        source: Box<dyn StackSource>,
        destinations: FanOut,
        counters: Arc<Counters>,
    ) -> Self {
        ProfileWorker {
            config,
            queue,
            source,
            destinations,
            counters,
            roots: HashMap::new(),
            tracked: HashSet::new(),
            rejected: HashSet::new(),
            attribution: HashMap::new(),
            message_buffer: Vec::new(),
        }
    }

    /// Drives [`ProfileWorker::step`] until stopped.
    ///
    /// Each pass measures its own cost and sleeps for
    /// `max(time_granularity, work * (1/max_overhead - 1))`: if sampling
    /// cost `work` and consumed fraction `max_overhead` of the period, the
    /// remainder is exactly that sleep, so steady-state overhead stays
    /// within budget. The sleep parks on `signal`, so `stop` cuts it short.
    /// On the way out the worker drains the queue once more and emits every
    /// still-open root.
    pub fn run(mut self, timer: Instant, running: Arc<AtomicBool>, signal: Signal) {
        log::info!("profiler worker started");
        let mut last = timer.elapsed().as_secs_f64();
        while running.load(Ordering::Acquire) {
            let now = timer.elapsed().as_secs_f64();
            self.step(now - last, now, chrono::Local::now().naive_local());
            last = now;

            let work = timer.elapsed().as_secs_f64() - now;
            let sleep = (work * (1.0 / self.config.max_overhead - 1.0))
                .max(self.config.time_granularity);
            signal.wait_timeout(Duration::from_secs_f64(sleep));
        }

        let now = timer.elapsed().as_secs_f64();
        self.step(now - last, now, chrono::Local::now().naive_local());
        self.finish();
    }

    /// One pass of the loop: drain queued messages into their roots, sample
    /// every thread with an active task, and emit whatever closed.
    ///
    /// `delta` is the time since the previous pass, which every root absorbs
    /// for its sample; `now` and `now_wall` are this pass's monotonic and
    /// wall readings.
    pub fn step(&mut self, delta: f64, now: f64, now_wall: NaiveDateTime) {
        let mut batch = std::mem::take(&mut self.message_buffer);
        self.queue.drain_into(&mut batch);
        for info in batch.drain(..) {
            self.ingest_message(info);
        }
        self.message_buffer = batch;

        for sample in self.source.current_frames() {
            let Some(task) = self.attribution.get(&sample.thread).cloned() else {
                continue;
            };
            let stack = extract_stack(
                &sample.frames,
                self.config.code_granularity,
                &self.config.stack_filters,
            );
            let Some(root) = self.root_for(&sample.thread, &task, now_wall, now) else {
                continue;
            };
            if let Err(error) = root.ingest(&stack, delta, now, None) {
                self.counters.note_dropped_sample();
                log::warn!("dropped sample for task {task}: {error}");
            }
        }
    }

    /// Routes one queued message: into the task's root (creating it,
    /// anchored at the message's clocks, on first contact), then out again
    /// if the message ended the task's outermost action on this thread.
    fn ingest_message(&mut self, info: MessageInfo) {
        let MessageInfo {
            message,
            next_task_uuid,
            frame,
            thread,
            monotonic,
            clock,
        } = info;

        // The task this message belongs to. End messages still route to the
        // action they close, not to the task they hand attribution back to.
        let task = match message.get("task_uuid").and_then(Value::as_str) {
            Some(task) => task.to_owned(),
            None => match &next_task_uuid {
                Some(task) => task.clone(),
                None => {
                    self.counters.note_dropped();
                    self.update_attribution(thread, next_task_uuid);
                    return;
                }
            },
        };

        let stack = extract_stack(
            &frame,
            self.config.code_granularity,
            &self.config.stack_filters,
        );
        if let Some(root) = self.root_for(&thread, &task, clock, monotonic) {
            if let Err(error) = root.ingest(&stack, 0.0, monotonic, Some(Value::Object(message)))
            {
                self.counters.note_dropped_sample();
                log::warn!("dropped message record for task {task}: {error}");
            }
        }

        if next_task_uuid.as_deref() != Some(task.as_str()) {
            // Attribution left the task: its outermost action on this
            // thread has ended.
            self.emit(&thread, &task);
        }
        self.update_attribution(thread, next_task_uuid);
    }

    fn update_attribution(&mut self, thread: ThreadId, next: Option<String>) {
        match next {
            Some(task) => {
                self.attribution.insert(thread, task);
            }
            None => {
                self.attribution.remove(&thread);
            }
        }
    }

    /// Looks up the root for `(thread, task)`, creating it anchored at the
    /// supplied clocks when the task can still be admitted. Returns `None`
    /// for tasks the concurrency cap turned away.
    fn root_for(
        &mut self,
        thread: &ThreadId,
        task: &str,
        anchor_wall: NaiveDateTime,
        anchor_monotonic: f64,
    ) -> Option<&mut CallGraphRoot> {
        let key = (thread.clone(), task.to_owned());
        if !self.roots.contains_key(&key) {
            if self.rejected.contains(task) {
                return None;
            }
            if !self.tracked.contains(task)
                && self.tracked.len() >= self.config.simultaneous_tasks_profiled
            {
                self.rejected.insert(task.to_owned());
                self.counters.note_rejected();
                log::debug!(
                    "task {task} not profiled: {} tasks already tracked",
                    self.tracked.len()
                );
                return None;
            }
            self.tracked.insert(task.to_owned());
            self.roots.insert(
                key.clone(),
                CallGraphRoot::new(thread.clone(), task, anchor_wall, anchor_monotonic),
            );
        }
        self.roots.get_mut(&key)
    }

    /// Finalizes a root: removes it from the live set, frees the task's
    /// slot once its last root is gone, and hands the serialized record to
    /// the destinations. Emitted trees are never touched again.
    fn emit(&mut self, thread: &ThreadId, task: &str) {
        let key = (thread.clone(), task.to_owned());
        let Some(root) = self.roots.remove(&key) else {
            // A task the cap turned away has ended; it may be admitted if
            // it ever starts again.
            self.rejected.remove(task);
            return;
        };
        if !self.roots.keys().any(|(_, live)| live == task) {
            self.tracked.remove(task);
        }

        let mut record = root.jsonize();
        if let Some(source) = &self.config.source_name {
            if let Value::Object(map) = &mut record {
                map.insert("source".to_owned(), Value::String(source.clone()));
            }
        }
        log::debug!("emitting call graph for task {task} on thread {thread}");
        self.destinations.dispatch(&record, &self.counters);
    }

    /// Emits every remaining open root. Their end timestamps already record
    /// the last observed activity, which is the honest terminal reading for
    /// an interrupted action.
    fn finish(&mut self) {
        let keys: Vec<_> = self.roots.keys().cloned().collect();
        if !keys.is_empty() {
            log::info!("finalizing {} open call graphs at shutdown", keys.len());
        }
        for (thread, task) in keys {
            self.emit(&thread, &task);
        }
        log::info!("profiler worker stopped");
    }
}
