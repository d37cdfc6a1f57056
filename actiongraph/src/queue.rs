//! The multi-producer message queue and the worker wakeup signal.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::Thread;
use std::time::Duration;

use crate::message::MessageInfo;

/// A signal appropriate to wake a single thread.
///
/// Internally this type uses thread parking and unparking, where the first
/// thread to call `wait_timeout` is registered as the thread to wake. Other
/// threads that call `wait_timeout` will just be parked without registering
/// themselves, which would probably be a bug (of theirs).
#[derive(Clone)]
pub(crate) struct Signal {
    thread: Arc<RwLock<Option<Thread>>>,
}

impl Signal {
    /// Creates a new signal.
    pub fn new() -> Self {
        Signal {
            thread: Arc::new(RwLock::new(None)),
        }
    }

    /// Parks the caller for at most `duration`, unless pinged first.
    ///
    /// It is important not to block on the first call; doing so would fail
    /// to unblock from pings before the first call to wait. This may appear
    /// as a spurious wake-up, and the caller is prepared for that.
    pub fn wait_timeout(&self, duration: Duration) {
        if self.thread.read().expect("failed to read thread").is_none() {
            *self.thread.write().expect("failed to set thread") = Some(std::thread::current());
        } else {
            std::thread::park_timeout(duration);
        }
    }

    /// Unblocks the current or next call to wait.
    pub fn ping(&self) {
        if let Some(thread) = self.thread.read().expect("failed to read thread").as_ref() {
            thread.unpark();
        }
    }
}

/// The multi-producer, single-consumer message queue.
///
/// Application threads append from `handle_message`; only the profiler
/// worker drains. The short lock around the deque is the only blocking on
/// the producer path, so per-thread enqueue order is preserved and
/// producers never wait on each other for long.
#[derive(Clone)]
pub(crate) struct MessageQueue {
    queue: Arc<Mutex<VecDeque<MessageInfo>>>,
}

impl MessageQueue {
    /// Allocates an empty queue.
    pub fn new() -> Self {
        MessageQueue {
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Appends a message.
    pub fn push(&self, info: MessageInfo) {
        self.queue
            .lock()
            .expect("failed to lock message queue")
            .push_back(info);
    }

    /// Moves every pending message into `buffer`, preserving order.
    pub fn drain_into(&self, buffer: &mut Vec<MessageInfo>) {
        let mut queue = self.queue.lock().expect("failed to lock message queue");
        buffer.extend(queue.drain(..));
    }
}
