//! Destinations for finished call graphs.

use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::counters::Counters;

/// Receives one JSON-shaped record per finished task graph.
///
/// Destinations are invoked from the profiler worker in registration order,
/// so a slow destination directly consumes the overhead budget. The record
/// is handed over unserialized; each destination decides its own encoding.
pub trait Destination: Send {
    /// Accepts one emitted record.
    fn push(&mut self, record: &Value) -> io::Result<()>;
}

impl<F: FnMut(&Value) + Send> Destination for F {
    fn push(&mut self, record: &Value) -> io::Result<()> {
        self(record);
        Ok(())
    }
}

/// A writer-backed destination encoding one record per line of JSON.
pub struct JsonLinesDestination<W: Write> {
    writer: W,
    flush: bool,
}

impl<W: Write> JsonLinesDestination<W> {
    /// Wraps a writer, flushing after every record.
    pub fn new(writer: W) -> Self {
        JsonLinesDestination {
            writer,
            flush: true,
        }
    }

    /// Wraps a writer without per-record flushing. Cuts overhead, at the
    /// risk of losing the tail of the stream on a crash.
    pub fn buffered(writer: W) -> Self {
        JsonLinesDestination {
            writer,
            flush: false,
        }
    }
}

impl JsonLinesDestination<TcpStream> {
    /// Connects to a TCP consumer of JSON-lines records.
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        Ok(JsonLinesDestination::new(TcpStream::connect(addr)?))
    }
}

impl<W: Write + Send> Destination for JsonLinesDestination<W> {
    fn push(&mut self, record: &Value) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        if self.flush {
            self.writer.flush()?;
        }
        Ok(())
    }
}

/// The registered destination list.
///
/// Append-only after startup; the worker holds the lock only around
/// dispatch, and registration is a short critical section.
#[derive(Clone, Default)]
pub(crate) struct FanOut {
    sinks: Arc<Mutex<Vec<Box<dyn Destination>>>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, sink: Box<dyn Destination>) {
        self.sinks
            .lock()
            .expect("failed to lock destinations")
            .push(sink);
    }

    /// Hands `record` to every destination in registration order. A failure
    /// is counted and logged; the remaining destinations still receive the
    /// record, and the failing one stays registered.
    pub fn dispatch(&self, record: &Value, counters: &Counters) {
        let mut sinks = self.sinks.lock().expect("failed to lock destinations");
        for (index, sink) in sinks.iter_mut().enumerate() {
            if let Err(error) = sink.push(record) {
                counters.note_sink_failure();
                log::warn!("destination {index} failed to accept record: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {

    use std::io;
    use std::sync::{Arc, Mutex};

    use serde_json::{json, Value};

    use super::{Destination, FanOut, JsonLinesDestination};
    use crate::counters::Counters;

    struct Broken;

    impl Destination for Broken {
        fn push(&mut self, _record: &Value) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
        }
    }

    #[test]
    fn json_lines_encodes_one_record_per_line() {
        let mut buffer = Vec::new();
        {
            let mut sink = JsonLinesDestination::new(&mut buffer);
            sink.push(&json!({"task_uuid": "1"})).unwrap();
            sink.push(&json!({"task_uuid": "2"})).unwrap();
        }
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(vec![json!({"task_uuid": "1"}), json!({"task_uuid": "2"})], lines);
    }

    #[test]
    fn a_failing_sink_does_not_starve_the_others() {
        let counters = Counters::default();
        let fanout = FanOut::new();
        let received = Arc::new(Mutex::new(Vec::new()));

        fanout.add(Box::new(Broken));
        let sink = received.clone();
        fanout.add(Box::new(move |record: &Value| {
            sink.lock().unwrap().push(record.clone());
        }));

        fanout.dispatch(&json!({"task_uuid": "1"}), &counters);
        fanout.dispatch(&json!({"task_uuid": "2"}), &counters);

        assert_eq!(2, received.lock().unwrap().len());
        assert_eq!(2, counters.snapshot().sink_failures);
    }
}
