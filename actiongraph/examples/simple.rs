//! Profiles a small recursive workload and prints the finished call graph
//! to stderr as a JSON line.
//!
//! Run with `cargo run --example simple`.

use actiongraph::{Config, Frame, JsonLinesDestination, Payload, Profiler};
use serde_json::json;

fn main() -> Result<(), actiongraph::Error> {
    env_logger::init();

    let config = Config {
        time_granularity: 0.005,
        code_granularity: "method".parse().expect("granularity"),
        store_all_logs: true,
        ..Config::default()
    };

    let profiler = Profiler::new(config)?;
    profiler.add_destination(JsonLinesDestination::new(std::io::stderr()));
    profiler.spawn()?;

    let registry = profiler.registry().clone();
    let _main = registry.enter(Frame::new("examples/simple.rs", "main", 9, "app"));

    profiler.handle_message(payload(json!({
        "task_uuid": "demo-1",
        "action_status": "started",
        "action_type": "demo:fibonacci",
    })));
    {
        let _work = registry.enter(Frame::new("examples/simple.rs", "fibonacci", 44, "app"));
        let value = fibonacci(32);
        profiler.handle_message(payload(json!({
            "task_uuid": "demo-1",
            "value": value,
        })));
    }
    profiler.handle_message(payload(json!({
        "task_uuid": "demo-1",
        "action_status": "succeeded",
        "action_type": "demo:fibonacci",
    })));

    profiler.stop();
    Ok(())
}

fn fibonacci(n: u64) -> u64 {
    if n < 2 {
        n
    } else {
        fibonacci(n - 1) + fibonacci(n - 2)
    }
}

fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().expect("payload must be an object")
}
