//! # RCL Demo
//!
//! One context, two nodes, three roles:
//!
//! ```text
//!  talker timer ──publish──→ /demo/chatter ──→ listener ┐
//!                                                     ├─ server executor (blocking thread)
//!  caller executor ──(a, b)──→ /demo/add_two_ints ──→   ┘
//!        ↑                                          │
//!        └────────────── a + b (matched by sequence number)
//!        │
//!        └──→ mpsc ──→ tokio task (logs results, counts calls)
//! ```
//!
//! The talker prefixes every message with its `publish_string_prefix`
//! parameter, declared as `Hello World`.
//!
//! Usage: `rcl-demo [max_calls]`. Without `max_calls` the demo runs until
//! Ctrl+C. Either way the context is shut down, which interrupts both
//! executors' waits.

use std::time::Duration;

use anyhow::{Context as _, Result};
use rcl_core::{Client, Context, Executor, Node, Publisher, RclConfig, RclResult};
use rcl_telemetry::TelemetryConfig;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const TOPIC: &str = "chatter";
const SERVICE: &str = "add_two_ints";
const PREFIX_PARAMETER: &str = "publish_string_prefix";
const PUBLISH_PERIOD: Duration = Duration::from_millis(500);
const CALL_PERIOD: Duration = Duration::from_secs(1);

/// `(a, b, a + b)` as answered by the service.
type Answer = (i64, i64, i64);

/// Send one request per `CALL_PERIOD` until the context shuts down.
fn run_caller(context: Context, client: Client, answers: mpsc::UnboundedSender<Answer>) -> RclResult<()> {
    let mut caller = Executor::new(&context);
    let key = caller.add_client(client);

    let mut a = 0i64;
    while context.ok() {
        a += 1;
        let b = a * 10;
        let tx = answers.clone();
        match caller.call(key, &(a, b), move |sum: i64| {
            let _ = tx.send((a, b, sum));
        }) {
            Ok(sequence) => debug!(sequence, a, b, "Request sent"),
            Err(_) if !context.ok() => break,
            Err(e) => return Err(e),
        }
        caller.spin_until(|| false, CALL_PERIOD)?;
    }
    info!(pending = caller.pending_calls(key), "Caller stopped");
    Ok(())
}

/// Timer callback body: publish `"<prefix>: <count>"`.
fn publish_chatter(talker: &Node, publisher: &Publisher, count: u64) {
    let prefix = talker
        .get_parameter(PREFIX_PARAMETER)
        .ok()
        .and_then(|value| value.as_str().map(str::to_owned))
        .unwrap_or_default();
    let message = format!("{}: {}", prefix, count);
    match publisher.publish(&message) {
        Ok(()) => info!(%message, "Publishing"),
        Err(e) => warn!(error = %e, "Publish failed"),
    }
}

fn parse_max_calls() -> Result<Option<usize>> {
    std::env::args()
        .nth(1)
        .map(|arg| arg.parse::<usize>())
        .transpose()
        .context("usage: rcl-demo [max_calls]")
}

#[tokio::main]
async fn main() -> Result<()> {
    rcl_telemetry::init_logging(&TelemetryConfig::for_service("rcl-demo"))?;
    let max_calls = parse_max_calls()?;

    let config = RclConfig::from_env();
    config.validate().context("invalid RCL configuration")?;
    let context = Context::init(config).context("failed to initialize context")?;
    let node = context.create_node("demo", "/demo")?;
    info!(node = %node.fully_qualified_name(), rmw = context.rmw_identifier(), "Demo node up");

    // Talker: timer-driven publisher, prefix from a node parameter
    let talker = context.create_node("talker", "/demo")?;
    talker.declare_parameter(PREFIX_PARAMETER, "Hello World")?;
    let publisher = talker.create_publisher(TOPIC)?;
    let timer = talker.create_timer(PUBLISH_PERIOD)?;

    // Server side: talker + listener + adder
    let mut server = Executor::new(&context);
    let mut count = 0u64;
    server.add_timer(timer, move || {
        publish_chatter(&talker, &publisher, count);
        count += 1;
    });
    server.add_subscription(node.create_subscription(TOPIC)?, |message: String| {
        info!(%message, "Heard");
    });
    server.add_service(node.create_service(SERVICE)?, |(a, b): (i64, i64)| a + b);
    let server_task = tokio::task::spawn_blocking(move || server.spin());

    // Caller side
    let (answers_tx, mut answers_rx) = mpsc::unbounded_channel();
    let client = node.create_client(SERVICE)?;
    let caller_context = context.clone();
    let caller_task =
        tokio::task::spawn_blocking(move || run_caller(caller_context, client, answers_tx));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("Demo is running. Press Ctrl+C to stop.");
    let mut answered = 0usize;
    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal?;
                info!("Ctrl+C received");
                break;
            }
            Some((a, b, sum)) = answers_rx.recv() => {
                info!(a, b, sum, "Service answered");
                answered += 1;
                if max_calls.is_some_and(|max| answered >= max) {
                    break;
                }
            }
        }
    }

    // Graceful shutdown: interrupts both executors
    context.shutdown()?;
    server_task.await??;
    caller_task.await??;
    info!(answered, "Demo stopped");
    Ok(())
}
