//! Timer-driven producer/consumer demo.
//!
//! A producer writes an increasing counter to its output on every
//! timer tick; a consumer logs what it receives. The producer
//! requests shutdown after five ticks.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use cadence_runtime::{Duration, Environment, Value};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> cadence_runtime::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hello_timer=info,cadence_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut env = Environment::new();

    let producer = env.add_reactor("producer", None)?;
    let tick = env.add_timer(
        producer,
        "tick",
        Duration::ZERO,
        Duration::from_millis(100),
    )?;
    let out = env.add_output(producer, "out")?;
    let count = Arc::new(AtomicI64::new(0));
    let emit = env.add_reaction(
        producer,
        "emit",
        1,
        Box::new(move |ctx| {
            let n = count.fetch_add(1, Ordering::Relaxed);
            ctx.set(out, Value::Int(n)).expect("producer output is unbound");
            if n >= 4 {
                ctx.request_shutdown();
            }
        }),
    )?;
    env.set_assembly(
        producer,
        Box::new(move |env| {
            env.declare_action_trigger(emit, tick)?;
            env.declare_antidependency(emit, out)
        }),
    )?;

    let consumer = env.add_reactor("consumer", None)?;
    let input = env.add_input(consumer, "in")?;
    let print = env.add_reaction(
        consumer,
        "print",
        1,
        Box::new(move |ctx| {
            if let Some(value) = ctx.get(input) {
                info!(?value, elapsed = ?ctx.elapsed_logical_time(), "received");
            }
        }),
    )?;
    env.set_assembly(
        consumer,
        Box::new(move |env| {
            env.bind(out, input)?;
            env.declare_port_trigger(print, input)
        }),
    )?;

    env.assemble()?;
    env.startup()?;
    env.execute()
}
