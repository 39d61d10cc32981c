//! End-to-end scenarios for the cadence runtime.
//!
//! Each test builds a reactor program through the environment's
//! construction and assembly APIs, runs it to completion, and checks
//! the runtime's guarantees: deterministic execution order, index
//! correctness, binding semantics, cycle detection, timer and
//! deadline behavior, and cooperative shutdown.

use cadence_tests::Recorder;

use cadence_runtime::{Duration, Environment, Error, Phase, Value};

/// Two reactions of one reactor, both triggered by the same timer,
/// execute in ascending priority order at the start tag.
#[test]
fn test_two_reactions_execute_in_priority_order() {
    let recorder = Recorder::new();
    let mut env = Environment::with_options(false, true);

    let r = env.add_reactor("r", None).unwrap();
    let t = env.add_timer(r, "t", Duration::ZERO, Duration::ZERO).unwrap();
    let rec = recorder.clone();
    let a = env
        .add_reaction(
            r,
            "a",
            1,
            Box::new(move |ctx| {
                rec.record(format!(
                    "a@{}/{}",
                    ctx.elapsed_logical_time().as_nanos(),
                    ctx.logical_time().microstep()
                ));
            }),
        )
        .unwrap();
    let rec = recorder.clone();
    let b = env
        .add_reaction(
            r,
            "b",
            2,
            Box::new(move |ctx| {
                rec.record(format!(
                    "b@{}/{}",
                    ctx.elapsed_logical_time().as_nanos(),
                    ctx.logical_time().microstep()
                ));
            }),
        )
        .unwrap();
    env.set_assembly(
        r,
        Box::new(move |env| {
            env.declare_action_trigger(a, t)?;
            env.declare_action_trigger(b, t)
        }),
    )
    .unwrap();

    env.assemble().unwrap();
    env.startup().unwrap();
    assert!(env.reaction_index(a).unwrap() < env.reaction_index(b).unwrap());

    env.execute().unwrap();
    assert_eq!(recorder.entries(), vec!["a@0/0", "b@0/0"]);
}

/// A producer's writer reaction is indexed below the consumer
/// reaction reading through the binding, and the value arrives.
#[test]
fn test_producer_consumer_across_reactors() {
    let recorder = Recorder::new();
    let mut env = Environment::with_options(false, true);

    let p = env.add_reactor("p", None).unwrap();
    let t = env.add_timer(p, "t", Duration::ZERO, Duration::ZERO).unwrap();
    let out = env.add_output(p, "o").unwrap();
    let w = env
        .add_reaction(
            p,
            "w",
            1,
            Box::new(move |ctx| ctx.set(out, Value::Int(42)).unwrap()),
        )
        .unwrap();
    env.set_assembly(
        p,
        Box::new(move |env| {
            env.declare_action_trigger(w, t)?;
            env.declare_antidependency(w, out)
        }),
    )
    .unwrap();

    let c = env.add_reactor("c", None).unwrap();
    let input = env.add_input(c, "i").unwrap();
    let rec = recorder.clone();
    let r = env
        .add_reaction(
            c,
            "r",
            1,
            Box::new(move |ctx| {
                if let Some(Value::Int(n)) = ctx.get(input) {
                    rec.record(format!("received {n}"));
                }
            }),
        )
        .unwrap();
    env.set_assembly(
        c,
        Box::new(move |env| {
            env.bind(out, input)?;
            env.declare_port_trigger(r, input)
        }),
    )
    .unwrap();

    env.assemble().unwrap();
    env.startup().unwrap();
    assert!(env.reaction_index(w).unwrap() < env.reaction_index(r).unwrap());

    env.execute().unwrap();
    assert_eq!(recorder.entries(), vec!["received 42"]);
}

/// Input-to-input binding down the containment tree: the inward walk
/// from the contained reactor's input reaches the container's input,
/// so its writer is ordered before the reader.
#[test]
fn test_binding_chain_roots_at_the_written_input() {
    let recorder = Recorder::new();
    let mut env = Environment::with_options(false, true);

    let c = env.add_reactor("c", None).unwrap();
    let a = env.add_reactor("a", Some(c)).unwrap();
    let b = env.add_reactor("b", Some(a)).unwrap();

    let t = env.add_timer(c, "t", Duration::ZERO, Duration::ZERO).unwrap();
    let a_in = env.add_input(a, "in").unwrap();
    let b_in = env.add_input(b, "in").unwrap();

    let w = env
        .add_reaction(
            c,
            "w",
            1,
            Box::new(move |ctx| ctx.set(a_in, Value::Int(5)).unwrap()),
        )
        .unwrap();
    env.set_assembly(
        c,
        Box::new(move |env| {
            env.declare_action_trigger(w, t)?;
            env.declare_antidependency(w, a_in)
        }),
    )
    .unwrap();

    env.set_assembly(a, Box::new(move |env| env.bind(a_in, b_in))).unwrap();

    let rec = recorder.clone();
    let r = env
        .add_reaction(
            b,
            "r",
            1,
            Box::new(move |ctx| {
                if let Some(Value::Int(n)) = ctx.get(b_in) {
                    rec.record(format!("{n}"));
                }
            }),
        )
        .unwrap();
    env.set_assembly(b, Box::new(move |env| env.declare_port_trigger(r, b_in)))
        .unwrap();

    env.assemble().unwrap();

    assert_eq!(env.port_source(b_in), a_in);
    env.startup().unwrap();
    assert!(env.dependency_edges().contains(&(r, w)));
    assert!(env.reaction_index(w).unwrap() < env.reaction_index(r).unwrap());

    env.execute().unwrap();
    assert_eq!(recorder.entries(), vec!["5"]);
}

/// The inward chain of a multi-level binding terminates at the
/// outermost source port.
#[test]
fn test_binding_forest_inward_chain_terminates() {
    let mut env = Environment::new();
    let outer = env.add_reactor("outer", None).unwrap();
    let mid = env.add_reactor("mid", Some(outer)).unwrap();
    let inner = env.add_reactor("inner", Some(mid)).unwrap();

    let outer_in = env.add_input(outer, "in").unwrap();
    let mid_in = env.add_input(mid, "in").unwrap();
    let inner_in = env.add_input(inner, "in").unwrap();

    env.assemble().unwrap();
    env.bind(outer_in, mid_in).unwrap();
    env.bind(mid_in, inner_in).unwrap();

    assert_eq!(env.port_source(inner_in), outer_in);
    assert_eq!(env.port_source(mid_in), outer_in);
    assert_eq!(env.port_source(outer_in), outer_in);
}

/// A port loop between two reactors assembles fine but index
/// calculation detects the cycle and writes the DOT trace first.
#[test]
fn test_cycle_detection_writes_dot_file() {
    let mut env = Environment::new();

    let p1 = env.add_reactor("p1", None).unwrap();
    let p1_in = env.add_input(p1, "in").unwrap();
    let p1_out = env.add_output(p1, "out").unwrap();
    let r1 = env.add_reaction(p1, "r1", 1, Box::new(|_| {})).unwrap();
    env.set_assembly(
        p1,
        Box::new(move |env| {
            env.declare_port_trigger(r1, p1_in)?;
            env.declare_antidependency(r1, p1_out)
        }),
    )
    .unwrap();

    let p2 = env.add_reactor("p2", None).unwrap();
    let p2_in = env.add_input(p2, "in").unwrap();
    let p2_out = env.add_output(p2, "out").unwrap();
    let r2 = env.add_reaction(p2, "r2", 1, Box::new(|_| {})).unwrap();
    env.set_assembly(
        p2,
        Box::new(move |env| {
            env.declare_port_trigger(r2, p2_in)?;
            env.declare_antidependency(r2, p2_out)?;
            env.bind(p1_out, p2_in)?;
            env.bind(p2_out, p1_in)
        }),
    )
    .unwrap();

    env.assemble().unwrap();

    let err = env.startup();
    match err {
        Err(Error::CycleDetected { involved, dot_path }) => {
            assert_eq!(involved.len(), 2);
            let dot = std::fs::read_to_string(dot_path).unwrap();
            // the emitted edges are a superset of the cycle
            assert!(dot.contains("p1_r1 -> p2_r2"));
            assert!(dot.contains("p2_r2 -> p1_r1"));
        }
        other => panic!("expected CycleDetected, got {other:?}"),
    }
}

/// Priority zero is rejected at construction.
#[test]
fn test_priority_zero_fails_at_construction() {
    let mut env = Environment::new();
    let r = env.add_reactor("r", None).unwrap();
    assert!(matches!(
        env.add_reaction(r, "bad", 0, Box::new(|_| {})),
        Err(Error::InvalidPriority(0))
    ));
}

/// Every dependency edge orders its endpoints strictly, and
/// `max_reaction_index` covers all reactions.
#[test]
fn test_index_respects_every_edge() {
    let mut env = Environment::with_options(false, true);

    let p = env.add_reactor("p", None).unwrap();
    let t = env.add_timer(p, "t", Duration::ZERO, Duration::ZERO).unwrap();
    let out = env.add_output(p, "o").unwrap();
    let w = env
        .add_reaction(
            p,
            "w",
            1,
            Box::new(move |ctx| ctx.set(out, Value::Unit).unwrap()),
        )
        .unwrap();
    let w2 = env.add_reaction(p, "w2", 2, Box::new(|_| {})).unwrap();
    env.set_assembly(
        p,
        Box::new(move |env| {
            env.declare_action_trigger(w, t)?;
            env.declare_antidependency(w, out)
        }),
    )
    .unwrap();

    let c = env.add_reactor("c", None).unwrap();
    let input = env.add_input(c, "i").unwrap();
    let r = env.add_reaction(c, "r", 1, Box::new(|_| {})).unwrap();
    env.set_assembly(
        c,
        Box::new(move |env| {
            env.bind(out, input)?;
            env.declare_port_trigger(r, input)
        }),
    )
    .unwrap();

    env.assemble().unwrap();
    env.startup().unwrap();

    let mut max_seen = 0;
    for i in [w, w2, r] {
        max_seen = max_seen.max(env.reaction_index(i).unwrap());
    }
    assert_eq!(env.max_reaction_index(), max_seen);

    for (after, before) in env.dependency_edges() {
        assert!(
            env.reaction_index(*after).unwrap() > env.reaction_index(*before).unwrap(),
            "edge ({after}, {before}) not respected"
        );
    }
}

/// Reactions without any mutual dependency may share an index level.
#[test]
fn test_independent_reactions_share_a_level() {
    let mut env = Environment::new();
    let a = env.add_reactor("a", None).unwrap();
    let b = env.add_reactor("b", None).unwrap();
    let ra = env.add_reaction(a, "r", 1, Box::new(|_| {})).unwrap();
    let rb = env.add_reaction(b, "r", 1, Box::new(|_| {})).unwrap();

    env.assemble().unwrap();
    env.startup().unwrap();

    assert_eq!(env.reaction_index(ra), Some(0));
    assert_eq!(env.reaction_index(rb), Some(0));
    assert_eq!(env.max_reaction_index(), 0);
}

/// A timer with offset O and period P fires at T0+O, T0+O+P, … until
/// shutdown is requested.
#[test]
fn test_timer_fires_at_offset_and_period() {
    let recorder = Recorder::new();
    let mut env = Environment::with_options(false, true);

    let r = env.add_reactor("r", None).unwrap();
    let t = env
        .add_timer(r, "t", Duration::from_millis(10), Duration::from_millis(20))
        .unwrap();
    let rec = recorder.clone();
    let react = env
        .add_reaction(
            r,
            "count",
            1,
            Box::new(move |ctx| {
                rec.record(format!(
                    "{}ms/{}",
                    ctx.elapsed_logical_time().as_millis(),
                    ctx.logical_time().microstep()
                ));
                if rec.len() == 3 {
                    ctx.request_shutdown();
                }
            }),
        )
        .unwrap();
    env.set_assembly(r, Box::new(move |env| env.declare_action_trigger(react, t)))
        .unwrap();

    env.assemble().unwrap();
    env.startup().unwrap();
    env.execute().unwrap();

    assert_eq!(recorder.entries(), vec!["10ms/0", "30ms/0", "50ms/0"]);
    assert_eq!(env.phase(), Phase::Deconstruction);
}

/// When physical time lags behind by more than the deadline at
/// trigger time, the handler runs and the body does not.
#[test]
fn test_deadline_handler_replaces_late_body() {
    let recorder = Recorder::new();
    let mut env = Environment::with_options(false, true);

    let r = env.add_reactor("r", None).unwrap();
    let t = env.add_timer(r, "t", Duration::ZERO, Duration::ZERO).unwrap();

    let rec = recorder.clone();
    let slow = env
        .add_reaction(
            r,
            "slow",
            1,
            Box::new(move |_| {
                rec.record("slow");
                std::thread::sleep(Duration::from_millis(20));
            }),
        )
        .unwrap();

    let rec = recorder.clone();
    let guarded = env
        .add_reaction(r, "guarded", 2, Box::new(move |_| rec.record("body")))
        .unwrap();
    let rec = recorder.clone();
    env.set_deadline(
        guarded,
        Duration::from_millis(5),
        Box::new(move |_| rec.record("handler")),
    )
    .unwrap();

    env.set_assembly(
        r,
        Box::new(move |env| {
            env.declare_action_trigger(slow, t)?;
            env.declare_action_trigger(guarded, t)
        }),
    )
    .unwrap();

    env.assemble().unwrap();
    env.startup().unwrap();
    env.execute().unwrap();

    assert_eq!(recorder.entries(), vec!["slow", "handler"]);
}

/// Scheduling a logical action at zero delay fires its triggers at
/// the next microstep of the same time point.
#[test]
fn test_logical_action_advances_microstep() {
    let recorder = Recorder::new();
    let mut env = Environment::with_options(false, true);

    let r = env.add_reactor("r", None).unwrap();
    let t = env.add_timer(r, "t", Duration::ZERO, Duration::ZERO).unwrap();
    let act = env.add_logical_action(r, "act", Duration::ZERO).unwrap();

    let rec = recorder.clone();
    let first = env
        .add_reaction(
            r,
            "first",
            1,
            Box::new(move |ctx| {
                rec.record(format!("first@{}", ctx.logical_time().microstep()));
                ctx.schedule(act, Value::Unit, Duration::ZERO).unwrap();
            }),
        )
        .unwrap();
    let rec = recorder.clone();
    let second = env
        .add_reaction(
            r,
            "second",
            2,
            Box::new(move |ctx| {
                rec.record(format!("second@{}", ctx.logical_time().microstep()));
            }),
        )
        .unwrap();

    env.set_assembly(
        r,
        Box::new(move |env| {
            env.declare_action_trigger(first, t)?;
            env.declare_schedulable_action(first, act)?;
            env.declare_action_trigger(second, act)
        }),
    )
    .unwrap();

    env.assemble().unwrap();
    env.startup().unwrap();
    env.execute().unwrap();

    assert_eq!(recorder.entries(), vec!["first@0", "second@1"]);
}

/// A logical action's minimum delay floors the requested delay.
#[test]
fn test_logical_action_min_delay_applies() {
    let recorder = Recorder::new();
    let mut env = Environment::with_options(false, true);

    let r = env.add_reactor("r", None).unwrap();
    let t = env.add_timer(r, "t", Duration::ZERO, Duration::ZERO).unwrap();
    let act = env
        .add_logical_action(r, "act", Duration::from_millis(5))
        .unwrap();

    let schedule = env
        .add_reaction(
            r,
            "schedule",
            1,
            Box::new(move |ctx| {
                ctx.schedule(act, Value::Unit, Duration::ZERO).unwrap();
            }),
        )
        .unwrap();
    let rec = recorder.clone();
    let observe = env
        .add_reaction(
            r,
            "observe",
            2,
            Box::new(move |ctx| {
                rec.record(format!("{}ms", ctx.elapsed_logical_time().as_millis()));
            }),
        )
        .unwrap();

    env.set_assembly(
        r,
        Box::new(move |env| {
            env.declare_action_trigger(schedule, t)?;
            env.declare_schedulable_action(schedule, act)?;
            env.declare_action_trigger(observe, act)
        }),
    )
    .unwrap();

    env.assemble().unwrap();
    env.startup().unwrap();
    env.execute().unwrap();

    assert_eq!(recorder.entries(), vec!["5ms"]);
}

/// Scheduling an undeclared action fails with `InvalidSchedule`.
#[test]
fn test_scheduling_undeclared_action_is_rejected() {
    let recorder = Recorder::new();
    let mut env = Environment::with_options(false, true);

    let r = env.add_reactor("r", None).unwrap();
    let t = env.add_timer(r, "t", Duration::ZERO, Duration::ZERO).unwrap();
    let act = env.add_logical_action(r, "act", Duration::ZERO).unwrap();

    let rec = recorder.clone();
    let react = env
        .add_reaction(
            r,
            "react",
            1,
            Box::new(move |ctx| {
                let result = ctx.schedule(act, Value::Unit, Duration::ZERO);
                if matches!(result, Err(Error::InvalidSchedule { .. })) {
                    rec.record("rejected");
                }
            }),
        )
        .unwrap();

    // note: no declare_schedulable_action for `act`
    env.set_assembly(r, Box::new(move |env| env.declare_action_trigger(react, t)))
        .unwrap();

    env.assemble().unwrap();
    env.startup().unwrap();
    env.execute().unwrap();

    assert_eq!(recorder.entries(), vec!["rejected"]);
}

/// A reaction triggered through several ports of one instant runs
/// exactly once.
#[test]
fn test_multiply_triggered_reaction_runs_once() {
    let recorder = Recorder::new();
    let mut env = Environment::with_options(false, true);

    let p = env.add_reactor("p", None).unwrap();
    let t = env.add_timer(p, "t", Duration::ZERO, Duration::ZERO).unwrap();
    let o1 = env.add_output(p, "o1").unwrap();
    let o2 = env.add_output(p, "o2").unwrap();
    let w = env
        .add_reaction(
            p,
            "w",
            1,
            Box::new(move |ctx| {
                ctx.set(o1, Value::Unit).unwrap();
                ctx.set(o2, Value::Unit).unwrap();
            }),
        )
        .unwrap();
    env.set_assembly(
        p,
        Box::new(move |env| {
            env.declare_action_trigger(w, t)?;
            env.declare_antidependency(w, o1)?;
            env.declare_antidependency(w, o2)
        }),
    )
    .unwrap();

    let c = env.add_reactor("c", None).unwrap();
    let i1 = env.add_input(c, "i1").unwrap();
    let i2 = env.add_input(c, "i2").unwrap();
    let rec = recorder.clone();
    let r = env
        .add_reaction(c, "r", 1, Box::new(move |_| rec.record("fired")))
        .unwrap();
    env.set_assembly(
        c,
        Box::new(move |env| {
            env.bind(o1, i1)?;
            env.bind(o2, i2)?;
            env.declare_port_trigger(r, i1)?;
            env.declare_port_trigger(r, i2)
        }),
    )
    .unwrap();

    env.assemble().unwrap();
    env.startup().unwrap();
    env.execute().unwrap();

    assert_eq!(recorder.entries(), vec!["fired"]);
}

/// Physical actions scheduled from another thread wake the scheduler
/// and fire their triggers.
#[test]
fn test_physical_action_from_another_thread() {
    let recorder = Recorder::new();
    let mut env = Environment::with_options(true, false);

    let r = env.add_reactor("r", None).unwrap();
    let phys = env.add_physical_action(r, "phys").unwrap();
    let rec = recorder.clone();
    let react = env
        .add_reaction(
            r,
            "react",
            1,
            Box::new(move |ctx| {
                if let Some(Value::Int(n)) = ctx.get_action(phys) {
                    rec.record(format!("{n}"));
                }
                ctx.request_shutdown();
            }),
        )
        .unwrap();
    env.set_assembly(r, Box::new(move |env| env.declare_action_trigger(react, phys)))
        .unwrap();

    env.assemble().unwrap();
    env.startup().unwrap();

    let handle = env.physical_action_ref(phys).unwrap();
    let worker = std::thread::spawn(move || {
        env.execute().unwrap();
        env
    });

    std::thread::sleep(Duration::from_millis(10));
    handle.schedule(Value::Int(7), Duration::ZERO);

    let env = worker.join().unwrap();
    assert_eq!(env.phase(), Phase::Deconstruction);
    assert_eq!(recorder.entries(), vec!["7"]);
}

/// Writing a port that has an inward binding is rejected; the value
/// of a bound port always comes from its source.
#[test]
fn test_setting_a_bound_port_is_rejected() {
    let recorder = Recorder::new();
    let mut env = Environment::with_options(false, true);

    let c = env.add_reactor("c", None).unwrap();
    let input = env.add_input(c, "i").unwrap();

    let p = env.add_reactor("p", None).unwrap();
    let t = env.add_timer(p, "t", Duration::ZERO, Duration::ZERO).unwrap();
    let out = env.add_output(p, "o").unwrap();
    let rec = recorder.clone();
    let w = env
        .add_reaction(
            p,
            "w",
            1,
            Box::new(move |ctx| {
                if matches!(
                    ctx.set(input, Value::Unit),
                    Err(Error::StructuralViolation { .. })
                ) {
                    rec.record("rejected");
                }
            }),
        )
        .unwrap();
    env.set_assembly(
        p,
        Box::new(move |env| {
            env.declare_action_trigger(w, t)?;
            env.declare_antidependency(w, out)?;
            env.bind(out, input)
        }),
    )
    .unwrap();

    env.assemble().unwrap();
    env.startup().unwrap();
    env.execute().unwrap();

    assert_eq!(recorder.entries(), vec!["rejected"]);
}

/// `sync_shutdown` from the owning thread terminates the program:
/// shutdown reactions run at the final microstep and the environment
/// ends in Deconstruction without ever entering the event loop.
#[test]
fn test_sync_shutdown_runs_shutdown_reactions() {
    let recorder = Recorder::new();
    let mut env = Environment::with_options(false, true);

    let r = env.add_reactor("r", None).unwrap();
    let sd = env.add_shutdown_action(r, "sd").unwrap();
    let rec = recorder.clone();
    let last = env
        .add_reaction(r, "last", 1, Box::new(move |_| rec.record("shutdown")))
        .unwrap();
    env.set_assembly(r, Box::new(move |env| env.declare_action_trigger(last, sd)))
        .unwrap();

    env.assemble().unwrap();
    env.startup().unwrap();
    env.sync_shutdown().unwrap();

    assert_eq!(env.phase(), Phase::Deconstruction);
    assert_eq!(recorder.entries(), vec!["shutdown"]);
    // the environment is spent afterwards
    assert!(matches!(env.execute(), Err(Error::PhaseViolation { .. })));
}

/// `async_shutdown` from another thread: the call blocks on the
/// scheduler lock, the loop stops, shutdown reactions run at the
/// final microstep, and nothing runs afterwards.
#[test]
fn test_async_shutdown_stops_the_loop() {
    let recorder = Recorder::new();
    let mut env = Environment::with_options(true, false);

    let r = env.add_reactor("r", None).unwrap();
    let t = env
        .add_timer(r, "t", Duration::ZERO, Duration::from_millis(1))
        .unwrap();
    let sd = env.add_shutdown_action(r, "sd").unwrap();

    let rec = recorder.clone();
    let tick = env
        .add_reaction(r, "tick", 1, Box::new(move |_| rec.record("tick")))
        .unwrap();
    let rec = recorder.clone();
    let last = env
        .add_reaction(r, "last", 2, Box::new(move |_| rec.record("shutdown")))
        .unwrap();

    env.set_assembly(
        r,
        Box::new(move |env| {
            env.declare_action_trigger(tick, t)?;
            env.declare_action_trigger(last, sd)
        }),
    )
    .unwrap();

    env.assemble().unwrap();
    env.startup().unwrap();

    let handle = env.shutdown_handle();
    let worker = std::thread::spawn(move || {
        env.execute().unwrap();
        env
    });

    std::thread::sleep(Duration::from_millis(30));
    handle.shutdown();

    let env = worker.join().unwrap();
    assert_eq!(env.phase(), Phase::Deconstruction);

    let entries = recorder.entries();
    assert!(!entries.is_empty());
    // the shutdown reaction ran once, at the very end
    assert_eq!(entries.last().unwrap(), "shutdown");
    assert_eq!(entries.iter().filter(|e| *e == "shutdown").count(), 1);
}

/// Lifecycle operations are rejected outside their legal phases.
#[test]
fn test_lifecycle_operations_are_phase_gated() {
    let mut env = Environment::new();
    env.add_reactor("r", None).unwrap();

    assert!(matches!(
        env.execute(),
        Err(Error::PhaseViolation {
            operation: "execute",
            ..
        })
    ));
    assert!(matches!(
        env.sync_shutdown(),
        Err(Error::PhaseViolation {
            operation: "sync_shutdown",
            ..
        })
    ));

    env.assemble().unwrap();
    assert!(matches!(
        env.assemble(),
        Err(Error::PhaseViolation {
            operation: "assemble",
            ..
        })
    ));
}
