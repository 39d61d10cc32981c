//! Event scheduler
//!
//! Advances logical time in strict tag order. At each step the
//! scheduler selects the smallest pending tag, advances logical time
//! to it, collects every reaction triggered at that instant, and
//! executes them in ascending index order. Reactions of one instant
//! run serially; the index layering guarantees that writers always
//! run before readers.
//!
//! The event queue is guarded by a lock and a condition variable so
//! that physical actions can be scheduled from other threads and the
//! scheduler can be woken from its sleep towards the next tag.

use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use cadence_foundation::{
    get_physical_time, ActionKey, Duration, LogicalTime, Phase, PortKey, ReactionKey, Tag,
    TimePoint, Value,
};

use crate::action::{ActionKind, ActionState};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::port::{source_of, PortState};
use crate::reaction::ReactionState;

/// Pending events of one tag: one entry per action, later schedules
/// of the same action at the same tag replace the value.
type EventMap = IndexMap<ActionKey, Value>;

/// Queue state guarded by the scheduler lock.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pub events: BTreeMap<Tag, EventMap>,
    pub stop: bool,
}

/// Lock and wakeup shared with asynchronous schedulers.
#[derive(Debug, Default)]
pub(crate) struct SchedulerShared {
    pub queue: Mutex<QueueState>,
    pub cv: Condvar,
}

/// The environment's scheduler state.
#[derive(Debug)]
pub(crate) struct Scheduler {
    pub shared: Arc<SchedulerShared>,
    pub logical_time: LogicalTime,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SchedulerShared::default()),
            logical_time: LogicalTime::new(),
        }
    }

    /// Enqueue an event. The tag must lie strictly after the current
    /// logical time.
    pub fn schedule_sync(&self, tag: Tag, action: ActionKey, value: Value) {
        debug_assert!(
            self.logical_time.as_tag() < tag,
            "events may only be scheduled after the current logical time"
        );
        trace!(%tag, action = action.index(), "scheduling event");
        let mut queue = self.shared.queue.lock();
        queue.events.entry(tag).or_default().insert(action, value);
    }

    /// Flag the loop to terminate and wake it.
    pub fn stop(&self) {
        let mut queue = self.shared.queue.lock();
        queue.stop = true;
        self.shared.cv.notify_one();
    }
}

/// Cooperative cancellation handle for a running environment.
///
/// Cloneable and sendable to other threads. `shutdown` blocks until
/// the scheduler lock is held, then flags the stop and wakes the
/// scheduler; the scheduler performs the shutdown sequence (phase
/// transitions, shutdown hooks, the final microstep) before its loop
/// returns. An in-flight reaction completes; no further instant is
/// started.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    shared: Arc<SchedulerShared>,
}

impl ShutdownHandle {
    pub(crate) fn new(shared: Arc<SchedulerShared>) -> Self {
        Self { shared }
    }

    pub fn shutdown(&self) {
        let mut queue = self.shared.queue.lock();
        queue.stop = true;
        self.shared.cv.notify_one();
    }
}

/// Thread-safe scheduling handle for one physical action.
///
/// The event tag derives from physical time at the moment of the
/// call; the event is placed into the queue under the scheduler lock
/// and the scheduler is woken to re-evaluate its sleep deadline.
#[derive(Debug, Clone)]
pub struct PhysicalActionRef {
    shared: Arc<SchedulerShared>,
    action: ActionKey,
}

impl PhysicalActionRef {
    pub(crate) fn new(shared: Arc<SchedulerShared>, action: ActionKey) -> Self {
        Self { shared, action }
    }

    pub fn schedule(&self, value: Value, delay: Duration) {
        let tag = Tag::from_physical_time(get_physical_time() + delay);
        trace!(%tag, action = self.action.index(), "scheduling physical event");
        let mut queue = self.shared.queue.lock();
        queue.events.entry(tag).or_default().insert(self.action, value);
        self.shared.cv.notify_one();
    }
}

/// What the body of a reaction may observe and do at its instant.
pub struct ReactionContext<'a> {
    ports: &'a mut Vec<PortState>,
    actions: &'a mut Vec<ActionState>,
    reactions: &'a [ReactionState],
    shared: &'a SchedulerShared,
    queue_by_index: &'a mut Vec<Vec<ReactionKey>>,
    set_ports: &'a mut Vec<PortKey>,
    shutdown_requested: &'a mut bool,
    current: ReactionKey,
    logical: Tag,
    start_time: TimePoint,
}

impl ReactionContext<'_> {
    /// Read a port's value at the current instant; walks the inward
    /// chain to the source.
    pub fn get(&self, port: PortKey) -> Option<&Value> {
        let source = source_of(self.ports, port);
        self.ports[source.index()].value.as_ref()
    }

    /// Whether the port's source was set at the current instant.
    pub fn is_present(&self, port: PortKey) -> bool {
        self.get(port).is_some()
    }

    /// Write a port at the current instant and fire the reactions
    /// triggered through its outward-binding closure.
    ///
    /// Only legal on ports without an inward binding; bound ports take
    /// their value from their source.
    pub fn set(&mut self, port: PortKey, value: Value) -> Result<()> {
        if self.ports[port.index()].has_inward_binding() {
            return Err(Error::StructuralViolation {
                fqn: self.ports[port.index()].meta.fqn.clone(),
                message: "set() is only legal on ports without an inward binding".to_string(),
            });
        }
        trace!(port = %self.ports[port.index()].meta.fqn, "set port");
        self.ports[port.index()].value = Some(value);
        self.set_ports.push(port);

        // collect triggers at the terminal ports of the binding tree
        let mut stack = vec![port];
        while let Some(p) = stack.pop() {
            let state = &self.ports[p.index()];
            if state.has_outward_bindings() {
                stack.extend(state.outward_bindings.iter().copied());
            } else {
                for r in &state.triggers {
                    let index = self.reactions[r.index()]
                        .index
                        .expect("reaction indexes are assigned before execution");
                    self.queue_by_index[index].push(*r);
                }
            }
        }
        Ok(())
    }

    /// Payload of an action firing at the current instant.
    pub fn get_action(&self, action: ActionKey) -> Option<&Value> {
        self.actions[action.index()].value.as_ref()
    }

    /// Schedule a logical action declared schedulable by this
    /// reaction. The event appears at
    /// `current_tag.delay(max(min_delay, delay))`.
    pub fn schedule(&mut self, action: ActionKey, value: Value, delay: Duration) -> Result<()> {
        let state = &self.actions[action.index()];
        if !state.is_logical() {
            return Err(Error::InvalidSchedule {
                reaction: self.reactions[self.current.index()].meta.fqn.clone(),
                action: state.meta.fqn.clone(),
                message: "only logical actions may be scheduled by reactions".to_string(),
            });
        }
        if !state.scheduler_reactions.contains(&self.current) {
            return Err(Error::InvalidSchedule {
                reaction: self.reactions[self.current.index()].meta.fqn.clone(),
                action: state.meta.fqn.clone(),
                message: "the action is not in the reaction's schedulable set".to_string(),
            });
        }

        let tag = self.logical.delay(state.min_delay().max(delay));
        trace!(%tag, action = %state.meta.fqn, "reaction scheduled action");
        let mut queue = self.shared.queue.lock();
        queue.events.entry(tag).or_default().insert(action, value);
        Ok(())
    }

    /// Request termination; the shutdown sequence runs after the
    /// current instant completes.
    pub fn request_shutdown(&mut self) {
        *self.shutdown_requested = true;
    }

    /// The current logical tag.
    pub fn logical_time(&self) -> Tag {
        self.logical
    }

    pub fn physical_time(&self) -> TimePoint {
        get_physical_time()
    }

    pub fn elapsed_logical_time(&self) -> Duration {
        self.logical.time_point() - self.start_time
    }

    pub fn elapsed_physical_time(&self) -> Duration {
        get_physical_time() - self.start_time
    }
}

/// Outcome of one queue inspection.
enum Step {
    /// Process the events of this tag.
    Instant(Tag, EventMap),
    /// The queue drained and the environment does not run forever.
    DrainedShutdown,
    /// A stop was flagged before the shutdown sequence ran.
    StopShutdownFirst,
    /// Nothing left to do.
    Terminate,
}

/// Run the event loop to completion.
pub(crate) fn run(env: &mut Environment) -> Result<()> {
    debug!("starting the scheduler");

    let mut queue_by_index: Vec<Vec<ReactionKey>> = vec![Vec::new(); env.max_reaction_index + 1];
    let mut set_ports: Vec<PortKey> = Vec::new();
    let shared = Arc::clone(&env.scheduler.shared);

    loop {
        let step = next_step(env, &shared);

        match step {
            Step::Terminate => {
                debug!("shutting down the scheduler");
                return Ok(());
            }
            Step::DrainedShutdown => {
                debug!("no more events in queue, terminating");
                env.shutdown_sequence();
            }
            Step::StopShutdownFirst => {
                debug!("stop requested, running the shutdown sequence");
                env.shutdown_sequence();
            }
            Step::Instant(tag, events) => {
                process_instant(env, tag, events, &mut queue_by_index, &mut set_ports);
            }
        }
    }
}

/// Process the final microstep inline, without entering the event
/// loop. Used by `sync_shutdown` on the owning thread after the
/// shutdown hooks have scheduled their events; the loop's stop branch
/// performs the same drain for a running environment.
pub(crate) fn drain_final_microstep(env: &mut Environment) {
    let mut queue_by_index: Vec<Vec<ReactionKey>> = vec![Vec::new(); env.max_reaction_index + 1];
    let mut set_ports: Vec<PortKey> = Vec::new();
    let shared = Arc::clone(&env.scheduler.shared);

    let t_next = env.scheduler.logical_time.as_tag().delay(Duration::ZERO);
    let instant = {
        let mut queue = shared.queue.lock();
        match queue.events.first_key_value() {
            Some((tag, _)) if *tag == t_next => queue.events.pop_first(),
            _ => None,
        }
    };
    if let Some((tag, events)) = instant {
        process_instant(env, tag, events, &mut queue_by_index, &mut set_ports);
    }
}

/// Select the next instant, waiting on the condition variable for
/// physical time or asynchronous events as needed.
fn next_step(env: &Environment, shared: &Arc<SchedulerShared>) -> Step {
    let mut queue = shared.queue.lock();
    loop {
        if queue.stop {
            if env.phase() == Phase::Execution {
                // flagged asynchronously; the shutdown hooks have not
                // run yet
                return Step::StopShutdownFirst;
            }
            // one final microstep carries the shutdown reactions
            let t_next = env.scheduler.logical_time.as_tag().delay(Duration::ZERO);
            return match queue.events.first_key_value() {
                Some((tag, _)) if *tag == t_next => {
                    let (tag, events) = queue.events.pop_first().unwrap();
                    Step::Instant(tag, events)
                }
                _ => Step::Terminate,
            };
        }

        let t_next = match queue.events.first_key_value() {
            None => {
                if env.run_forever {
                    debug!("event queue drained, waiting for asynchronous events");
                    shared.cv.wait(&mut queue);
                    continue;
                }
                return Step::DrainedShutdown;
            }
            Some((tag, _)) => *tag,
        };

        // synchronize with physical time unless fast-forwarding
        if !env.fast_fwd_execution {
            let now = get_physical_time();
            if now < t_next.time_point() {
                let remaining = t_next.time_point() - now;
                let result = shared.cv.wait_for(&mut queue, remaining);
                if !result.timed_out() {
                    // the queue was modified or a stop was flagged
                    continue;
                }
            }
        }

        let (tag, events) = queue.events.pop_first().unwrap();
        return Step::Instant(tag, events);
    }
}

/// Execute all reactions of one instant in ascending index order,
/// then clean up fired actions and set ports.
fn process_instant(
    env: &mut Environment,
    tag: Tag,
    events: EventMap,
    queue_by_index: &mut Vec<Vec<ReactionKey>>,
    set_ports: &mut Vec<PortKey>,
) {
    env.scheduler.logical_time.advance_to(tag);
    debug!(%tag, events = events.len(), "advancing logical time");

    // set action payloads, then enqueue triggered reactions
    for (action, value) in &events {
        env.actions[action.index()].value = Some(value.clone());
    }
    for action in events.keys() {
        let triggered: Vec<ReactionKey> = env.actions[action.index()]
            .triggered_reactions
            .iter()
            .copied()
            .collect();
        for r in triggered {
            let index = env.reactions[r.index()]
                .index
                .expect("reaction indexes are assigned before execution");
            queue_by_index[index].push(r);
        }
    }

    let mut shutdown_requested = false;

    let mut pos = 0;
    while pos < queue_by_index.len() {
        let mut batch = std::mem::take(&mut queue_by_index[pos]);
        if batch.is_empty() {
            pos += 1;
            continue;
        }
        // a reaction triggered through several paths runs once
        batch.sort_unstable();
        batch.dedup();

        for r in batch {
            execute_reaction(env, r, queue_by_index, set_ports, &mut shutdown_requested);
        }
        pos += 1;
    }

    // cleanup: fired actions clear their value, timers re-schedule
    for action in events.keys() {
        env.actions[action.index()].value = None;
        if let ActionKind::Timer { period, .. } = env.actions[action.index()].kind {
            if !period.is_zero() {
                let next = env.scheduler.logical_time.as_tag().delay(period);
                env.scheduler.schedule_sync(next, *action, Value::Unit);
            }
        }
    }
    // cleanup: ports set during the instant become absent again
    for port in set_ports.drain(..) {
        env.ports[port.index()].value = None;
    }

    if shutdown_requested && env.phase() == Phase::Execution {
        info!("shutdown requested by a reaction");
        env.shutdown_sequence();
    }
}

/// Trigger one reaction: run the deadline handler if the lag exceeds
/// the deadline, the body otherwise.
fn execute_reaction(
    env: &mut Environment,
    reaction: ReactionKey,
    queue_by_index: &mut Vec<Vec<ReactionKey>>,
    set_ports: &mut Vec<PortKey>,
    shutdown_requested: &mut bool,
) {
    trace!(reaction = %env.reactions[reaction.index()].meta.fqn, "executing reaction");

    let missed = match &env.reactions[reaction.index()].deadline {
        Some(deadline) => {
            let lag = get_physical_time() - env.scheduler.logical_time.time_point();
            lag > deadline.duration
        }
        None => false,
    };

    // take the closure out of the arena so the context can borrow it
    let mut closure = if missed {
        warn!(
            reaction = %env.reactions[reaction.index()].meta.fqn,
            "deadline missed, running the deadline handler"
        );
        env.reactions[reaction.index()]
            .deadline
            .as_mut()
            .and_then(|deadline| deadline.handler.take())
            .expect("a reaction with a deadline always has a handler")
    } else {
        env.reactions[reaction.index()]
            .body
            .take()
            .expect("reaction bodies are restored after every invocation")
    };

    let logical = env.scheduler.logical_time.as_tag();
    let start_time = env.start_time;
    {
        let mut ctx = ReactionContext {
            ports: &mut env.ports,
            actions: &mut env.actions,
            reactions: &env.reactions,
            shared: env.scheduler.shared.as_ref(),
            queue_by_index,
            set_ports,
            shutdown_requested,
            current: reaction,
            logical,
            start_time,
        };
        closure(&mut ctx);
    }

    if missed {
        env.reactions[reaction.index()]
            .deadline
            .as_mut()
            .expect("deadline checked above")
            .handler = Some(closure);
    } else {
        env.reactions[reaction.index()].body = Some(closure);
    }
}
