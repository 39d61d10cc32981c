//! Reactors
//!
//! A reactor owns ordered sets of contained reactors, actions, input
//! ports, output ports, and reactions. The startup and shutdown
//! sequences walk the reactor tree depth-first: timers schedule their
//! first event at startup, shutdown actions schedule the final
//! microstep at shutdown.

use indexmap::IndexSet;
use tracing::debug;

use cadence_foundation::{ActionKey, Duration, PortKey, ReactionKey, ReactorKey, Tag, Value};

use crate::action::ActionKind;
use crate::element::ElementMeta;
use crate::environment::Environment;
use crate::error::Result;

/// Hook invoked by `assemble()`; declares the reactor's bindings and
/// reaction triggers.
pub type AssemblyHook = Box<dyn FnOnce(&mut Environment) -> Result<()> + Send>;

/// Arena record for a single reactor.
pub(crate) struct ReactorState {
    pub meta: ElementMeta,
    pub reactors: IndexSet<ReactorKey>,
    pub inputs: IndexSet<PortKey>,
    pub outputs: IndexSet<PortKey>,
    pub actions: IndexSet<ActionKey>,
    pub reactions: IndexSet<ReactionKey>,
    /// Taken out and run once during assembly.
    pub assembly: Option<AssemblyHook>,
}

impl ReactorState {
    pub fn new(meta: ElementMeta) -> Self {
        Self {
            meta,
            reactors: IndexSet::new(),
            inputs: IndexSet::new(),
            outputs: IndexSet::new(),
            actions: IndexSet::new(),
            reactions: IndexSet::new(),
            assembly: None,
        }
    }
}

impl std::fmt::Debug for ReactorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorState")
            .field("fqn", &self.meta.fqn)
            .field("reactors", &self.reactors)
            .field("reactions", &self.reactions)
            .finish_non_exhaustive()
    }
}

/// Startup walk: timers schedule their first event, then contained
/// reactors start up.
pub(crate) fn startup_tree(env: &mut Environment, key: ReactorKey) {
    debug!(reactor = %env.reactor_fqn(key), "starting up reactor");

    let actions: Vec<ActionKey> = env.reactors[key.index()].actions.iter().copied().collect();
    for action in actions {
        if let ActionKind::Timer { offset, .. } = env.actions[action.index()].kind {
            let t0 = Tag::from_physical_time(env.start_time());
            let tag = if offset.is_zero() { t0 } else { t0.delay(offset) };
            env.scheduler.schedule_sync(tag, action, Value::Unit);
        }
    }

    let contained: Vec<ReactorKey> = env.reactors[key.index()].reactors.iter().copied().collect();
    for child in contained {
        startup_tree(env, child);
    }
}

/// Shutdown walk: shutdown actions schedule the microstep after the
/// current logical instant, then contained reactors shut down.
pub(crate) fn shutdown_tree(env: &mut Environment, key: ReactorKey) {
    debug!(reactor = %env.reactor_fqn(key), "terminating reactor");

    let actions: Vec<ActionKey> = env.reactors[key.index()].actions.iter().copied().collect();
    for action in actions {
        if env.actions[action.index()].kind == ActionKind::Shutdown {
            let tag = env.scheduler.logical_time.as_tag().delay(Duration::ZERO);
            env.scheduler.schedule_sync(tag, action, Value::Unit);
        }
    }

    let contained: Vec<ReactorKey> = env.reactors[key.index()].reactors.iter().copied().collect();
    for child in contained {
        shutdown_tree(env, child);
    }
}
