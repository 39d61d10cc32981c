//! Reactions
//!
//! A reaction is a unit of user code triggered at a logical instant.
//! Its priority orders it against sibling reactions of the same
//! reactor; its index, assigned after assembly by topological
//! layering, orders it against every reaction in the environment.
//! Bodies and deadline handlers are registered as boxed closures and
//! receive a [`ReactionContext`](crate::scheduler::ReactionContext)
//! when they run.

use indexmap::IndexSet;

use cadence_foundation::{ActionKey, Duration, PortKey};

use crate::element::ElementMeta;
use crate::scheduler::ReactionContext;

/// User-provided behavior of a reaction.
pub type ReactionBody = Box<dyn FnMut(&mut ReactionContext<'_>) + Send>;

/// Handler invoked instead of the body when a deadline is missed.
pub type DeadlineHandler = Box<dyn FnMut(&mut ReactionContext<'_>) + Send>;

/// A deadline on the lag between physical and logical time.
pub(crate) struct Deadline {
    pub duration: Duration,
    /// Taken out while the handler runs, then restored.
    pub handler: Option<DeadlineHandler>,
}

/// Arena record for a single reaction.
pub(crate) struct ReactionState {
    pub meta: ElementMeta,
    /// Nonzero, unique among reactions of the same reactor.
    pub priority: i32,
    /// Taken out while the body runs, then restored.
    pub body: Option<ReactionBody>,
    /// Actions whose events fire this reaction.
    pub action_triggers: IndexSet<ActionKey>,
    /// Ports whose writes fire this reaction.
    pub port_triggers: IndexSet<PortKey>,
    /// Ports this reaction reads (superset of `port_triggers`).
    pub dependencies: IndexSet<PortKey>,
    /// Ports this reaction writes.
    pub antidependencies: IndexSet<PortKey>,
    /// Logical actions this reaction may schedule.
    pub schedulable_actions: IndexSet<ActionKey>,
    pub deadline: Option<Deadline>,
    /// Position in the global execution order; assigned by the
    /// environment's index calculation, absent until then.
    pub index: Option<usize>,
}

impl ReactionState {
    pub fn new(meta: ElementMeta, priority: i32, body: ReactionBody) -> Self {
        Self {
            meta,
            priority,
            body: Some(body),
            action_triggers: IndexSet::new(),
            port_triggers: IndexSet::new(),
            dependencies: IndexSet::new(),
            antidependencies: IndexSet::new(),
            schedulable_actions: IndexSet::new(),
            deadline: None,
            index: None,
        }
    }

    pub fn has_deadline(&self) -> bool {
        self.deadline.is_some()
    }
}

impl std::fmt::Debug for ReactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactionState")
            .field("fqn", &self.meta.fqn)
            .field("priority", &self.priority)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}
