//! Actions
//!
//! An action is an event source owned by exactly one reactor. Timers
//! schedule themselves at startup and re-schedule on cleanup while
//! they have a period; logical actions are scheduled by reactions of
//! the same reactor; physical actions are scheduled asynchronously
//! from any thread; the shutdown action fires once, at the microstep
//! after the final logical instant.

use indexmap::IndexSet;

use cadence_foundation::{Duration, ReactionKey, Value};

use crate::element::ElementMeta;

/// The kind of event source an action is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Fires at `start_time + offset` and every `period` thereafter
    /// (a zero period means it fires once).
    Timer { offset: Duration, period: Duration },
    /// Scheduled by reactions of the owning reactor; events appear no
    /// earlier than `min_delay` after the current tag.
    Logical { min_delay: Duration },
    /// Scheduled from any thread; the event tag derives from physical
    /// time at the moment of scheduling.
    Physical,
    /// Fires once at the microstep after the final logical instant.
    Shutdown,
}

/// Arena record for a single action.
#[derive(Debug)]
pub(crate) struct ActionState {
    pub meta: ElementMeta,
    pub kind: ActionKind,
    /// Reactions that fire when this action's event arrives.
    pub triggered_reactions: IndexSet<ReactionKey>,
    /// Reactions allowed to schedule this action (logical only).
    pub scheduler_reactions: IndexSet<ReactionKey>,
    /// Payload of the event firing at the current instant.
    pub value: Option<Value>,
}

impl ActionState {
    pub fn new(meta: ElementMeta, kind: ActionKind) -> Self {
        Self {
            meta,
            kind,
            triggered_reactions: IndexSet::new(),
            scheduler_reactions: IndexSet::new(),
            value: None,
        }
    }

    pub fn is_logical(&self) -> bool {
        matches!(self.kind, ActionKind::Logical { .. })
    }

    pub fn min_delay(&self) -> Duration {
        match self.kind {
            ActionKind::Logical { min_delay } => min_delay,
            _ => Duration::ZERO,
        }
    }
}
