//! Lifecycle phases
//!
//! An environment moves through a fixed sequence of phases; each
//! runtime operation is legal only in specific phases. Transitions
//! are strictly monotone, which the derived ordering captures.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle phase of an environment, in transition order.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub enum Phase {
    /// Elements are created and registered with their containers.
    Construction,
    /// Ports are bound; triggers and dependencies are declared.
    Assembly,
    /// Timers schedule their first events.
    Startup,
    /// The scheduler processes events in tag order.
    Execution,
    /// Shutdown hooks schedule the final microstep.
    Shutdown,
    /// The environment is spent and must not be used further.
    Deconstruction,
}

impl Phase {
    /// Get the phase name as a static string.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Construction => "Construction",
            Self::Assembly => "Assembly",
            Self::Startup => "Startup",
            Self::Execution => "Execution",
            Self::Shutdown => "Shutdown",
            Self::Deconstruction => "Deconstruction",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
