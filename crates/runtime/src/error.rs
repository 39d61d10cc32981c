//! Runtime errors for construction, assembly, and scheduling.
//!
//! # Error Categories
//!
//! - **Phase errors**: [`Error::PhaseViolation`]
//! - **Structural errors**: [`Error::StructuralViolation`],
//!   [`Error::BindingViolation`], [`Error::DuplicatePriority`],
//!   [`Error::InvalidPriority`]
//! - **Graph errors**: [`Error::CycleDetected`]
//! - **Scheduling errors**: [`Error::InvalidSchedule`]
//!
//! All validation failures surface synchronously from the call that
//! caused them and carry the fully qualified names of the elements
//! involved. After a validation failure the environment is in an
//! unspecified state and must not be used further.

use std::path::PathBuf;

use thiserror::Error;

use cadence_foundation::{Path, Phase};

/// Runtime result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the environment and its elements.
#[derive(Debug, Error)]
pub enum Error {
    /// An operation was invoked outside its legal phase.
    #[error("phase violation: {operation} is not legal in the {phase} phase")]
    PhaseViolation {
        /// The attempted operation.
        operation: &'static str,
        /// The phase the environment was in.
        phase: Phase,
    },

    /// A trigger, dependency, or antidependency crosses reactor scope,
    /// or an element was declared with an invalid or duplicate name.
    #[error("structural violation involving {fqn}: {message}")]
    StructuralViolation {
        /// The offending element.
        fqn: Path,
        /// Description of the violated rule.
        message: String,
    },

    /// Two reactions of the same reactor declare the same priority.
    #[error("reactions of {reactor} declare duplicate priority {priority}")]
    DuplicatePriority {
        /// The reactor owning the colliding reactions.
        reactor: Path,
        /// The priority declared twice.
        priority: i32,
    },

    /// A binding violates the direction/containment rules, or the
    /// bound port already has an inward binding.
    #[error("illegal binding {from} -> {to}: {message}")]
    BindingViolation {
        /// The port the binding reads from.
        from: Path,
        /// The port the binding writes to.
        to: Path,
        /// Description of the violated rule.
        message: String,
    },

    /// The reaction graph has a cycle. The dependency graph was
    /// written to `dot_path` before this error was raised.
    #[error("cycle in the reaction dependency graph; graph written to {}", .dot_path.display())]
    CycleDetected {
        /// Reactions that could not be assigned an index.
        involved: Vec<Path>,
        /// Location of the emitted DOT file.
        dot_path: PathBuf,
    },

    /// A reaction attempted to schedule an action it did not declare,
    /// or attempted to schedule a non-logical action.
    #[error("reaction {reaction} may not schedule {action}: {message}")]
    InvalidSchedule {
        /// The scheduling reaction.
        reaction: Path,
        /// The action it tried to schedule.
        action: Path,
        /// Description of the violated rule.
        message: String,
    },

    /// A reaction was constructed with a priority outside the legal
    /// range. Zero is reserved and never valid.
    #[error("invalid reaction priority {0}")]
    InvalidPriority(i32),
}
