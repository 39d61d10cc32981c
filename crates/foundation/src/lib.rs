//! Cadence Foundation
//!
//! Shared types for the cadence reactor runtime: element paths and
//! arena keys, the logical/physical time model, lifecycle phases, and
//! event payload values.

pub mod ids;
pub mod phase;
pub mod time;
pub mod value;

pub use ids::{ActionKey, Path, PortKey, ReactionKey, ReactorKey};
pub use phase::Phase;
pub use time::{get_physical_time, Duration, LogicalTime, Tag, TimePoint};
pub use value::Value;
