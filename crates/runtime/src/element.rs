//! Common element metadata
//!
//! Every arena record carries its name, fully qualified name, and
//! owning container. Top-level reactors have no container and their
//! FQN is just their name.

use cadence_foundation::{Path, ReactorKey};

/// Name, FQN, and containment shared by every element record.
#[derive(Debug, Clone)]
pub(crate) struct ElementMeta {
    pub name: String,
    pub fqn: Path,
    pub container: Option<ReactorKey>,
}

impl ElementMeta {
    pub fn new(name: &str, fqn: Path, container: Option<ReactorKey>) -> Self {
        Self {
            name: name.to_string(),
            fqn,
            container,
        }
    }
}
