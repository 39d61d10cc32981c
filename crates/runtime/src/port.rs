//! Ports
//!
//! A port is a typed communication endpoint of a reactor, either an
//! input or an output. Ports relate to each other through bindings:
//! at most one inward binding (the port this port reads from) and any
//! number of outward bindings (ports that read from this port). The
//! transitive inward chain always terminates at a port with no inward
//! binding, the *source*; values live at sources and reads walk the
//! chain.
//!
//! Ports also anchor the dependency graph: `dependencies` are the
//! reactions that read this port, `antidependencies` the reactions
//! that write it, and `triggers` the subset of readers that fire when
//! the port is set.

use indexmap::IndexSet;

use cadence_foundation::{PortKey, ReactionKey, Value};

use crate::element::ElementMeta;

/// Direction of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Input,
    Output,
}

/// Arena record for a single port.
#[derive(Debug)]
pub(crate) struct PortState {
    pub meta: ElementMeta,
    pub kind: PortKind,
    /// The port this port reads from, if bound.
    pub inward_binding: Option<PortKey>,
    /// Ports that read from this port.
    pub outward_bindings: IndexSet<PortKey>,
    /// Reactions that read this port.
    pub dependencies: IndexSet<ReactionKey>,
    /// Reactions that write this port.
    pub antidependencies: IndexSet<ReactionKey>,
    /// Reactions that fire when this port is set.
    pub triggers: IndexSet<ReactionKey>,
    /// Value set at the current instant; `None` means absent.
    pub value: Option<Value>,
}

impl PortState {
    pub fn new(meta: ElementMeta, kind: PortKind) -> Self {
        Self {
            meta,
            kind,
            inward_binding: None,
            outward_bindings: IndexSet::new(),
            dependencies: IndexSet::new(),
            antidependencies: IndexSet::new(),
            triggers: IndexSet::new(),
            value: None,
        }
    }

    pub fn is_input(&self) -> bool {
        self.kind == PortKind::Input
    }

    pub fn is_output(&self) -> bool {
        self.kind == PortKind::Output
    }

    pub fn has_inward_binding(&self) -> bool {
        self.inward_binding.is_some()
    }

    pub fn has_outward_bindings(&self) -> bool {
        !self.outward_bindings.is_empty()
    }

    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }

    pub fn has_antidependencies(&self) -> bool {
        !self.antidependencies.is_empty()
    }
}

/// Walk the inward chain of `port` to its source. The binding rules
/// make the chain finite, so this always terminates.
pub(crate) fn source_of(ports: &[PortState], port: PortKey) -> PortKey {
    let mut current = port;
    while let Some(inward) = ports[current.index()].inward_binding {
        current = inward;
    }
    current
}
