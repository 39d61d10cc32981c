//! Reaction dependency graph
//!
//! After assembly the environment extracts a global edge list over
//! reactions: `(after, before)` means *after must execute after
//! before*. Two sources feed it:
//!
//! 1. **Port edges.** A reaction reading a port depends on every
//!    writer of that port's source (the root of the inward chain).
//! 2. **Priority edges.** Within one reactor, each reaction depends
//!    on its predecessor in ascending priority order, so smaller
//!    priorities run first.
//!
//! Indexes are then assigned by iterated zero-dependency layering:
//! every reaction's index is strictly greater than the index of
//! everything it depends on, and reactions without mutual
//! dependencies may share an index. Duplicate edges are harmless.

use std::collections::BTreeMap;

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use cadence_foundation::{PortKey, ReactionKey, ReactorKey};

use crate::dot;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::port::source_of;

/// Check priority uniqueness for every reactor. Called by
/// `assemble()` so the failure surfaces there.
pub(crate) fn validate_priorities(env: &Environment) -> Result<()> {
    for reactor in &env.reactors {
        let mut seen: IndexSet<i32> = IndexSet::new();
        for r in &reactor.reactions {
            let priority = env.reactions[r.index()].priority;
            if !seen.insert(priority) {
                return Err(Error::DuplicatePriority {
                    reactor: reactor.meta.fqn.clone(),
                    priority,
                });
            }
        }
    }
    Ok(())
}

/// Rebuild the global dependency edge list.
pub(crate) fn build_dependency_graph(env: &mut Environment) -> Result<()> {
    validate_priorities(env)?;

    env.dependency_edges.clear();
    let tops: Vec<ReactorKey> = env.top_level.clone();
    for top in tops {
        collect_reactor_edges(env, top);
    }
    Ok(())
}

/// Contained reactors first, then this reactor's own edges.
fn collect_reactor_edges(env: &mut Environment, key: ReactorKey) {
    let contained: Vec<ReactorKey> = env.reactors[key.index()].reactors.iter().copied().collect();
    for child in contained {
        collect_reactor_edges(env, child);
    }

    let reactions: Vec<ReactionKey> = env.reactors[key.index()].reactions.iter().copied().collect();

    // a reaction runs after every writer of each port it reads
    for r in &reactions {
        let dependencies: Vec<PortKey> = env.reactions[r.index()]
            .dependencies
            .iter()
            .copied()
            .collect();
        for port in dependencies {
            let source = source_of(&env.ports, port);
            for writer in &env.ports[source.index()].antidependencies {
                env.dependency_edges.push((*r, *writer));
            }
        }
    }

    // adjacent pairs in ascending priority order: the successor runs
    // after its predecessor
    let mut by_priority: BTreeMap<i32, ReactionKey> = BTreeMap::new();
    for r in &reactions {
        let previous = by_priority.insert(env.reactions[r.index()].priority, *r);
        debug_assert!(previous.is_none(), "priorities validated during assembly");
    }
    let ordered: Vec<ReactionKey> = by_priority.into_values().collect();
    for pair in ordered.windows(2) {
        env.dependency_edges.push((pair[1], pair[0]));
    }
}

/// Assign every reaction its execution index by iterated
/// zero-dependency layering. On a cycle, the dependency graph is
/// written to the well-known DOT path before the error is raised.
pub(crate) fn calculate_indexes(env: &mut Environment) -> Result<()> {
    let mut graph: IndexMap<ReactionKey, IndexSet<ReactionKey>> = IndexMap::new();
    for i in 0..env.reactions.len() {
        graph.insert(ReactionKey(i), IndexSet::new());
    }
    for (after, before) in &env.dependency_edges {
        graph[after].insert(*before);
    }

    let mut index_counter = 0;
    while !graph.is_empty() {
        let zero: Vec<ReactionKey> = graph
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(r, _)| *r)
            .collect();

        if zero.is_empty() {
            let dot_path = std::path::PathBuf::from(dot::CYCLE_DOT_PATH);
            if let Err(err) = dot::export(env, &dot_path) {
                tracing::error!(%err, "failed to write the dependency graph");
            }
            let involved = graph
                .keys()
                .map(|r| env.reactions[r.index()].meta.fqn.clone())
                .collect();
            return Err(Error::CycleDetected { involved, dot_path });
        }

        debug!(
            index = index_counter,
            reactions = ?zero
                .iter()
                .map(|r| env.reactions[r.index()].meta.fqn.to_string())
                .collect::<Vec<_>>(),
            "assigned reaction index"
        );

        for r in &zero {
            env.reactions[r.index()].index = Some(index_counter);
            graph.shift_remove(r);
        }
        for deps in graph.values_mut() {
            deps.retain(|d| !zero.contains(d));
        }

        index_counter += 1;
    }

    env.max_reaction_index = index_counter.saturating_sub(1);
    Ok(())
}
