//! DOT export of the reaction dependency graph
//!
//! Nodes are reactions, grouped into rank-same subgraphs per index
//! level; invisible edges between the first node of each level impose
//! a left-to-right layout; visible edges are the dependency pairs.
//! Node identifiers are FQNs with `.` replaced by `_`, labels are the
//! raw FQNs.

use std::collections::BTreeMap;
use std::io;

use tracing::info;

use cadence_foundation::{Path, ReactionKey};

use crate::environment::Environment;

/// Where the graph is written when a cycle is detected.
pub(crate) const CYCLE_DOT_PATH: &str = "/tmp/reactor_dependency_graph.dot";

fn dot_name(fqn: &Path) -> String {
    fqn.join("_")
}

/// Write the reaction graph in DOT format to `path`.
pub(crate) fn export(env: &Environment, path: &std::path::Path) -> io::Result<()> {
    // reactions grouped by index; unindexed reactions (possible when
    // exporting on cycle detection) sort into level zero
    let mut reactions_by_index: BTreeMap<usize, Vec<ReactionKey>> = BTreeMap::new();
    for i in 0..env.reactions.len() {
        let index = env.reactions[i].index.unwrap_or(0);
        reactions_by_index.entry(index).or_default().push(ReactionKey(i));
    }

    let mut out = String::new();
    out.push_str("digraph {\n");
    out.push_str("rankdir=LR;\n");

    for level in reactions_by_index.values() {
        out.push_str("subgraph {\n");
        out.push_str("rank=same;\n");
        for r in level {
            let fqn = &env.reactions[r.index()].meta.fqn;
            out.push_str(&format!("{} [label=\"{}\"];\n", dot_name(fqn), fqn));
        }
        out.push_str("}\n");
    }

    // an invisible chain through the first node of each level orders
    // the subgraphs left to right
    let mut last_level_first: Option<ReactionKey> = None;
    for level in reactions_by_index.values() {
        let first = level[0];
        if let Some(previous) = last_level_first {
            out.push_str(&format!(
                "{} -> {} [style=invis];\n",
                dot_name(&env.reactions[previous.index()].meta.fqn),
                dot_name(&env.reactions[first.index()].meta.fqn),
            ));
        }
        last_level_first = Some(first);
    }

    for (after, before) in &env.dependency_edges {
        out.push_str(&format!(
            "{} -> {}\n",
            dot_name(&env.reactions[after.index()].meta.fqn),
            dot_name(&env.reactions[before.index()].meta.fqn),
        ));
    }
    out.push_str("}\n");

    std::fs::write(path, out)?;
    info!(path = %path.display(), "reaction graph written");
    Ok(())
}
