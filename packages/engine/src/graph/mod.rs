//! Field dependency graph.
//!
//! Edges point from a field to the fields it reads. Links contribute no
//! edges of their own; they are where cross-record propagation starts.

mod build;
mod levels;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub use build::build_graph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeKind {
    SameRecord,
    CrossRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyEdge {
    pub from_field_id: String,
    pub to_field_id: String,
    pub kind: EdgeKind,
    /// Join path for cross-record edges: the link field, or the conditional
    /// field itself when the join is its filter.
    pub via_link_field_id: Option<String>,
    /// Edge surfaced by following a formula through a lookup; implied by a
    /// chain of direct edges.
    pub transitive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FieldDependencyGraph {
    nodes: BTreeSet<String>,
    edges: Vec<DependencyEdge>,
    dependencies: BTreeMap<String, BTreeSet<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
    levels: BTreeMap<String, usize>,
}

impl FieldDependencyGraph {
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Direct edges leaving `field_id`, i.e. what it reads.
    pub fn edges_from<'a>(&'a self, field_id: &'a str) -> impl Iterator<Item = &'a DependencyEdge> {
        self.edges
            .iter()
            .filter(move |edge| edge.from_field_id == field_id && !edge.transitive)
    }

    pub fn dependencies_of(&self, field_id: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(field_id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    pub fn dependents_of(&self, field_id: &str) -> impl Iterator<Item = &str> {
        self.dependents
            .get(field_id)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Topological level: 0 for fields that read nothing, otherwise one more
    /// than the deepest field read.
    pub fn level(&self, field_id: &str) -> Option<usize> {
        self.levels.get(field_id).copied()
    }

    /// Fields grouped by level, ascending.
    pub fn levels(&self) -> Vec<Vec<String>> {
        let mut grouped: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (field_id, level) in &self.levels {
            grouped.entry(*level).or_default().push(field_id.clone());
        }
        grouped.into_values().collect()
    }

    /// Every field that transitively reads one of `seeds`, seeds excluded
    /// unless reachable from another seed.
    pub fn downstream<'a>(&self, seeds: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut queue: VecDeque<String> = seeds.into_iter().map(str::to_string).collect();
        while let Some(field_id) = queue.pop_front() {
            for dependent in self.dependents_of(&field_id) {
                if out.insert(dependent.to_string()) {
                    queue.push_back(dependent.to_string());
                }
            }
        }
        out
    }
}
