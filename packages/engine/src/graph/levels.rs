use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Kahn's algorithm over the "reads" relation. Returns `None` when some node
/// never reaches in-degree zero, i.e. the graph has a cycle.
pub(super) fn compute_levels(
    nodes: &BTreeSet<String>,
    dependencies: &BTreeMap<String, BTreeSet<String>>,
    dependents: &BTreeMap<String, BTreeSet<String>>,
) -> Option<BTreeMap<String, usize>> {
    let mut remaining: BTreeMap<&str, usize> = nodes
        .iter()
        .map(|node| {
            let degree = dependencies
                .get(node)
                .map(|deps| deps.iter().filter(|dep| nodes.contains(*dep)).count())
                .unwrap_or(0);
            (node.as_str(), degree)
        })
        .collect();

    let mut levels: BTreeMap<String, usize> = BTreeMap::new();
    let mut queue: VecDeque<&str> = remaining
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(node, _)| *node)
        .collect();
    for node in &queue {
        levels.insert((*node).to_string(), 0);
    }

    while let Some(node) = queue.pop_front() {
        let level = levels.get(node).copied().unwrap_or(0);
        let Some(next) = dependents.get(node) else {
            continue;
        };
        for dependent in next {
            let Some(degree) = remaining.get_mut(dependent.as_str()) else {
                continue;
            };
            let entry = levels.entry(dependent.clone()).or_insert(0);
            *entry = (*entry).max(level + 1);
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(dependent.as_str());
            }
        }
    }

    if levels.len() == nodes.len() && remaining.values().all(|degree| *degree == 0) {
        Some(levels)
    } else {
        None
    }
}
