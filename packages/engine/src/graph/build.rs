use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{Field, FieldKind, FilterSet, TableDomain};
use crate::errors;
use crate::graph::levels::compute_levels;
use crate::graph::{DependencyEdge, EdgeKind, FieldDependencyGraph};
use crate::EngineError;

/// Builds the dependency graph of every field in the domain and fails on
/// the first cycle found.
pub fn build_graph(domain: &TableDomain) -> Result<FieldDependencyGraph, EngineError> {
    let mut nodes = BTreeSet::new();
    let mut edges = BTreeSet::new();
    for field in domain.all_fields() {
        nodes.insert(field.id.clone());
        edges.extend(field_edges(domain, field));
    }

    let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for edge in &edges {
        dependencies
            .entry(edge.from_field_id.clone())
            .or_default()
            .insert(edge.to_field_id.clone());
        dependents
            .entry(edge.to_field_id.clone())
            .or_default()
            .insert(edge.from_field_id.clone());
    }

    detect_cycles(domain, &nodes, &dependencies)?;
    let levels = compute_levels(&nodes, &dependencies, &dependents)
        .ok_or_else(|| errors::cycle_detected_error(&[]))?;

    Ok(FieldDependencyGraph {
        nodes,
        edges: edges.into_iter().collect(),
        dependencies,
        dependents,
        levels,
    })
}

/// Edges contributed by one field. References to fields that no longer
/// exist are skipped; such fields carry `has_error`.
pub(crate) fn field_edges(domain: &TableDomain, field: &Field) -> Vec<DependencyEdge> {
    let mut out = Vec::new();
    let mut push = |to: &str, kind: EdgeKind, via: Option<&str>, transitive: bool| {
        if domain.field(to).is_some() {
            out.push(DependencyEdge {
                from_field_id: field.id.clone(),
                to_field_id: to.to_string(),
                kind,
                via_link_field_id: via.map(str::to_string),
                transitive,
            });
        }
    };

    match &field.kind {
        FieldKind::Scalar | FieldKind::System(_) | FieldKind::Link(_) => {}
        FieldKind::Lookup(options) => {
            let via = Some(options.link_field_id.as_str());
            push(&options.link_field_id, EdgeKind::SameRecord, via, false);
            push(&options.lookup_field_id, EdgeKind::CrossRecord, via, false);
            push_filter_edges(&mut push, options.filter.as_ref(), via);
        }
        FieldKind::Rollup(options) => {
            let via = Some(options.link_field_id.as_str());
            push(&options.link_field_id, EdgeKind::SameRecord, via, false);
            push(&options.lookup_field_id, EdgeKind::CrossRecord, via, false);
            push_filter_edges(&mut push, options.filter.as_ref(), via);
        }
        FieldKind::ConditionalLookup(options) | FieldKind::ConditionalRollup(options) => {
            let via = Some(field.id.as_str());
            push(&options.lookup_field_id, EdgeKind::CrossRecord, via, false);
            if let Some(sort) = &options.sort {
                push(&sort.field_id, EdgeKind::CrossRecord, via, false);
            }
            push_filter_edges(&mut push, options.filter.as_ref(), via);
        }
        FieldKind::Formula(options) => {
            for reference in options.expression.referenced_field_ids() {
                push(&reference, EdgeKind::SameRecord, None, false);
                let mut resolving = BTreeSet::new();
                surface_foreign_targets(domain, &reference, None, &mut resolving, &mut push);
            }
        }
    }
    out
}

fn push_filter_edges(
    push: &mut impl FnMut(&str, EdgeKind, Option<&str>, bool),
    filter: Option<&FilterSet>,
    via: Option<&str>,
) {
    let Some(filter) = filter else {
        return;
    };
    for foreign in filter.foreign_field_ids() {
        push(&foreign, EdgeKind::CrossRecord, via, false);
    }
    for host in filter.host_field_ids() {
        push(&host, EdgeKind::SameRecord, None, false);
    }
}

/// Follows a formula reference through lookups and rollups to the foreign
/// fields it ultimately reads. The first hop's link tags every surfaced edge.
fn surface_foreign_targets(
    domain: &TableDomain,
    field_id: &str,
    first_link: Option<&str>,
    resolving: &mut BTreeSet<String>,
    push: &mut impl FnMut(&str, EdgeKind, Option<&str>, bool),
) {
    if !resolving.insert(field_id.to_string()) {
        return;
    }
    let Some(field) = domain.field(field_id) else {
        return;
    };
    let (Some(link), Some(target)) = (field.join_link_field_id(), field.foreign_target_field_id())
    else {
        return;
    };
    let via = first_link.unwrap_or(link);
    push(target, EdgeKind::CrossRecord, Some(via), true);
    surface_foreign_targets(domain, target, Some(via), resolving, push);
}

fn detect_cycles(
    domain: &TableDomain,
    nodes: &BTreeSet<String>,
    dependencies: &BTreeMap<String, BTreeSet<String>>,
) -> Result<(), EngineError> {
    let mut done = BTreeSet::new();
    for node in nodes {
        let mut resolving = Vec::new();
        visit(node, dependencies, &mut resolving, &mut done).map_err(|cycle| {
            let names: Vec<String> = cycle
                .iter()
                .map(|id| {
                    domain
                        .field(id)
                        .map(|field| field.name.clone())
                        .unwrap_or_else(|| id.clone())
                })
                .collect();
            errors::cycle_detected_error(&names)
        })?;
    }
    Ok(())
}

/// Depth-first walk; `resolving` is the chain of fields currently being
/// resolved. Reaching one of them again closes a cycle.
fn visit(
    node: &str,
    dependencies: &BTreeMap<String, BTreeSet<String>>,
    resolving: &mut Vec<String>,
    done: &mut BTreeSet<String>,
) -> Result<(), Vec<String>> {
    if done.contains(node) {
        return Ok(());
    }
    if let Some(start) = resolving.iter().position(|id| id == node) {
        let mut cycle = resolving[start..].to_vec();
        cycle.push(node.to_string());
        return Err(cycle);
    }

    resolving.push(node.to_string());
    if let Some(next) = dependencies.get(node) {
        for dependency in next {
            visit(dependency, dependencies, resolving, done)?;
        }
    }
    resolving.pop();
    done.insert(node.to_string());
    Ok(())
}
