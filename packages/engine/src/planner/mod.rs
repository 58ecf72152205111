//! Computed update planning.
//!
//! A change set is expanded into every computed field it reaches, each
//! field gets a level after everything it reads, and the fields of one
//! level are grouped by table so one pass recomputes them together.

mod types;

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

pub use types::{
    ChangeSet, ComputedUpdatePlan, ComputedUpdateStep, FieldChange, RecomputeScope,
    RecomputeUnit, ScopeSource,
};

use crate::domain::{Field, FieldKind, TableDomain};
use crate::errors;
use crate::graph::{build_graph, EdgeKind, FieldDependencyGraph};
use crate::EngineError;

/// Plans against a freshly built graph.
pub fn plan(domain: &TableDomain, changes: &ChangeSet) -> Result<ComputedUpdatePlan, EngineError> {
    let graph = build_graph(domain)?;
    plan_with_graph(domain, &graph, changes)
}

pub fn plan_with_graph(
    domain: &TableDomain,
    graph: &FieldDependencyGraph,
    changes: &ChangeSet,
) -> Result<ComputedUpdatePlan, EngineError> {
    let seeds = collect_seeds(domain, changes)?;
    let mut planner = Planner {
        domain,
        graph,
        seeds: &seeds,
        scopes: BTreeMap::new(),
    };
    planner.expand();
    let levels = planner.levels()?;

    let mut by_level: BTreeMap<usize, BTreeMap<String, (Vec<String>, Option<RecomputeScope>)>> =
        BTreeMap::new();
    for (field_id, scope) in std::mem::take(&mut planner.scopes) {
        let Some(field) = domain.field(&field_id) else {
            continue;
        };
        let level = levels.get(&field_id).copied().unwrap_or(0);
        let unit = by_level
            .entry(level)
            .or_default()
            .entry(field.table_id.clone())
            .or_default();
        unit.0.push(field_id);
        unit.1 = Some(match unit.1.take() {
            Some(existing) => existing.merge(scope),
            None => scope,
        });
    }

    let steps: Vec<ComputedUpdateStep> = by_level
        .into_iter()
        .map(|(level, tables)| ComputedUpdateStep {
            level,
            units: tables
                .into_iter()
                .map(|(table_id, (field_ids, scope))| RecomputeUnit {
                    table_id,
                    field_ids,
                    scope: scope.unwrap_or(RecomputeScope::WholeTable),
                })
                .collect(),
        })
        .collect();
    debug!(
        steps = steps.len(),
        fields = steps.iter().map(|step| step.units.len()).sum::<usize>(),
        "planned computed update"
    );

    Ok(ComputedUpdatePlan {
        steps,
        seeds: seeds
            .iter()
            .filter_map(|(field_id, seed)| Some((field_id.clone(), seed.records.clone()?)))
            .collect(),
    })
}

#[derive(Debug, Clone)]
struct Seed {
    /// `None`: unknown records.
    records: Option<BTreeSet<String>>,
    /// Foreign records a changed link pointed at before the change.
    previous_links: BTreeSet<String>,
}

fn collect_seeds(
    domain: &TableDomain,
    changes: &ChangeSet,
) -> Result<BTreeMap<String, Seed>, EngineError> {
    let mut seeds: BTreeMap<String, Seed> = BTreeMap::new();
    for change in &changes.changes {
        if domain.table(&change.table_id).is_none() {
            return Err(errors::missing_table_error(&change.table_id));
        }
        for field_id in &change.field_ids {
            domain
                .field(field_id)
                .filter(|field| field.table_id == change.table_id)
                .ok_or_else(|| errors::missing_field_error(field_id, "change set"))?;
            let records = change
                .record_ids
                .as_ref()
                .map(|ids| ids.iter().cloned().collect::<BTreeSet<_>>());
            match seeds.get_mut(field_id) {
                Some(seed) => {
                    seed.records = match (seed.records.take(), records) {
                        (Some(mut known), Some(more)) => {
                            known.extend(more);
                            Some(known)
                        }
                        _ => None,
                    };
                }
                None => {
                    seeds.insert(
                        field_id.clone(),
                        Seed {
                            records,
                            previous_links: BTreeSet::new(),
                        },
                    );
                }
            }
        }
    }

    for (link_field_id, foreign_ids) in &changes.previous_links {
        let field = domain
            .field(link_field_id)
            .ok_or_else(|| errors::missing_field_error(link_field_id, "previous links"))?;
        if field.link_options().is_none() {
            return Err(errors::invalid_link_options_error(
                link_field_id,
                "previous links name a field that is not a link",
            ));
        }
        let Some(seed) = seeds.get_mut(link_field_id) else {
            return Err(errors::invalid_link_options_error(
                link_field_id,
                "previous links name a link the change set does not change",
            ));
        };
        seed.previous_links.extend(foreign_ids.iter().cloned());
    }
    Ok(seeds)
}

struct Planner<'a> {
    domain: &'a TableDomain,
    graph: &'a FieldDependencyGraph,
    seeds: &'a BTreeMap<String, Seed>,
    /// Every recomputed field and the records it must be recomputed for.
    scopes: BTreeMap<String, RecomputeScope>,
}

impl Planner<'_> {
    /// Closes the recompute set over graph dependents, links displaying a
    /// changed title and the symmetric side of changed links.
    fn expand(&mut self) {
        let mut queue: Vec<String> = Vec::new();
        for (field_id, seed) in self.seeds {
            let Some(field) = self.domain.field(field_id) else {
                continue;
            };
            if field.is_computed() {
                let scope = match &seed.records {
                    Some(ids) => RecomputeScope::Records(ids.clone()),
                    None => RecomputeScope::WholeTable,
                };
                self.add(field_id, scope, &mut queue);
            }
            if let Some(symmetric) = field
                .link_options()
                .and_then(|options| options.symmetric_field_id.as_deref())
            {
                if self.domain.field(symmetric).is_some() {
                    let mut sources = Vec::with_capacity(2);
                    if !seed.previous_links.is_empty() {
                        sources.push(ScopeSource::Records(seed.previous_links.clone()));
                    }
                    sources.push(ScopeSource::Linked {
                        link_field_id: symmetric.to_string(),
                        field_id: field_id.clone(),
                    });
                    self.add(symmetric, RecomputeScope::Dependents(sources), &mut queue);
                }
            }
            queue.push(field_id.clone());
        }

        let mut expanded = BTreeSet::new();
        while let Some(field_id) = queue.pop() {
            if !expanded.insert(field_id.clone()) {
                continue;
            }
            let Some(changed) = self.domain.field(&field_id) else {
                continue;
            };
            for link in self.displaying_links(changed) {
                let source = ScopeSource::Linked {
                    link_field_id: link.clone(),
                    field_id: field_id.clone(),
                };
                self.add(&link, RecomputeScope::Dependents(vec![source]), &mut queue);
            }
            let dependents: Vec<String> = self
                .graph
                .dependents_of(&field_id)
                .map(str::to_string)
                .collect();
            for dependent in dependents {
                let Some(reader) = self.domain.field(&dependent) else {
                    continue;
                };
                if let Some(scope) = self.scope_of_read(reader, &field_id) {
                    self.add(&dependent, scope, &mut queue);
                }
            }
        }
    }

    fn add(&mut self, field_id: &str, scope: RecomputeScope, queue: &mut Vec<String>) {
        let merged = match self.scopes.remove(field_id) {
            Some(existing) => existing.merge(scope),
            None => scope,
        };
        self.scopes.insert(field_id.to_string(), merged);
        queue.push(field_id.to_string());
    }

    /// Links whose title is `field`.
    fn displaying_links(&self, field: &Field) -> Vec<String> {
        self.domain
            .all_fields()
            .filter(|candidate| {
                candidate.link_options().is_some_and(|options| {
                    options.lookup_field_id == field.id
                        && options.foreign_table_id == field.table_id
                })
            })
            .map(|link| link.id.clone())
            .collect()
    }

    /// Records of `reader` to recompute when `changed` changes. `None` when
    /// the only edges are surfaced transitive ones, which the direct chain
    /// already covers.
    fn scope_of_read(&self, reader: &Field, changed: &str) -> Option<RecomputeScope> {
        let unknown_records = self
            .seeds
            .get(changed)
            .is_some_and(|seed| seed.records.is_none())
            && self
                .domain
                .field(changed)
                .is_some_and(|field| !field.is_computed());

        let mut scope: Option<RecomputeScope> = None;
        for edge in self
            .graph
            .edges_from(&reader.id)
            .filter(|edge| edge.to_field_id == changed)
        {
            let conditional = matches!(
                reader.kind,
                FieldKind::ConditionalLookup(_) | FieldKind::ConditionalRollup(_)
            ) && edge.kind == EdgeKind::CrossRecord;
            let next = if unknown_records || conditional {
                RecomputeScope::WholeTable
            } else {
                match (edge.kind, edge.via_link_field_id.as_deref()) {
                    (EdgeKind::CrossRecord, Some(link)) => {
                        RecomputeScope::Dependents(vec![ScopeSource::Linked {
                            link_field_id: link.to_string(),
                            field_id: changed.to_string(),
                        }])
                    }
                    (EdgeKind::CrossRecord, None) => RecomputeScope::WholeTable,
                    (EdgeKind::SameRecord, _) => {
                        RecomputeScope::Dependents(vec![ScopeSource::SameRecord {
                            field_id: changed.to_string(),
                        }])
                    }
                }
            };
            scope = Some(match scope {
                Some(existing) => existing.merge(next),
                None => next,
            });
        }
        scope
    }

    /// Graph levels, raised so that a link displaying a recomputed title
    /// runs after it, and everything reading the link after the link.
    fn levels(&self) -> Result<BTreeMap<String, usize>, EngineError> {
        let mut levels: BTreeMap<String, usize> = self
            .scopes
            .keys()
            .map(|field_id| (field_id.clone(), self.graph.level(field_id).unwrap_or(0)))
            .collect();

        for _ in 0..=self.scopes.len() {
            let mut raised = false;
            for field_id in self.scopes.keys() {
                let Some(field) = self.domain.field(field_id) else {
                    continue;
                };
                let mut reads: Vec<&str> = self.graph.dependencies_of(field_id).collect();
                if let Some(options) = field.link_options() {
                    reads.push(options.lookup_field_id.as_str());
                }
                let floor = reads
                    .iter()
                    .filter_map(|read| levels.get(*read))
                    .map(|level| level + 1)
                    .max()
                    .unwrap_or(0);
                let current = levels.get(field_id).copied().unwrap_or(0);
                if floor > current {
                    levels.insert(field_id.clone(), floor);
                    raised = true;
                }
            }
            if !raised {
                return Ok(levels);
            }
        }

        let names: Vec<String> = self
            .scopes
            .keys()
            .filter_map(|field_id| self.domain.field(field_id))
            .filter(|field| matches!(field.kind, FieldKind::Link(_)))
            .map(|field| field.name.clone())
            .collect();
        Err(errors::cycle_detected_error(&names))
    }
}
