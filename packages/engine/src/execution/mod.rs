//! Runs a computed update plan against a backend.
//!
//! Steps run in level order. Within a step every unit's records are
//! resolved first, then units on different tables run concurrently while
//! the batches of one unit stay sequential.

mod batch;
mod recompute;
mod scope;
mod snapshot;

use std::cell::RefCell;

use futures_util::future::try_join_all;
use tracing::{info, info_span, Instrument};

pub use batch::BatchStrategy;
pub use recompute::BatchHandler;
pub use snapshot::{RecomputedBatch, RecordSnapshot};

use crate::backend::EngineBackend;
use crate::config::EngineConfig;
use crate::domain::TableDomain;
use crate::planner::ComputedUpdatePlan;
use crate::EngineError;
use recompute::Recomputer;
use scope::{resolve_scope, ChangedRecords};

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExecutionReport {
    /// Records rewritten, counted once per unit that changed them.
    pub rows_touched: usize,
    pub rows_visited: usize,
    /// Writes skipped because the record's version moved underneath.
    pub conflicts: usize,
    pub steps: usize,
}

pub async fn execute_plan(
    backend: &dyn EngineBackend,
    domain: &TableDomain,
    config: &EngineConfig,
    plan: &ComputedUpdatePlan,
    on_batch: &mut BatchHandler<'_>,
) -> Result<ExecutionReport, EngineError> {
    let span = info_span!("computed_update", steps = plan.steps.len());
    async move {
        let recomputer = Recomputer {
            backend,
            domain,
            config,
        };
        let handler = RefCell::new(on_batch);
        let mut changed: ChangedRecords = plan.seeds.clone();
        let mut report = ExecutionReport::default();

        for step in &plan.steps {
            let step_span = info_span!("step", level = step.level, units = step.units.len());
            async {
                let mut scopes = Vec::with_capacity(step.units.len());
                for unit in &step.units {
                    scopes.push(
                        resolve_scope(
                            backend,
                            domain,
                            &unit.scope,
                            &changed,
                            config.record_batch_size,
                        )
                        .await?,
                    );
                }

                let outcomes = try_join_all(step.units.iter().zip(scopes).map(|(unit, records)| {
                    recomputer.run_unit(step.level, unit, records, |batch| {
                        let mut handler = handler.borrow_mut();
                        (*handler)(batch)
                    })
                }))
                .await?;

                for outcome in outcomes {
                    report.rows_touched += outcome.rows_touched;
                    report.rows_visited += outcome.rows_visited;
                    report.conflicts += outcome.conflicts;
                    for (field_id, ids) in outcome.changed {
                        changed.entry(field_id).or_default().extend(ids);
                    }
                }
                report.steps += 1;
                Ok::<(), EngineError>(())
            }
            .instrument(step_span)
            .await?;
        }

        info!(
            rows_touched = report.rows_touched,
            rows_visited = report.rows_visited,
            conflicts = report.conflicts,
            "computed update finished"
        );
        Ok(report)
    }
    .instrument(span)
    .await
}
