//! One recompute pass per batch: read fresh and stored values, write back
//! the rows that changed under optimistic concurrency.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::backend::EngineBackend;
use crate::compiler::{compile_recompute, RecomputeQuery};
use crate::config::EngineConfig;
use crate::dialect::dialect_for;
use crate::domain::{TableDomain, ID_COLUMN, VERSION_COLUMN};
use crate::errors;
use crate::execution::batch::{record_id_of, BatchStrategy};
use crate::execution::scope::ChangedRecords;
use crate::execution::snapshot::{value_changed, RecomputedBatch, RecordSnapshot};
use crate::planner::RecomputeUnit;
use crate::sql::ast::{bare_col, int_lit, param, Assignment, BinaryOp, Update};
use crate::sql::{render_update, validate_statement};
use crate::{EngineError, Value};

/// Receives every batch that rewrote at least one record.
pub type BatchHandler<'h> = dyn FnMut(&RecomputedBatch) -> Result<(), EngineError> + 'h;

pub(crate) struct Recomputer<'a> {
    pub(crate) backend: &'a dyn EngineBackend,
    pub(crate) domain: &'a TableDomain,
    pub(crate) config: &'a EngineConfig,
}

#[derive(Debug, Default)]
pub(crate) struct UnitOutcome {
    pub(crate) rows_visited: usize,
    pub(crate) rows_touched: usize,
    pub(crate) conflicts: usize,
    pub(crate) changed: ChangedRecords,
}

impl Recomputer<'_> {
    /// Recomputes `unit` over `records` (`None`: the whole table), batch by
    /// batch in ascending order.
    pub(crate) async fn run_unit(
        &self,
        level: usize,
        unit: &RecomputeUnit,
        records: Option<BTreeSet<String>>,
        mut on_batch: impl FnMut(&RecomputedBatch) -> Result<(), EngineError>,
    ) -> Result<UnitOutcome, EngineError> {
        let mut outcome = UnitOutcome::default();
        if records.as_ref().is_some_and(BTreeSet::is_empty) {
            return Ok(outcome);
        }
        let table = self
            .domain
            .table(&unit.table_id)
            .ok_or_else(|| errors::missing_table_error(&unit.table_id))?;

        let strategy = BatchStrategy::select(records.as_ref(), self.config);
        let mut batches = strategy.into_batches(self.backend, &table.db_table_name);
        while let Some(record_ids) = batches.next_batch().await? {
            if record_ids.is_empty() {
                continue;
            }
            let query = compile_recompute(
                self.domain,
                self.backend.dialect(),
                self.config,
                &unit.table_id,
                &unit.field_ids,
                &record_ids,
            )?;
            let batch = self.run_batch(level, &unit.table_id, &query, &mut outcome).await?;
            debug!(
                table = %unit.table_id,
                level,
                visited = batch.rows_visited,
                written = batch.snapshots.len(),
                "recomputed batch"
            );
            if !batch.snapshots.is_empty() {
                on_batch(&batch)
                    .map_err(|error| errors::handler_aborted_error(&error.to_string()))?;
            }
        }
        Ok(outcome)
    }

    async fn run_batch(
        &self,
        level: usize,
        table_id: &str,
        query: &RecomputeQuery,
        outcome: &mut UnitOutcome,
    ) -> Result<RecomputedBatch, EngineError> {
        let result = self
            .backend
            .execute(&query.statement.sql, &query.statement.params)
            .await?;
        let expected_width = RecomputeQuery::LEADING_COLUMNS + 2 * query.field_ids.len();

        let mut snapshots = Vec::new();
        for row in &result.rows {
            if row.len() < expected_width {
                return Err(errors::backend_error(&format!(
                    "recompute row has {} columns, expected {expected_width}",
                    row.len()
                )));
            }
            let Some(record_id) = record_id_of(&row[0]) else {
                return Err(errors::backend_error("recompute row has no record id"));
            };
            let Some(version_before) = row[1].as_i64() else {
                return Err(errors::backend_error(&format!(
                    "record `{record_id}` of `{table_id}` has no integer version: {:?}",
                    row[1]
                )));
            };

            let mut changes = BTreeMap::new();
            for (idx, field_id) in query.field_ids.iter().enumerate() {
                let fresh = &row[RecomputeQuery::LEADING_COLUMNS + 2 * idx];
                let stored = &row[RecomputeQuery::LEADING_COLUMNS + 2 * idx + 1];
                if value_changed(fresh, stored) {
                    changes.insert(field_id.clone(), fresh.clone());
                }
            }
            outcome.rows_visited += 1;
            if changes.is_empty() {
                continue;
            }

            let Some(version_after) = self
                .write_row(table_id, &record_id, version_before, &changes)
                .await?
            else {
                warn!(
                    table = %table_id,
                    record_id = %record_id,
                    version = version_before,
                    "record changed concurrently; skipping"
                );
                outcome.conflicts += 1;
                continue;
            };
            outcome.rows_touched += 1;
            for field_id in changes.keys() {
                outcome
                    .changed
                    .entry(field_id.clone())
                    .or_default()
                    .insert(record_id.clone());
            }
            snapshots.push(RecordSnapshot {
                record_id,
                version_before,
                version_after,
                changes,
            });
        }

        Ok(RecomputedBatch {
            level,
            table_id: table_id.to_string(),
            field_ids: query.field_ids.clone(),
            rows_visited: result.rows.len(),
            snapshots,
        })
    }

    /// Writes `changes` if the record is still at `version`. Returns the new
    /// version, or `None` when another writer got there first.
    async fn write_row(
        &self,
        table_id: &str,
        record_id: &str,
        version: i64,
        changes: &BTreeMap<String, Value>,
    ) -> Result<Option<i64>, EngineError> {
        let table = self
            .domain
            .table(table_id)
            .ok_or_else(|| errors::missing_table_error(table_id))?;
        let dialect = dialect_for(self.backend.dialect());

        let mut assignments = Vec::with_capacity(changes.len() + 1);
        for (field_id, value) in changes {
            let field = self
                .domain
                .field(field_id)
                .ok_or_else(|| errors::missing_field_error(field_id, "recompute write"))?;
            let value = if value.is_null() {
                dialect.typed_null(field.storage_type)
            } else {
                dialect.cast_to(param(value.clone()), field.storage_type)
            };
            assignments.push(Assignment {
                column: field.physical_column().into(),
                value,
            });
        }
        assignments.push(Assignment {
            column: VERSION_COLUMN.into(),
            value: bare_col(VERSION_COLUMN).binary(BinaryOp::Plus, int_lit(1)),
        });

        let update = Update {
            table: table.db_table_name.as_str().into(),
            assignments,
            selection: Some(
                bare_col(ID_COLUMN)
                    .eq(param(record_id))
                    .and(bare_col(VERSION_COLUMN).eq(param(version))),
            ),
            returning: vec![bare_col(VERSION_COLUMN)],
        };
        let statement = render_update(&update, self.backend.dialect());
        if self.config.validate_sql {
            validate_statement(&statement.sql, self.backend.dialect())?;
        }
        let result = self.backend.execute(&statement.sql, &statement.params).await?;
        let Some(row) = result.rows.first() else {
            return Ok(None);
        };
        match row.first().and_then(Value::as_i64) {
            Some(version_after) => Ok(Some(version_after)),
            None => Err(errors::backend_error(&format!(
                "update of record `{record_id}` in `{table_id}` returned no integer version"
            ))),
        }
    }
}
