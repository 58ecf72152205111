use tracing::debug;

use crate::backend::{EngineBackend, SqlDialect};
use crate::boot::BootArgs;
use crate::compiler::{compile_query, CompiledQuery, QueryOptions};
use crate::config::EngineConfig;
use crate::domain::TableDomain;
use crate::execution::{execute_plan, ExecutionReport, RecomputedBatch};
use crate::planner::{plan, ChangeSet, ComputedUpdatePlan};
use crate::{EngineError, QueryResult, Value};

/// Rows of a listing query, keyed by [`CompiledQuery::columns`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryRows {
    /// Value of `column` in row `row`.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|name| name == column)?;
        self.rows.get(row)?.get(idx)
    }
}

pub struct Engine {
    backend: Box<dyn EngineBackend + Send + Sync>,
    config: EngineConfig,
}

impl Engine {
    pub(crate) fn from_boot_args(args: BootArgs) -> Self {
        Self {
            backend: args.backend,
            config: args.config,
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.backend.dialect()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs a statement on the backend as-is.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, EngineError> {
        self.backend.execute(sql, params).await
    }

    pub fn compile_query(
        &self,
        domain: &TableDomain,
        table_id: &str,
        options: &QueryOptions,
    ) -> Result<CompiledQuery, EngineError> {
        compile_query(domain, self.dialect(), &self.config, table_id, options)
    }

    pub async fn query(
        &self,
        domain: &TableDomain,
        table_id: &str,
        options: &QueryOptions,
    ) -> Result<QueryRows, EngineError> {
        let compiled = self.compile_query(domain, table_id, options)?;
        let result = self
            .backend
            .execute(&compiled.statement.sql, &compiled.statement.params)
            .await?;
        debug!(table = table_id, rows = result.rows.len(), "listing query");
        Ok(QueryRows {
            columns: compiled.columns,
            rows: result.rows,
        })
    }

    pub fn plan(
        &self,
        domain: &TableDomain,
        changes: &ChangeSet,
    ) -> Result<ComputedUpdatePlan, EngineError> {
        plan(domain, changes)
    }

    pub async fn execute_plan(
        &self,
        domain: &TableDomain,
        plan: &ComputedUpdatePlan,
        mut on_batch: impl FnMut(&RecomputedBatch) -> Result<(), EngineError>,
    ) -> Result<ExecutionReport, EngineError> {
        execute_plan(
            self.backend.as_ref(),
            domain,
            &self.config,
            plan,
            &mut on_batch,
        )
        .await
    }

    /// Plans the recomputation `changes` require and runs it, handing each
    /// written batch to `on_batch`.
    pub async fn plan_and_execute(
        &self,
        domain: &TableDomain,
        changes: &ChangeSet,
        on_batch: impl FnMut(&RecomputedBatch) -> Result<(), EngineError>,
    ) -> Result<ExecutionReport, EngineError> {
        let plan = self.plan(domain, changes)?;
        if plan.is_empty() {
            return Ok(ExecutionReport::default());
        }
        self.execute_plan(domain, &plan, on_batch).await
    }
}
