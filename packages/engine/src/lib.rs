mod backend;
mod boot;
mod compiler;
mod config;
mod dialect;
pub mod domain;
mod engine;
mod error;
pub mod errors;
mod execution;
pub mod graph;
mod planner;
pub mod sql;
mod types;

#[cfg(test)]
mod test_support;

pub use backend::{EngineBackend, SqlDialect};
pub use boot::{boot, BootArgs};
pub use compiler::{
    compile_query, compile_recompute, CompiledQuery, NestedMode, QueryOptions, RecomputeQuery,
    SelectMode,
};
pub use config::EngineConfig;
pub use dialect::{dialect_for, Dialect, PostgresDialect, SqliteDialect};
pub use engine::{Engine, QueryRows};
pub use error::EngineError;
pub use execution::{
    execute_plan, BatchHandler, BatchStrategy, ExecutionReport, RecomputedBatch, RecordSnapshot,
};
pub use graph::{build_graph, DependencyEdge, EdgeKind, FieldDependencyGraph};
pub use planner::{
    plan, plan_with_graph, ChangeSet, ComputedUpdatePlan, ComputedUpdateStep, FieldChange,
    RecomputeScope, RecomputeUnit, ScopeSource,
};
pub use types::{QueryResult, Value};
