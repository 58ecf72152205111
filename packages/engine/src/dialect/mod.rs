//! Per-engine SQL primitives. Compilers only build SQL through this
//! interface; engine-specific text lives in `sqlite.rs` and `postgres.rs`.

mod postgres;
mod sqlite;

pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use crate::backend::SqlDialect;
use crate::domain::{RollupFunction, StorageType};
use crate::sql::ast::{
    case_when, func, int_lit, null, text_lit, BinaryOp, OrderByItem, Select, SqlExpr,
};
use crate::EngineError;

/// Separator `array_join` places between values.
pub const ARRAY_JOIN_SEPARATOR: &str = ", ";

#[derive(Debug, Clone, Default)]
pub struct RollupAggregateOptions {
    pub target_storage: Option<StorageType>,
    /// Link order; consulted by order-sensitive functions only.
    pub order_by: Vec<OrderByItem>,
    /// Non-null once per participating foreign row; what `countall` counts.
    pub row_presence: Option<SqlExpr>,
}

impl RollupAggregateOptions {
    fn target_is_json(&self) -> bool {
        self.target_storage.is_some_and(StorageType::is_json)
    }
}

/// What a deterministic correlated aggregate folds its ordered rows into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeterministicShape {
    /// JSON array of the non-null values.
    Lookup,
    Rollup(RollupFunction),
}

/// Ordered, correlated row source for engines without an ordered aggregate.
#[derive(Debug, Clone)]
pub struct DeterministicAggregate {
    /// FROM, joins, correlation/filter and ORDER BY; projection is ignored.
    pub rows: Select,
    pub value: SqlExpr,
    pub value_is_json: bool,
    pub shape: DeterministicShape,
}

pub trait Dialect: Send + Sync {
    fn kind(&self) -> SqlDialect;

    fn sql_type(&self, storage: StorageType) -> &'static str;

    fn typed_null(&self, storage: StorageType) -> SqlExpr {
        null().cast(self.sql_type(storage))
    }

    fn cast_to(&self, expr: SqlExpr, storage: StorageType) -> SqlExpr {
        expr.cast(self.sql_type(storage))
    }

    fn text_type(&self) -> &'static str {
        self.sql_type(StorageType::Text)
    }

    fn supports_ordered_aggregate(&self) -> bool;

    fn supports_materialized_cte(&self) -> bool;

    /// Marks a JSON-typed value so aggregates embed it instead of quoting it.
    fn json_value(&self, expr: SqlExpr, is_json: bool) -> SqlExpr;

    fn json_aggregate_non_null(
        &self,
        expr: SqlExpr,
        order_by: Vec<OrderByItem>,
    ) -> Result<SqlExpr, EngineError>;

    /// One-element array for single-value links, NULL when unlinked.
    fn single_value_json_array(&self, expr: SqlExpr, is_json: bool) -> SqlExpr;

    /// `{id, title}`; the title key is omitted when `raw_title` is NULL.
    fn build_link_json_object(&self, id: SqlExpr, title: SqlExpr, raw_title: SqlExpr) -> SqlExpr;

    fn rollup_aggregate(
        &self,
        function: RollupFunction,
        value: SqlExpr,
        options: &RollupAggregateOptions,
    ) -> Result<SqlExpr, EngineError>;

    /// Non-aggregate form for ManyOne/OneOne links: one row or none.
    fn single_value_rollup_aggregate(
        &self,
        function: RollupFunction,
        value: SqlExpr,
        options: &RollupAggregateOptions,
    ) -> Result<SqlExpr, EngineError>;

    fn build_deterministic_lookup_aggregate(
        &self,
        request: DeterministicAggregate,
    ) -> Result<SqlExpr, EngineError>;

    /// First element of a JSON-array CTE column, as a plain value.
    fn flatten_lookup_cte_value(&self, expr: SqlExpr) -> SqlExpr;

    fn build_user_json_object_by_id(&self, id: SqlExpr, user_table: &str) -> SqlExpr;

    /// Division that never integer-divides and yields NULL for a zero divisor.
    fn divide(&self, left: SqlExpr, right: SqlExpr) -> SqlExpr;

    fn modulo(&self, left: SqlExpr, right: SqlExpr) -> SqlExpr;

    fn round(&self, value: SqlExpr, digits: SqlExpr) -> SqlExpr;

    fn ceiling(&self, value: SqlExpr) -> SqlExpr;

    fn floor(&self, value: SqlExpr) -> SqlExpr;

    fn greatest(&self, args: Vec<SqlExpr>) -> SqlExpr;

    fn least(&self, args: Vec<SqlExpr>) -> SqlExpr;
}

static SQLITE: SqliteDialect = SqliteDialect;
static POSTGRES: PostgresDialect = PostgresDialect;

pub fn dialect_for(kind: SqlDialect) -> &'static dyn Dialect {
    match kind {
        SqlDialect::Sqlite => &SQLITE,
        SqlDialect::Postgres => &POSTGRES,
    }
}

/// Columns of the user table read by `build_user_json_object_by_id`.
pub const USER_ID_COLUMN: &str = "__id";
pub const USER_NAME_COLUMN: &str = "name";
pub const USER_EMAIL_COLUMN: &str = "email";

fn non_empty(value: SqlExpr, text_type: &'static str) -> SqlExpr {
    value
        .clone()
        .is_not_null()
        .and(value.cast(text_type).binary(BinaryOp::NotEq, text_lit("")))
}

fn coalesce_zero(expr: SqlExpr) -> SqlExpr {
    func("COALESCE", vec![expr, int_lit(0)])
}

fn zero_or_one(condition: SqlExpr) -> SqlExpr {
    case_when(condition, int_lit(1), Some(int_lit(0)))
}
