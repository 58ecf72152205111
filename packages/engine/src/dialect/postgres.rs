use crate::backend::SqlDialect;
use crate::dialect::{
    coalesce_zero, non_empty, zero_or_one, DeterministicAggregate, Dialect,
    RollupAggregateOptions, ARRAY_JOIN_SEPARATOR, USER_EMAIL_COLUMN, USER_ID_COLUMN,
    USER_NAME_COLUMN,
};
use crate::domain::{RollupFunction, StorageType};
use crate::errors;
use crate::sql::ast::{
    case_when, col, func, int_lit, null, text_lit, BinaryOp, FunctionCall, OrderByItem, Select,
    SqlExpr, TableFactor,
};
use crate::EngineError;

const TEXT: &str = "text";
const DOUBLE: &str = "double precision";
const NUMERIC: &str = "numeric";

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    fn bool_value(value: SqlExpr) -> SqlExpr {
        value.cast("boolean")
    }

    fn ordered_string_agg(value: SqlExpr, separator: &str, order_by: &[OrderByItem]) -> SqlExpr {
        FunctionCall::new("string_agg", vec![value.cast(TEXT), text_lit(separator)])
            .order_by(order_by.to_vec())
            .into_expr()
    }
}

impl Dialect for PostgresDialect {
    fn kind(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    fn sql_type(&self, storage: StorageType) -> &'static str {
        match storage {
            StorageType::Text => TEXT,
            StorageType::Integer => "bigint",
            StorageType::Real => DOUBLE,
            StorageType::Boolean => "boolean",
            StorageType::DateTime => "timestamptz",
            StorageType::Json => "jsonb",
        }
    }

    fn supports_ordered_aggregate(&self) -> bool {
        true
    }

    fn supports_materialized_cte(&self) -> bool {
        true
    }

    fn json_value(&self, expr: SqlExpr, _is_json: bool) -> SqlExpr {
        expr
    }

    fn json_aggregate_non_null(
        &self,
        expr: SqlExpr,
        order_by: Vec<OrderByItem>,
    ) -> Result<SqlExpr, EngineError> {
        Ok(FunctionCall::new("jsonb_agg", vec![expr.clone()])
            .order_by(order_by)
            .filter(expr.is_not_null())
            .into_expr())
    }

    fn single_value_json_array(&self, expr: SqlExpr, _is_json: bool) -> SqlExpr {
        case_when(
            expr.clone().is_null(),
            null(),
            Some(func("jsonb_build_array", vec![expr])),
        )
    }

    fn build_link_json_object(&self, id: SqlExpr, title: SqlExpr, _raw_title: SqlExpr) -> SqlExpr {
        // `id` is never NULL for a linked row, so stripping nulls only drops the title.
        func(
            "jsonb_strip_nulls",
            vec![func(
                "jsonb_build_object",
                vec![text_lit("id"), id, text_lit("title"), title],
            )],
        )
    }

    fn rollup_aggregate(
        &self,
        function: RollupFunction,
        value: SqlExpr,
        options: &RollupAggregateOptions,
    ) -> Result<SqlExpr, EngineError> {
        Ok(match function {
            RollupFunction::Sum => coalesce_zero(func("SUM", vec![value.cast(DOUBLE)])),
            RollupFunction::Count => func("COUNT", vec![value]),
            RollupFunction::CountA => func(
                "COUNT",
                vec![case_when(non_empty(value, TEXT), int_lit(1), None)],
            ),
            RollupFunction::CountAll => func(
                "COUNT",
                vec![options.row_presence.clone().unwrap_or(SqlExpr::Star)],
            ),
            RollupFunction::Average => func("AVG", vec![value.cast(DOUBLE)]),
            RollupFunction::Min => func("MIN", vec![value]),
            RollupFunction::Max => func("MAX", vec![value]),
            RollupFunction::And => func("bool_and", vec![Self::bool_value(value)]),
            RollupFunction::Or => func("bool_or", vec![Self::bool_value(value)]),
            RollupFunction::Xor => func(
                "SUM",
                vec![zero_or_one(Self::bool_value(value))],
            )
            .binary(BinaryOp::Modulo, int_lit(2))
            .eq(int_lit(1)),
            RollupFunction::ArrayJoin => {
                Self::ordered_string_agg(value, ARRAY_JOIN_SEPARATOR, &options.order_by)
            }
            RollupFunction::Concatenate => Self::ordered_string_agg(value, "", &options.order_by),
            RollupFunction::ArrayUnique => FunctionCall::new("jsonb_agg", vec![value.clone()])
                .distinct()
                .order_by(vec![OrderByItem::asc(value.clone())])
                .filter(value.is_not_null())
                .into_expr(),
            RollupFunction::ArrayCompact => FunctionCall::new("jsonb_agg", vec![value.clone()])
                .order_by(options.order_by.clone())
                .filter(non_empty(value, TEXT))
                .into_expr(),
        })
    }

    fn single_value_rollup_aggregate(
        &self,
        function: RollupFunction,
        value: SqlExpr,
        options: &RollupAggregateOptions,
    ) -> Result<SqlExpr, EngineError> {
        Ok(match function {
            RollupFunction::Sum => coalesce_zero(value.cast(DOUBLE)),
            RollupFunction::Count => zero_or_one(value.is_not_null()),
            RollupFunction::CountA => zero_or_one(non_empty(value, TEXT)),
            RollupFunction::CountAll => zero_or_one(
                options
                    .row_presence
                    .clone()
                    .unwrap_or(value)
                    .is_not_null(),
            ),
            RollupFunction::Average => value.cast(DOUBLE),
            RollupFunction::Min | RollupFunction::Max => value,
            RollupFunction::And | RollupFunction::Or | RollupFunction::Xor => {
                Self::bool_value(value)
            }
            RollupFunction::ArrayJoin | RollupFunction::Concatenate => value.cast(TEXT),
            RollupFunction::ArrayUnique => self.single_value_json_array(value, false),
            RollupFunction::ArrayCompact => case_when(
                non_empty(value.clone(), TEXT),
                func("jsonb_build_array", vec![value]),
                Some(null()),
            ),
        })
    }

    fn build_deterministic_lookup_aggregate(
        &self,
        _request: DeterministicAggregate,
    ) -> Result<SqlExpr, EngineError> {
        Err(errors::unsupported_driver_error(
            "postgres",
            "deterministic correlated lookup aggregate",
        ))
    }

    fn flatten_lookup_cte_value(&self, expr: SqlExpr) -> SqlExpr {
        expr.binary(BinaryOp::JsonGetText, int_lit(0))
    }

    fn build_user_json_object_by_id(&self, id: SqlExpr, user_table: &str) -> SqlExpr {
        let object = func(
            "jsonb_build_object",
            vec![
                text_lit("id"),
                col("u", USER_ID_COLUMN),
                text_lit("title"),
                col("u", USER_NAME_COLUMN),
                text_lit("email"),
                col("u", USER_EMAIL_COLUMN),
            ],
        );
        let lookup = Select::from(TableFactor::table(user_table, "u"))
            .project(object, "user")
            .filter(col("u", USER_ID_COLUMN).eq(id));
        SqlExpr::Subquery(Box::new(lookup))
    }

    fn divide(&self, left: SqlExpr, right: SqlExpr) -> SqlExpr {
        left.cast(DOUBLE).binary(
            BinaryOp::Divide,
            func("NULLIF", vec![right.cast(DOUBLE), int_lit(0)]),
        )
    }

    fn modulo(&self, left: SqlExpr, right: SqlExpr) -> SqlExpr {
        func(
            "MOD",
            vec![
                left.cast(NUMERIC),
                func("NULLIF", vec![right.cast(NUMERIC), int_lit(0)]),
            ],
        )
        .cast(DOUBLE)
    }

    fn round(&self, value: SqlExpr, digits: SqlExpr) -> SqlExpr {
        func("ROUND", vec![value.cast(NUMERIC), digits.cast("integer")]).cast(DOUBLE)
    }

    fn ceiling(&self, value: SqlExpr) -> SqlExpr {
        func("CEIL", vec![value])
    }

    fn floor(&self, value: SqlExpr) -> SqlExpr {
        func("FLOOR", vec![value])
    }

    fn greatest(&self, args: Vec<SqlExpr>) -> SqlExpr {
        func("GREATEST", args)
    }

    fn least(&self, args: Vec<SqlExpr>) -> SqlExpr {
        func("LEAST", args)
    }
}
