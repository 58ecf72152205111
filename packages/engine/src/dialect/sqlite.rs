use crate::backend::SqlDialect;
use crate::dialect::{
    coalesce_zero, non_empty, zero_or_one, DeterministicAggregate, DeterministicShape, Dialect,
    RollupAggregateOptions, ARRAY_JOIN_SEPARATOR, USER_EMAIL_COLUMN, USER_ID_COLUMN,
    USER_NAME_COLUMN,
};
use crate::domain::{RollupFunction, StorageType};
use crate::errors;
use crate::sql::ast::{
    bare_col, case_when, col, func, int_lit, null, text_lit, BinaryOp, FunctionCall, OrderByItem,
    Select, SqlExpr, TableFactor,
};
use crate::EngineError;

const ROWS_ALIAS: &str = "s";
const VALUE_ALIAS: &str = "v";

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// 1/0 for truthy/falsy, NULL stays NULL.
    fn truth_flag(value: SqlExpr) -> SqlExpr {
        SqlExpr::Case {
            branches: vec![
                (value.clone().is_null(), null()),
                (value, int_lit(1)),
            ],
            else_result: Some(Box::new(int_lit(0))),
        }
    }

    fn ordered_rows_select(request: &DeterministicAggregate) -> Select {
        let mut rows = request.rows.clone();
        rows.projection.clear();
        let mut rows = rows.project(request.value.clone(), VALUE_ALIAS);
        if request.shape != DeterministicShape::Rollup(RollupFunction::CountAll) {
            rows = rows.filter(request.value.clone().is_not_null());
        }
        match request.shape {
            DeterministicShape::Rollup(RollupFunction::ArrayUnique) => {
                rows.distinct = true;
                rows.order_by = vec![OrderByItem::asc(bare_col(VALUE_ALIAS))];
            }
            DeterministicShape::Rollup(RollupFunction::ArrayCompact) => {
                rows = rows.filter(
                    request
                        .value
                        .clone()
                        .cast("TEXT")
                        .binary(BinaryOp::NotEq, text_lit("")),
                );
            }
            _ => {}
        }
        rows
    }

    fn json_array_or_null(element: SqlExpr) -> SqlExpr {
        case_when(
            func("COUNT", vec![SqlExpr::Star]).eq(int_lit(0)),
            null(),
            Some(func("json_group_array", vec![element])),
        )
    }
}

impl Dialect for SqliteDialect {
    fn kind(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    fn sql_type(&self, storage: StorageType) -> &'static str {
        match storage {
            StorageType::Text | StorageType::DateTime | StorageType::Json => "TEXT",
            StorageType::Integer | StorageType::Boolean => "INTEGER",
            StorageType::Real => "REAL",
        }
    }

    fn supports_ordered_aggregate(&self) -> bool {
        false
    }

    fn supports_materialized_cte(&self) -> bool {
        false
    }

    fn json_value(&self, expr: SqlExpr, is_json: bool) -> SqlExpr {
        if is_json {
            func("json", vec![expr])
        } else {
            expr
        }
    }

    fn json_aggregate_non_null(
        &self,
        expr: SqlExpr,
        order_by: Vec<OrderByItem>,
    ) -> Result<SqlExpr, EngineError> {
        if !order_by.is_empty() {
            return Err(errors::unsupported_driver_error(
                "sqlite",
                "ordered json aggregate",
            ));
        }
        let aggregate = FunctionCall::new("json_group_array", vec![expr.clone()])
            .filter(expr.clone().is_not_null())
            .into_expr();
        Ok(case_when(
            func("COUNT", vec![expr]).eq(int_lit(0)),
            null(),
            Some(aggregate),
        ))
    }

    fn single_value_json_array(&self, expr: SqlExpr, is_json: bool) -> SqlExpr {
        case_when(
            expr.clone().is_null(),
            null(),
            Some(func("json_array", vec![self.json_value(expr, is_json)])),
        )
    }

    fn build_link_json_object(&self, id: SqlExpr, title: SqlExpr, raw_title: SqlExpr) -> SqlExpr {
        case_when(
            raw_title.is_null(),
            func("json_object", vec![text_lit("id"), id.clone()]),
            Some(func(
                "json_object",
                vec![text_lit("id"), id, text_lit("title"), title],
            )),
        )
    }

    fn rollup_aggregate(
        &self,
        function: RollupFunction,
        value: SqlExpr,
        options: &RollupAggregateOptions,
    ) -> Result<SqlExpr, EngineError> {
        Ok(match function {
            RollupFunction::Sum => coalesce_zero(func("SUM", vec![value.cast("REAL")])),
            RollupFunction::Count => func("COUNT", vec![value]),
            RollupFunction::CountA => func(
                "COUNT",
                vec![case_when(non_empty(value, "TEXT"), int_lit(1), None)],
            ),
            RollupFunction::CountAll => func(
                "COUNT",
                vec![options.row_presence.clone().unwrap_or(SqlExpr::Star)],
            ),
            RollupFunction::Average => func("AVG", vec![value.cast("REAL")]),
            RollupFunction::Min => func("MIN", vec![value]),
            RollupFunction::Max => func("MAX", vec![value]),
            RollupFunction::And => func("MIN", vec![Self::truth_flag(value)]),
            RollupFunction::Or => func("MAX", vec![Self::truth_flag(value)]),
            RollupFunction::Xor => func("SUM", vec![Self::truth_flag(value)])
                .binary(BinaryOp::Modulo, int_lit(2))
                .eq(int_lit(1)),
            RollupFunction::ArrayJoin
            | RollupFunction::Concatenate
            | RollupFunction::ArrayUnique
            | RollupFunction::ArrayCompact => {
                return Err(errors::unsupported_driver_error(
                    "sqlite",
                    &format!("ordered rollup aggregate `{}`", function.name()),
                ))
            }
        })
    }

    fn single_value_rollup_aggregate(
        &self,
        function: RollupFunction,
        value: SqlExpr,
        options: &RollupAggregateOptions,
    ) -> Result<SqlExpr, EngineError> {
        Ok(match function {
            RollupFunction::Sum => coalesce_zero(value.cast("REAL")),
            RollupFunction::Count => zero_or_one(value.is_not_null()),
            RollupFunction::CountA => zero_or_one(non_empty(value, "TEXT")),
            RollupFunction::CountAll => zero_or_one(
                options
                    .row_presence
                    .clone()
                    .unwrap_or(value)
                    .is_not_null(),
            ),
            RollupFunction::Average => value.cast("REAL"),
            RollupFunction::Min | RollupFunction::Max => value,
            RollupFunction::And | RollupFunction::Or | RollupFunction::Xor => {
                Self::truth_flag(value)
            }
            RollupFunction::ArrayJoin | RollupFunction::Concatenate => value.cast("TEXT"),
            RollupFunction::ArrayUnique => {
                self.single_value_json_array(value, options.target_is_json())
            }
            RollupFunction::ArrayCompact => case_when(
                non_empty(value.clone(), "TEXT"),
                func(
                    "json_array",
                    vec![self.json_value(value, options.target_is_json())],
                ),
                Some(null()),
            ),
        })
    }

    fn build_deterministic_lookup_aggregate(
        &self,
        request: DeterministicAggregate,
    ) -> Result<SqlExpr, EngineError> {
        let value = col(ROWS_ALIAS, VALUE_ALIAS);
        let element = self.json_value(value.clone(), request.value_is_json);
        let projection = match request.shape {
            DeterministicShape::Lookup
            | DeterministicShape::Rollup(RollupFunction::ArrayUnique)
            | DeterministicShape::Rollup(RollupFunction::ArrayCompact) => {
                Self::json_array_or_null(element)
            }
            DeterministicShape::Rollup(RollupFunction::ArrayJoin) => {
                func("group_concat", vec![value, text_lit(ARRAY_JOIN_SEPARATOR)])
            }
            DeterministicShape::Rollup(RollupFunction::Concatenate) => {
                func("group_concat", vec![value, text_lit("")])
            }
            DeterministicShape::Rollup(function) => {
                self.rollup_aggregate(function, value, &RollupAggregateOptions::default())?
            }
        };

        let rows = Self::ordered_rows_select(&request);
        let outer =
            Select::from(TableFactor::derived(rows, ROWS_ALIAS)).project(projection, VALUE_ALIAS);
        Ok(SqlExpr::Subquery(Box::new(outer)))
    }

    fn flatten_lookup_cte_value(&self, expr: SqlExpr) -> SqlExpr {
        func("json_extract", vec![expr, text_lit("$[0]")])
    }

    fn build_user_json_object_by_id(&self, id: SqlExpr, user_table: &str) -> SqlExpr {
        let object = func(
            "json_object",
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
        left.cast("REAL").binary(
            BinaryOp::Divide,
            func("NULLIF", vec![right, int_lit(0)]),
        )
    }

    fn modulo(&self, left: SqlExpr, right: SqlExpr) -> SqlExpr {
        left.binary(BinaryOp::Modulo, func("NULLIF", vec![right, int_lit(0)]))
    }

    fn round(&self, value: SqlExpr, digits: SqlExpr) -> SqlExpr {
        func("ROUND", vec![value, digits.cast("INTEGER")])
    }

    fn ceiling(&self, value: SqlExpr) -> SqlExpr {
        // CAST truncates toward zero; step up for positive fractions.
        let truncated = value.clone().cast("INTEGER");
        truncated.clone().binary(
            BinaryOp::Plus,
            Self::truth_flag(value.binary(BinaryOp::Gt, truncated)),
        )
    }

    fn floor(&self, value: SqlExpr) -> SqlExpr {
        let truncated = value.clone().cast("INTEGER");
        truncated.clone().binary(
            BinaryOp::Minus,
            Self::truth_flag(value.binary(BinaryOp::Lt, truncated)),
        )
    }

    fn greatest(&self, args: Vec<SqlExpr>) -> SqlExpr {
        scalar_extreme("MAX", args)
    }

    fn least(&self, args: Vec<SqlExpr>) -> SqlExpr {
        scalar_extreme("MIN", args)
    }
}

/// SQLite's multi-argument MIN/MAX; a single argument would be the aggregate.
fn scalar_extreme(name: &'static str, mut args: Vec<SqlExpr>) -> SqlExpr {
    if args.len() == 1 {
        return args.remove(0);
    }
    func(name, args)
}
