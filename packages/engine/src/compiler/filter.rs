//! Filter predicates of lookups, rollups and conditional fields.
//!
//! Conditions read the stored column of the foreign field; host references
//! read the stored column of the host record.

use crate::compiler::context::QueryContext;
use crate::domain::{
    Conjunction, FilterCondition, FilterItem, FilterOperator, FilterSet, FilterValue,
};
use crate::errors;
use crate::sql::ast::{
    and_all, col, func, or_all, param, text_lit, BinaryOp, Literal, SqlExpr,
};
use crate::{EngineError, Value};

/// Compiles `filter` against `foreign_alias` rows. `host_alias` qualifies
/// host-field references. Empty filters compile to `None`.
pub(crate) fn compile_filter(
    ctx: &QueryContext<'_>,
    filter: &FilterSet,
    foreign_alias: &str,
    host_alias: &str,
) -> Result<Option<SqlExpr>, EngineError> {
    let mut parts = Vec::new();
    for item in &filter.items {
        let compiled = match item {
            FilterItem::Condition(condition) => {
                Some(compile_condition(ctx, condition, foreign_alias, host_alias)?)
            }
            FilterItem::Group(group) => compile_filter(ctx, group, foreign_alias, host_alias)?,
        };
        parts.extend(compiled);
    }
    let combined = match filter.conjunction {
        Conjunction::And => and_all(parts),
        Conjunction::Or => or_all(parts),
    };
    Ok(combined.map(|expr| SqlExpr::Nested(Box::new(expr))))
}

pub(crate) fn compile_condition(
    ctx: &QueryContext<'_>,
    condition: &FilterCondition,
    foreign_alias: &str,
    host_alias: &str,
) -> Result<SqlExpr, EngineError> {
    let field = ctx
        .domain
        .field(&condition.field_id)
        .ok_or_else(|| errors::missing_field_error(&condition.field_id, "filter field"))?;
    let text = ctx.dialect.text_type();
    let left = col(foreign_alias, field.physical_column());
    let lowered = |expr: SqlExpr| func("LOWER", vec![expr.cast(text)]);

    match condition.operator {
        FilterOperator::IsEmpty => return Ok(empty_predicate(left, text)),
        FilterOperator::IsNotEmpty => return Ok(empty_predicate(left, text).not()),
        _ => {}
    }

    let right = match &condition.value {
        Some(value) => value,
        None => {
            return Err(errors::invalid_field_definition_error(
                &condition.field_id,
                "filter condition is missing its value",
            ))
        }
    };

    if let FilterValue::Literal { value } = right {
        if value.is_null() {
            // Comparing against nothing matches empty cells.
            let empty = left.clone().is_null();
            return Ok(match condition.operator {
                FilterOperator::IsNot | FilterOperator::DoesNotContain => empty.not(),
                _ => empty,
            });
        }
    }

    let operand = match right {
        FilterValue::Literal { value } => literal_operand(value),
        FilterValue::HostField { field_id } => {
            let host = ctx
                .domain
                .field(field_id)
                .ok_or_else(|| errors::missing_field_error(field_id, "filter host reference"))?;
            vec![col(host_alias, host.physical_column())]
        }
    };

    let first = operand
        .first()
        .cloned()
        .unwrap_or(SqlExpr::Literal(Literal::Null));
    Ok(match condition.operator {
        FilterOperator::Is => left.eq(first),
        FilterOperator::IsNot => left
            .clone()
            .binary(BinaryOp::NotEq, first)
            .or(left.is_null()),
        FilterOperator::Greater => left.binary(BinaryOp::Gt, first),
        FilterOperator::GreaterEqual => left.binary(BinaryOp::GtEq, first),
        FilterOperator::Less => left.binary(BinaryOp::Lt, first),
        FilterOperator::LessEqual => left.binary(BinaryOp::LtEq, first),
        FilterOperator::Contains => {
            lowered(left).binary(BinaryOp::Like, like_pattern(right, first, text))
        }
        FilterOperator::DoesNotContain => lowered(left.clone())
            .binary(BinaryOp::NotLike, like_pattern(right, first, text))
            .or(left.is_null()),
        FilterOperator::IsAnyOf => left.in_list(operand),
        FilterOperator::IsEmpty => empty_predicate(left, text),
        FilterOperator::IsNotEmpty => empty_predicate(left, text).not(),
    })
}

fn empty_predicate(value: SqlExpr, text: &'static str) -> SqlExpr {
    value
        .clone()
        .is_null()
        .or(value.cast(text).eq(text_lit("")))
}

/// `%needle%`, lower-cased. Literal needles are bound as one parameter.
fn like_pattern(value: &FilterValue, operand: SqlExpr, text: &'static str) -> SqlExpr {
    match value {
        FilterValue::Literal { value } => {
            let needle = match value {
                serde_json::Value::String(needle) => needle.clone(),
                other => other.to_string(),
            };
            param(format!("%{}%", needle.to_lowercase()))
        }
        FilterValue::HostField { .. } => text_lit("%")
            .binary(
                BinaryOp::Concat,
                func("LOWER", vec![operand.cast(text)]),
            )
            .binary(BinaryOp::Concat, text_lit("%")),
    }
}

fn literal_operand(value: &serde_json::Value) -> Vec<SqlExpr> {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| SqlExpr::Param(json_to_value(item)))
            .collect(),
        serde_json::Value::Bool(flag) => vec![SqlExpr::Literal(Literal::Bool(*flag))],
        other => vec![SqlExpr::Param(json_to_value(other))],
    }
}

pub(crate) fn json_to_value(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(flag) => Value::Integer(i64::from(*flag)),
        serde_json::Value::Number(number) => match number.as_i64() {
            Some(integer) => Value::Integer(integer),
            None => Value::Real(number.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(text) => Value::Text(text.clone()),
        other => Value::Text(other.to_string()),
    }
}
