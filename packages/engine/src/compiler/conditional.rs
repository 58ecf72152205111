//! Conditional lookups and rollups join the foreign table through a filter
//! against the host record rather than through a link.
//!
//! Filters made of host/foreign equalities compile to a keyed CTE that
//! aggregates once per distinct key and is joined back on those keys.
//! Everything else compiles to a correlated subquery per host row.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::compiler::context::{derived_name, CteEntry, QueryContext, ROOT_ALIAS};
use crate::compiler::cte::{push_joins, resolve_foreign_value};
use crate::compiler::filter::compile_filter;
use crate::dialect::{
    DeterministicAggregate, DeterministicShape, Dialect, RollupAggregateOptions,
};
use crate::domain::{
    parse_rollup_expression, ConditionalOptions, Conjunction, Field, FieldKind, FilterItem,
    FilterOperator, FilterSet, FilterValue, RollupFunction, SortDirection, StorageType, Table,
    TableDomain, AUTO_NUMBER_COLUMN,
};
use crate::sql::ast::{
    and_all, col, func, int_lit, BinaryOp, FunctionCall, Join, OrderByItem, Select, SqlExpr,
    TableFactor, WindowSpec,
};
use crate::EngineError;

const EQUALITY_FOREIGN_ALIAS: &str = "f";
const EQUALITY_ROWS_ALIAS: &str = "r";
const VALUE_COLUMN: &str = "value";
const ROW_VALUE: &str = "v";
const ROW_ORDER: &str = "o";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Aggregation {
    Lookup,
    Rollup(RollupFunction),
}

impl Aggregation {
    fn is_ordered(self) -> bool {
        match self {
            Self::Lookup => true,
            Self::Rollup(function) => function.is_order_sensitive(),
        }
    }

    fn zero_when_empty(self) -> bool {
        matches!(self, Self::Rollup(function) if function.zero_when_empty())
    }

    fn deterministic_shape(self) -> DeterministicShape {
        match self {
            Self::Lookup => DeterministicShape::Lookup,
            Self::Rollup(function) => DeterministicShape::Rollup(function),
        }
    }
}

struct ConditionalSource<'d> {
    options: &'d ConditionalOptions,
    foreign: &'d Table,
    target: &'d Field,
    sort_field: Option<&'d Field>,
    aggregation: Aggregation,
}

impl ConditionalSource<'_> {
    fn is_windowed(&self) -> bool {
        self.sort_field.is_some() || self.options.limit.is_some()
    }

    /// Sort field (NULLs last) then insertion order.
    fn row_order(&self, alias: &str) -> Vec<OrderByItem> {
        let mut order_by = Vec::new();
        if let (Some(sort_field), Some(sort)) = (self.sort_field, &self.options.sort) {
            let value = col(alias, sort_field.physical_column());
            let item = match sort.direction {
                SortDirection::Asc => OrderByItem::asc(value),
                SortDirection::Desc => OrderByItem::desc(value),
            };
            order_by.push(item.nulls_last());
        }
        order_by.push(OrderByItem::asc(col(alias, AUTO_NUMBER_COLUMN)));
        order_by
    }

    fn limit(&self) -> Option<SqlExpr> {
        self.options
            .limit
            .map(|limit| int_lit(i64::try_from(limit).unwrap_or(i64::MAX)))
    }
}

/// Compiles a conditional field read by the root query and records its
/// value expression on the context.
pub(crate) fn prepare_conditional(
    ctx: &mut QueryContext<'_>,
    field: &Field,
) -> Result<(), EngineError> {
    if ctx.inline_value(&field.id).is_some() {
        return Ok(());
    }
    let domain = ctx.domain;
    let dialect = ctx.dialect;
    let Some(source) = conditional_source(domain, field) else {
        ctx.set_inline_value(&field.id, dialect.typed_null(degraded_storage(field)));
        return Ok(());
    };
    if !ctx.enter(&field.id) {
        ctx.set_inline_value(&field.id, dialect.typed_null(degraded_storage(field)));
        return Ok(());
    }

    let keys = source
        .options
        .filter
        .as_ref()
        .and_then(|filter| equality_keys(domain, filter));
    let plan = match keys {
        Some(keys) if !source.aggregation.is_ordered() || dialect.supports_ordered_aggregate() => {
            debug!(
                field_id = %field.id,
                keys = keys.0.len(),
                "conditional field uses equality plan"
            );
            equality_value(ctx, field, &source, keys)
        }
        Some(_) => {
            warn!(
                field_id = %field.id,
                dialect = dialect.kind().as_str(),
                "ordered equality plan unavailable; falling back to correlated subquery"
            );
            correlated_expr(ctx, &source, ROOT_ALIAS)
        }
        None => correlated_expr(ctx, &source, ROOT_ALIAS),
    };
    ctx.exit();
    let value = plan?;
    ctx.set_inline_value(&field.id, value);
    Ok(())
}

/// Per-row subquery valuing `field` for the row aliased `host_alias`.
pub(crate) fn correlated_value(
    ctx: &mut QueryContext<'_>,
    field: &Field,
    host_alias: &str,
) -> Result<SqlExpr, EngineError> {
    let domain = ctx.domain;
    let dialect = ctx.dialect;
    let Some(source) = conditional_source(domain, field) else {
        return Ok(dialect.typed_null(degraded_storage(field)));
    };
    if !ctx.enter(&field.id) {
        return Ok(dialect.typed_null(degraded_storage(field)));
    }
    let value = correlated_expr(ctx, &source, host_alias);
    ctx.exit();
    value
}

/// Conditional lookups carry JSON arrays until the select flattens them.
fn degraded_storage(field: &Field) -> StorageType {
    match field.kind {
        FieldKind::ConditionalLookup(_) => StorageType::Json,
        _ => field.storage_type,
    }
}

fn conditional_source<'d>(
    domain: &'d TableDomain,
    field: &'d Field,
) -> Option<ConditionalSource<'d>> {
    let (options, is_rollup) = match &field.kind {
        FieldKind::ConditionalLookup(options) => (options, false),
        FieldKind::ConditionalRollup(options) => (options, true),
        _ => return None,
    };
    if field.has_error {
        warn!(field_id = %field.id, "field is erroring; resolving to NULL");
        return None;
    }
    let Some(foreign) = domain.table(&options.foreign_table_id) else {
        warn!(
            field_id = %field.id,
            foreign_table_id = %options.foreign_table_id,
            "foreign table is missing; resolving to NULL"
        );
        return None;
    };
    let in_foreign = |field_id: &str| {
        domain
            .field(field_id)
            .filter(|candidate| candidate.table_id == foreign.id)
    };
    let Some(target) = in_foreign(&options.lookup_field_id) else {
        warn!(
            field_id = %field.id,
            target_id = %options.lookup_field_id,
            "target field is missing; resolving to NULL"
        );
        return None;
    };
    let sort_field = match &options.sort {
        Some(sort) => match in_foreign(&sort.field_id) {
            Some(sort_field) => Some(sort_field),
            None => {
                warn!(
                    field_id = %field.id,
                    sort_field_id = %sort.field_id,
                    "sort field is missing"
                );
                return None;
            }
        },
        None => None,
    };
    let aggregation = if is_rollup {
        let expression = options.expression.as_deref().unwrap_or_default();
        let Some(function) = parse_rollup_expression(expression) else {
            warn!(
                field_id = %field.id,
                expression,
                "rollup expression is invalid; resolving to NULL"
            );
            return None;
        };
        Aggregation::Rollup(function)
    } else {
        Aggregation::Lookup
    };
    Some(ConditionalSource {
        options,
        foreign,
        target,
        sort_field,
        aggregation,
    })
}

type EqualityKeys<'d> = (Vec<(&'d Field, &'d Field)>, FilterSet);

/// Splits an AND filter into `foreign = host` key pairs and the residual
/// conditions. The residual must not read the host record, since the keyed
/// CTE is computed without one.
fn equality_keys<'d>(domain: &'d TableDomain, filter: &FilterSet) -> Option<EqualityKeys<'d>> {
    if filter.conjunction != Conjunction::And {
        return None;
    }
    let mut keys = Vec::new();
    let mut residual = Vec::new();
    for item in &filter.items {
        if let FilterItem::Condition(condition) = item {
            if let (FilterOperator::Is, Some(FilterValue::HostField { field_id })) =
                (condition.operator, &condition.value)
            {
                let foreign = domain.field(&condition.field_id)?;
                let host = domain.field(field_id)?;
                if !foreign.is_multiple && !host.is_multiple {
                    keys.push((foreign, host));
                    continue;
                }
            }
        }
        residual.push(item.clone());
    }
    let residual = FilterSet::all(residual);
    if keys.is_empty() || !residual.host_field_ids().is_empty() {
        return None;
    }
    Some((keys, residual))
}

/// `SELECT r.k0.., agg(r.v) AS value FROM (foreign rows) r GROUP BY r.k0..`,
/// joined to the root on the host key columns.
fn equality_value(
    ctx: &mut QueryContext<'_>,
    field: &Field,
    source: &ConditionalSource<'_>,
    (keys, residual): EqualityKeys<'_>,
) -> Result<SqlExpr, EngineError> {
    let dialect = ctx.dialect;
    let alias = EQUALITY_FOREIGN_ALIAS;
    let value = resolve_foreign_value(ctx, source.target, alias)?;

    let mut rows = Select::from(TableFactor::table(source.foreign.db_table_name.as_str(), alias));
    push_joins(&mut rows.joins, value.joins);
    let mut key_columns = Vec::with_capacity(keys.len());
    let mut host_columns = Vec::with_capacity(keys.len());
    for (idx, (foreign_key, host_key)) in keys.iter().enumerate() {
        let key_column = format!("k{idx}");
        rows = rows.project(col(alias, foreign_key.physical_column()), key_column.as_str());
        key_columns.push(key_column);
        host_columns.push(host_key.physical_column().to_string());
    }
    rows = rows.project(value.expr, ROW_VALUE);
    let order = if source.is_windowed() {
        let partition_by = keys
            .iter()
            .map(|(foreign_key, _)| col(alias, foreign_key.physical_column()))
            .collect();
        row_number(partition_by, source.row_order(alias))
    } else {
        col(alias, AUTO_NUMBER_COLUMN)
    };
    rows = rows.project(order, ROW_ORDER);
    if let Some(condition) = compile_filter(ctx, &residual, alias, ROOT_ALIAS)? {
        rows = rows.filter(condition);
    }

    let mut grouped = Select::from(TableFactor::derived(rows, EQUALITY_ROWS_ALIAS));
    for key_column in &key_columns {
        grouped = grouped.project(
            col(EQUALITY_ROWS_ALIAS, key_column.as_str()),
            key_column.as_str(),
        );
    }
    let aggregate = aggregate(
        dialect,
        source,
        col(EQUALITY_ROWS_ALIAS, ROW_VALUE),
        value.is_json,
        vec![OrderByItem::asc(col(EQUALITY_ROWS_ALIAS, ROW_ORDER))],
    )?;
    grouped = grouped.project(aggregate, VALUE_COLUMN);
    if let Some(limit) = source.limit() {
        grouped =
            grouped.filter(col(EQUALITY_ROWS_ALIAS, ROW_ORDER).binary(BinaryOp::LtEq, limit));
    }
    grouped.group_by = key_columns
        .iter()
        .map(|key_column| col(EQUALITY_ROWS_ALIAS, key_column.as_str()))
        .collect();

    let scope = ctx.root_scope();
    let name = derived_name("cte_cond", &[scope.table_id.as_str(), field.id.as_str()]);
    let on = and_all(
        key_columns
            .iter()
            .zip(&host_columns)
            .map(|(key, host)| {
                col(name.as_str(), key.as_str()).eq(col(ROOT_ALIAS, host.as_str()))
            }),
    )
    .unwrap_or_else(|| int_lit(1).eq(int_lit(1)));
    ctx.register(
        CteEntry {
            name: name.clone(),
            scope: scope.clone(),
            source_field_id: field.id.clone(),
            joined: false,
            columns: BTreeMap::from([(field.id.clone(), VALUE_COLUMN.to_string())]),
        },
        grouped,
    );
    ctx.join_root(
        &scope,
        &field.id,
        Join::left(
            TableFactor::Table {
                name: name.as_str().into(),
                alias: None,
            },
            on,
        ),
    );

    let value = col(name.as_str(), VALUE_COLUMN);
    Ok(if source.aggregation.zero_when_empty() {
        func("COALESCE", vec![value, int_lit(0)])
    } else {
        value
    })
}

/// `(SELECT agg(w.v ORDER BY w.o) FROM (filtered foreign rows) w)`.
/// Sorted or limited fields number their rows with a window first.
fn correlated_expr(
    ctx: &mut QueryContext<'_>,
    source: &ConditionalSource<'_>,
    host_alias: &str,
) -> Result<SqlExpr, EngineError> {
    let dialect = ctx.dialect;
    let alias = format!("{host_alias}_c");
    let wrapper = format!("{alias}_w");
    let value = resolve_foreign_value(ctx, source.target, &alias)?;

    let mut rows = Select::from(TableFactor::table(
        source.foreign.db_table_name.as_str(),
        alias.as_str(),
    ));
    push_joins(&mut rows.joins, value.joins);
    rows = rows.project(value.expr, ROW_VALUE);
    if source.is_windowed() {
        let order_by = source.row_order(&alias);
        rows = rows.project(row_number(Vec::new(), order_by.clone()), ROW_ORDER);
        rows.order_by = order_by;
        rows.limit = source.limit();
    } else {
        rows = rows.project(col(alias.as_str(), AUTO_NUMBER_COLUMN), ROW_ORDER);
    }
    if let Some(filter) = &source.options.filter {
        if let Some(condition) = compile_filter(ctx, filter, &alias, host_alias)? {
            rows = rows.filter(condition);
        }
    }

    let row_value = col(wrapper.as_str(), ROW_VALUE);
    let row_order = vec![OrderByItem::asc(col(wrapper.as_str(), ROW_ORDER))];
    if source.aggregation.is_ordered() && !dialect.supports_ordered_aggregate() {
        let mut ordered = Select::from(TableFactor::derived(rows, wrapper.as_str()));
        ordered.order_by = row_order;
        return dialect.build_deterministic_lookup_aggregate(DeterministicAggregate {
            rows: ordered,
            value: row_value,
            value_is_json: value.is_json,
            shape: source.aggregation.deterministic_shape(),
        });
    }
    let aggregate = aggregate(dialect, source, row_value, value.is_json, row_order)?;
    let outer =
        Select::from(TableFactor::derived(rows, wrapper.as_str())).project(aggregate, VALUE_COLUMN);
    Ok(SqlExpr::Subquery(Box::new(outer)))
}

fn aggregate(
    dialect: &dyn Dialect,
    source: &ConditionalSource<'_>,
    value: SqlExpr,
    value_is_json: bool,
    order_by: Vec<OrderByItem>,
) -> Result<SqlExpr, EngineError> {
    match source.aggregation {
        Aggregation::Lookup => {
            dialect.json_aggregate_non_null(dialect.json_value(value, value_is_json), order_by)
        }
        Aggregation::Rollup(function) => {
            let options = RollupAggregateOptions {
                target_storage: Some(if value_is_json {
                    StorageType::Json
                } else {
                    source.target.storage_type
                }),
                order_by: if function.is_order_sensitive() {
                    order_by
                } else {
                    Vec::new()
                },
                row_presence: None,
            };
            dialect.rollup_aggregate(function, value, &options)
        }
    }
}

fn row_number(partition_by: Vec<SqlExpr>, order_by: Vec<OrderByItem>) -> SqlExpr {
    FunctionCall::new("ROW_NUMBER", Vec::new())
        .over(WindowSpec {
            partition_by,
            order_by,
        })
        .into_expr()
}
