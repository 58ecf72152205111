//! Link CTEs.
//!
//! One CTE per (table scope, link field) carries a row per host record with
//! the link value and a column for every lookup and rollup joining through
//! that link, so a single join materializes the whole relationship.
//!
//! Broken references never abort the query: the affected column becomes a
//! typed NULL and a warning is logged.

use std::collections::BTreeMap;

use tracing::warn;

use crate::compiler::conditional;
use crate::compiler::context::{
    derived_name, CteEntry, NestedMode, QueryContext, TableScope,
};
use crate::compiler::filter::compile_filter;
use crate::compiler::formula::FormulaCompiler;
use crate::dialect::{
    DeterministicAggregate, DeterministicShape, Dialect, RollupAggregateOptions,
};
use crate::domain::{
    parse_rollup_expression, Field, FieldKind, FilterSet, LinkJoin, LinkOptions, RollupFunction,
    StorageType, Table, ID_COLUMN, JUNCTION_ID_COLUMN,
};
use crate::sql::ast::{case_when, col, int_lit, Join, OrderByItem, Select, SqlExpr, TableFactor};
use crate::EngineError;

pub(crate) const HOST_ALIAS: &str = "h";
pub(crate) const FOREIGN_ALIAS: &str = "f";
pub(crate) const JUNCTION_ALIAS: &str = "j";
const GATE_ALIAS: &str = "ff";
pub(crate) const LINK_VALUE_COLUMN: &str = "link_value";

/// A foreign field's value as seen from a row aliased `alias`, plus the
/// joins the expression needs.
#[derive(Debug, Clone)]
pub(crate) struct ForeignValue {
    pub expr: SqlExpr,
    pub joins: Vec<Join>,
    pub is_json: bool,
}

impl ForeignValue {
    fn typed_null(dialect: &dyn Dialect, storage: StorageType) -> Self {
        Self {
            expr: dialect.typed_null(storage),
            joins: Vec::new(),
            is_json: storage.is_json(),
        }
    }
}

/// What a CTE column folds the joined foreign rows into.
#[derive(Debug, Clone, Copy)]
enum ColumnKind {
    LinkObject,
    Lookup,
    Rollup {
        function: RollupFunction,
        target_storage: StorageType,
    },
}

impl ColumnKind {
    fn is_ordered(self) -> bool {
        match self {
            Self::LinkObject | Self::Lookup => true,
            Self::Rollup { function, .. } => function.is_order_sensitive(),
        }
    }
}

/// Join geometry shared by every column of one link CTE.
struct LinkShape<'s> {
    single: bool,
    join: &'s LinkJoin,
    foreign_table: &'s str,
    order_by: Vec<OrderByItem>,
}

/// Returns the CTE of `link_field_id` in `scope`, compiling it on first use.
/// `None` means the link cannot be materialized here and readers fall back
/// to typed NULLs.
pub(crate) fn ensure_link_cte(
    ctx: &mut QueryContext<'_>,
    scope: &TableScope,
    link_field_id: &str,
) -> Result<Option<String>, EngineError> {
    if let Some(entry) = ctx.entry(scope, link_field_id) {
        return Ok(Some(entry.name.clone()));
    }
    let domain = ctx.domain;

    let Some(link) = domain.field(link_field_id) else {
        warn!(link_field_id, "link field is missing; dependents resolve to NULL");
        return Ok(None);
    };
    let Some(options) = link.link_options() else {
        warn!(link_field_id, kind = link.kind.name(), "field is not a link");
        return Ok(None);
    };
    if link.has_error {
        warn!(link_field_id, "link field is erroring; dependents resolve to NULL");
        return Ok(None);
    }
    let (Some(host), Some(foreign)) = (
        domain.table(&link.table_id),
        domain.table(&options.foreign_table_id),
    ) else {
        warn!(
            link_field_id,
            foreign_table_id = %options.foreign_table_id,
            "link table is missing; dependents resolve to NULL"
        );
        return Ok(None);
    };
    let join = match domain.link_join(link) {
        Ok(join) => join,
        Err(error) => {
            warn!(link_field_id, %error, "link join cannot be resolved");
            return Ok(None);
        }
    };

    if !ctx.enter(link_field_id) {
        warn!(
            link_field_id,
            "link is already being compiled; nested reference resolves to NULL"
        );
        return Ok(None);
    }
    let built = build_link_cte(ctx, scope, link, options, host, foreign, &join);
    ctx.exit();
    let (select, columns) = built?;

    let prefix = if scope.restricted { "cte_rows" } else { "cte" };
    let name = derived_name(prefix, &[scope.table_id.as_str(), link_field_id]);
    ctx.register(
        CteEntry {
            name: name.clone(),
            scope: scope.clone(),
            source_field_id: link_field_id.to_string(),
            joined: false,
            columns,
        },
        select,
    );
    Ok(Some(name))
}

fn build_link_cte(
    ctx: &mut QueryContext<'_>,
    scope: &TableScope,
    link: &Field,
    options: &LinkOptions,
    host: &Table,
    foreign: &Table,
    join: &LinkJoin,
) -> Result<(Select, BTreeMap<String, String>), EngineError> {
    let domain = ctx.domain;
    let dialect = ctx.dialect;
    let shape = LinkShape {
        single: options.relationship.is_single_value(),
        join,
        foreign_table: &foreign.db_table_name,
        order_by: link_order(options, join),
    };

    let mut select = Select::from(TableFactor::table(host.db_table_name.as_str(), HOST_ALIAS))
        .project(col(HOST_ALIAS, ID_COLUMN), ID_COLUMN);
    select.joins = link_joins(join, &foreign.db_table_name);
    let mut value_joins = Vec::new();
    let mut columns = BTreeMap::new();

    let title = match domain.field(&options.lookup_field_id) {
        Some(field) if field.table_id == foreign.id => {
            resolve_foreign_value(ctx, field, FOREIGN_ALIAS)?
        }
        _ => {
            warn!(
                link_field_id = %link.id,
                title_field_id = %options.lookup_field_id,
                "link title field is missing"
            );
            ForeignValue::typed_null(dialect, StorageType::Text)
        }
    };
    let object = ForeignValue {
        expr: dialect.build_link_json_object(
            col(FOREIGN_ALIAS, ID_COLUMN),
            title.expr.clone().cast(dialect.text_type()),
            title.expr,
        ),
        joins: title.joins,
        is_json: true,
    };
    let link_value = link_column(
        dialect,
        &shape,
        object,
        None,
        ColumnKind::LinkObject,
        &mut value_joins,
    )?;
    select = select.project(link_value, LINK_VALUE_COLUMN);
    columns.insert(link.id.clone(), LINK_VALUE_COLUMN.to_string());

    for dependent in domain.fields(&link.table_id) {
        let (prefix, target_id, filter, expression) = match &dependent.kind {
            FieldKind::Lookup(lookup) if lookup.link_field_id == link.id => {
                ("lookup", &lookup.lookup_field_id, lookup.filter.as_ref(), None)
            }
            FieldKind::Rollup(rollup) if rollup.link_field_id == link.id => (
                "rollup",
                &rollup.lookup_field_id,
                rollup.filter.as_ref(),
                Some(rollup.expression.as_str()),
            ),
            _ => continue,
        };
        let column = derived_name(prefix, &[dependent.id.as_str()]);
        let expr = dependent_column(
            ctx,
            &shape,
            dependent,
            target_id,
            &foreign.id,
            filter,
            expression,
            &mut value_joins,
        )?;
        select = select.project(expr, column.as_str());
        columns.insert(dependent.id.clone(), column);
    }

    push_joins(&mut select.joins, value_joins);
    if scope.restricted {
        if let Some(filter) = ctx.record_filter(col(HOST_ALIAS, ID_COLUMN)) {
            select = select.filter(filter);
        }
    }
    if !shape.single {
        select.group_by = vec![col(HOST_ALIAS, ID_COLUMN)];
    }
    Ok((select, columns))
}

/// Column of one lookup or rollup inside its link's CTE.
#[allow(clippy::too_many_arguments)]
fn dependent_column(
    ctx: &mut QueryContext<'_>,
    shape: &LinkShape<'_>,
    dependent: &Field,
    target_id: &str,
    foreign_table_id: &str,
    filter: Option<&FilterSet>,
    expression: Option<&str>,
    value_joins: &mut Vec<Join>,
) -> Result<SqlExpr, EngineError> {
    let domain = ctx.domain;
    let dialect = ctx.dialect;
    // Lookup columns are JSON arrays regardless of the field's storage.
    let degraded_storage = if expression.is_some() {
        dependent.storage_type
    } else {
        StorageType::Json
    };
    if dependent.has_error {
        warn!(field_id = %dependent.id, "field is erroring; resolving to NULL");
        return Ok(dialect.typed_null(degraded_storage));
    }
    let Some(target) = domain
        .field(target_id)
        .filter(|target| target.table_id == foreign_table_id)
    else {
        warn!(field_id = %dependent.id, target_id, "target field is missing; resolving to NULL");
        return Ok(dialect.typed_null(degraded_storage));
    };
    let kind = match expression {
        None => ColumnKind::Lookup,
        Some(expression) => match parse_rollup_expression(expression) {
            Some(function) => ColumnKind::Rollup {
                function,
                target_storage: target.storage_type,
            },
            None => {
                warn!(
                    field_id = %dependent.id,
                    expression,
                    "rollup expression is invalid; resolving to NULL"
                );
                return Ok(dialect.typed_null(degraded_storage));
            }
        },
    };

    let value = resolve_foreign_value(ctx, target, FOREIGN_ALIAS)?;
    let gate = match filter {
        Some(filter) => filter_gate(ctx, filter, shape.foreign_table)?,
        None => None,
    };
    link_column(dialect, shape, value, gate, kind, value_joins)
}

/// Folds the joined foreign rows of one host record into a column value.
fn link_column(
    dialect: &dyn Dialect,
    shape: &LinkShape<'_>,
    value: ForeignValue,
    gate: Option<SqlExpr>,
    kind: ColumnKind,
    value_joins: &mut Vec<Join>,
) -> Result<SqlExpr, EngineError> {
    let presence = col(FOREIGN_ALIAS, ID_COLUMN).is_not_null();
    let condition = match &gate {
        Some(gate) => presence.and(gate.clone()),
        None => presence,
    };
    let row_presence = case_when(condition.clone(), col(FOREIGN_ALIAS, ID_COLUMN), None);

    if !shape.single && kind.is_ordered() && !dialect.supports_ordered_aggregate() {
        let mut rows = correlated_rows(shape.join, shape.foreign_table);
        push_joins(&mut rows.joins, value.joins);
        if let Some(gate) = gate {
            rows = rows.filter(gate);
        }
        rows.order_by = shape.order_by.clone();
        let deterministic_shape = match kind {
            ColumnKind::LinkObject | ColumnKind::Lookup => DeterministicShape::Lookup,
            ColumnKind::Rollup { function, .. } => DeterministicShape::Rollup(function),
        };
        return dialect.build_deterministic_lookup_aggregate(DeterministicAggregate {
            rows,
            value: value.expr,
            value_is_json: value.is_json,
            shape: deterministic_shape,
        });
    }

    push_joins(value_joins, value.joins);
    let gated = case_when(condition, value.expr, None);
    let rollup_options = |target_storage: StorageType, order_by: Vec<OrderByItem>| {
        RollupAggregateOptions {
            target_storage: Some(if value.is_json {
                StorageType::Json
            } else {
                target_storage
            }),
            order_by,
            row_presence: Some(row_presence.clone()),
        }
    };

    if shape.single {
        return match kind {
            ColumnKind::LinkObject => Ok(gated),
            ColumnKind::Lookup => Ok(dialect.single_value_json_array(gated, value.is_json)),
            ColumnKind::Rollup {
                function,
                target_storage,
            } => dialect.single_value_rollup_aggregate(
                function,
                gated,
                &rollup_options(target_storage, Vec::new()),
            ),
        };
    }

    let order_by = if kind.is_ordered() {
        shape.order_by.clone()
    } else {
        Vec::new()
    };
    match kind {
        ColumnKind::LinkObject | ColumnKind::Lookup => {
            dialect.json_aggregate_non_null(dialect.json_value(gated, value.is_json), order_by)
        }
        ColumnKind::Rollup {
            function,
            target_storage,
        } => dialect.rollup_aggregate(function, gated, &rollup_options(target_storage, order_by)),
    }
}

/// Resolves `field` of the row aliased `alias`. Materialized nesting reads
/// stored columns; recompute nesting derives computed fields again.
pub(crate) fn resolve_foreign_value(
    ctx: &mut QueryContext<'_>,
    field: &Field,
    alias: &str,
) -> Result<ForeignValue, EngineError> {
    let dialect = ctx.dialect;
    if field.has_error {
        return Ok(ForeignValue::typed_null(dialect, field.storage_type));
    }
    let stored = ForeignValue {
        expr: col(alias, field.physical_column()),
        joins: Vec::new(),
        is_json: field.storage_type.is_json(),
    };
    if ctx.nested == NestedMode::Materialized {
        return Ok(stored);
    }

    match &field.kind {
        FieldKind::Scalar | FieldKind::System(_) => Ok(stored),
        FieldKind::Link(_) => {
            let scope = TableScope::nested(&field.table_id);
            match ensure_link_cte(ctx, &scope, &field.id)? {
                Some(name) => Ok(ForeignValue {
                    expr: col(name.as_str(), LINK_VALUE_COLUMN),
                    joins: vec![nested_join(ctx, &name, alias)],
                    is_json: true,
                }),
                None => Ok(ForeignValue::typed_null(dialect, StorageType::Json)),
            }
        }
        FieldKind::Lookup(_) | FieldKind::Rollup(_) => {
            let Some(link_field_id) = field.join_link_field_id() else {
                return Ok(ForeignValue::typed_null(dialect, field.storage_type));
            };
            let scope = TableScope::nested(&field.table_id);
            let Some(name) = ensure_link_cte(ctx, &scope, link_field_id)? else {
                return Ok(ForeignValue::typed_null(dialect, field.storage_type));
            };
            let Some(column) = ctx
                .entry(&scope, link_field_id)
                .and_then(|entry| entry.columns.get(&field.id))
                .cloned()
            else {
                return Ok(ForeignValue::typed_null(dialect, field.storage_type));
            };
            let value = col(name.as_str(), column.as_str());
            let is_lookup = matches!(field.kind, FieldKind::Lookup(_));
            let expr = if is_lookup && !field.storage_type.is_json() {
                dialect.flatten_lookup_cte_value(value)
            } else {
                value
            };
            Ok(ForeignValue {
                expr,
                joins: vec![nested_join(ctx, &name, alias)],
                is_json: field.storage_type.is_json(),
            })
        }
        FieldKind::ConditionalLookup(_) | FieldKind::ConditionalRollup(_) => {
            let expr = conditional::correlated_value(ctx, field, alias)?;
            Ok(ForeignValue {
                expr,
                joins: Vec::new(),
                is_json: field.storage_type.is_json(),
            })
        }
        FieldKind::Formula(options) => {
            if !ctx.enter(&field.id) {
                return Ok(ForeignValue::typed_null(dialect, field.storage_type));
            }
            let domain = ctx.domain;
            let mut joins = Vec::new();
            let compiled = {
                let mut compiler = FormulaCompiler {
                    domain,
                    dialect,
                    resolve: |referenced: &Field| -> Result<SqlExpr, EngineError> {
                        let value = resolve_foreign_value(ctx, referenced, alias)?;
                        push_joins(&mut joins, value.joins);
                        Ok(value.expr)
                    },
                };
                compiler.compile_field(field, &options.expression)
            };
            ctx.exit();
            Ok(ForeignValue {
                expr: compiled?,
                joins,
                is_json: field.storage_type.is_json(),
            })
        }
    }
}

fn nested_join(ctx: &mut QueryContext<'_>, cte_name: &str, alias: &str) -> Join {
    ctx.note_reference(cte_name);
    Join::left(
        TableFactor::Table {
            name: cte_name.into(),
            alias: None,
        },
        col(cte_name, ID_COLUMN).eq(col(alias, ID_COLUMN)),
    )
}

/// `EXISTS` gate admitting only foreign rows that pass `filter`.
fn filter_gate(
    ctx: &QueryContext<'_>,
    filter: &FilterSet,
    foreign_table: &str,
) -> Result<Option<SqlExpr>, EngineError> {
    let Some(condition) = compile_filter(ctx, filter, GATE_ALIAS, HOST_ALIAS)? else {
        return Ok(None);
    };
    let gate_rows = Select::from(TableFactor::table(foreign_table, GATE_ALIAS))
        .project(int_lit(1), "one")
        .filter(col(GATE_ALIAS, ID_COLUMN).eq(col(FOREIGN_ALIAS, ID_COLUMN)))
        .filter(condition);
    Ok(Some(SqlExpr::Exists(Box::new(gate_rows))))
}

fn link_joins(join: &LinkJoin, foreign_table: &str) -> Vec<Join> {
    let foreign = || TableFactor::table(foreign_table, FOREIGN_ALIAS);
    match join {
        LinkJoin::FkOnHost { fk_column } => vec![Join::left(
            foreign(),
            col(FOREIGN_ALIAS, ID_COLUMN).eq(col(HOST_ALIAS, fk_column)),
        )],
        LinkJoin::FkOnForeign { fk_column } => vec![Join::left(
            foreign(),
            col(FOREIGN_ALIAS, fk_column).eq(col(HOST_ALIAS, ID_COLUMN)),
        )],
        LinkJoin::Junction {
            table,
            self_key,
            foreign_key,
        } => vec![
            Join::left(
                TableFactor::table(table, JUNCTION_ALIAS),
                col(JUNCTION_ALIAS, self_key).eq(col(HOST_ALIAS, ID_COLUMN)),
            ),
            Join::left(
                foreign(),
                col(FOREIGN_ALIAS, ID_COLUMN).eq(col(JUNCTION_ALIAS, foreign_key)),
            ),
        ],
    }
}

/// Foreign rows of the current host row, correlated on `h`.
fn correlated_rows(join: &LinkJoin, foreign_table: &str) -> Select {
    let foreign = TableFactor::table(foreign_table, FOREIGN_ALIAS);
    match join {
        LinkJoin::FkOnHost { fk_column } => Select::from(foreign)
            .filter(col(FOREIGN_ALIAS, ID_COLUMN).eq(col(HOST_ALIAS, fk_column))),
        LinkJoin::FkOnForeign { fk_column } => Select::from(foreign)
            .filter(col(FOREIGN_ALIAS, fk_column).eq(col(HOST_ALIAS, ID_COLUMN))),
        LinkJoin::Junction {
            table,
            self_key,
            foreign_key,
        } => Select::from(TableFactor::table(table, JUNCTION_ALIAS))
            .join(Join::inner(
                foreign,
                col(FOREIGN_ALIAS, ID_COLUMN).eq(col(JUNCTION_ALIAS, foreign_key)),
            ))
            .filter(col(JUNCTION_ALIAS, self_key).eq(col(HOST_ALIAS, ID_COLUMN))),
    }
}

/// Explicit order column first (NULLs last), then the junction row id or
/// the foreign record id as a stable tie-break.
fn link_order(options: &LinkOptions, join: &LinkJoin) -> Vec<OrderByItem> {
    let mut order_by = Vec::new();
    if let Some(column) = &options.order_column_name {
        let owner = match join {
            LinkJoin::Junction { .. } => JUNCTION_ALIAS,
            LinkJoin::FkOnForeign { .. } => FOREIGN_ALIAS,
            LinkJoin::FkOnHost { .. } => HOST_ALIAS,
        };
        order_by.push(OrderByItem::asc(col(owner, column.as_str())).nulls_last());
    }
    let tie_break = match join {
        LinkJoin::Junction { .. } => col(JUNCTION_ALIAS, JUNCTION_ID_COLUMN),
        _ => col(FOREIGN_ALIAS, ID_COLUMN),
    };
    order_by.push(OrderByItem::asc(tie_break));
    order_by
}

pub(crate) fn push_joins(target: &mut Vec<Join>, joins: Vec<Join>) {
    for join in joins {
        if !target.contains(&join) {
            target.push(join);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ensure_link_cte;
    use crate::backend::SqlDialect;
    use crate::compiler::context::{NestedMode, QueryContext, TableScope};
    use crate::config::EngineConfig;
    use crate::dialect::dialect_for;
    use crate::domain::{
        FieldKind, FilterCondition, FilterItem, FilterOperator, FilterSet, TableDomain,
    };
    use crate::sql::ast::{Select, SelectItem, SqlExpr, TableFactor};
    use crate::sql::{render_select, validate_statement};
    use crate::test_support::{lookup, sales_domain};

    fn compile(
        domain: &TableDomain,
        kind: SqlDialect,
        table_id: &str,
        link_id: &str,
        nested: NestedMode,
    ) -> String {
        let config = EngineConfig::default();
        let mut ctx = QueryContext::new(domain, dialect_for(kind), &config, table_id)
            .with_nested_mode(nested);
        let scope = ctx.root_scope();
        let name = ensure_link_cte(&mut ctx, &scope, link_id).unwrap().unwrap();
        let mut select = Select::from(TableFactor::table(name.as_str(), "c"));
        select.projection.push(SelectItem {
            expr: SqlExpr::Star,
            alias: None,
        });
        select.with = ctx.take_definitions();
        let statement = render_select(&select, kind);
        validate_statement(&statement.sql, kind).unwrap();
        statement.sql
    }

    #[test]
    fn one_many_rollup_groups_by_host() {
        let sql = compile(
            &sales_domain(),
            SqlDialect::Postgres,
            "parent",
            "p_children",
            NestedMode::Materialized,
        );
        assert!(
            sql.contains(
                "LEFT JOIN \"child_t\" AS \"f\" ON (\"f\".\"__fk_parent\" = \"h\".\"__id\")"
            ),
            "{sql}"
        );
        assert!(
            sql.contains("COALESCE(SUM(CAST(CASE WHEN (\"f\".\"__id\" IS NOT NULL)"),
            "{sql}"
        );
        assert!(sql.contains("AS \"rollup_p_total\""), "{sql}");
        assert!(sql.contains("AS \"lookup_p_titles\""), "{sql}");
        assert!(sql.contains("GROUP BY \"h\".\"__id\""), "{sql}");
    }

    #[test]
    fn sqlite_many_many_orders_through_correlated_subquery() {
        let sql = compile(
            &sales_domain(),
            SqlDialect::Sqlite,
            "child",
            "c_tags",
            NestedMode::Materialized,
        );
        assert!(sql.contains("group_concat(\"s\".\"v\", ', ')"), "{sql}");
        assert!(
            sql.contains("ORDER BY \"j\".\"__order\" ASC NULLS LAST, \"j\".\"__id\" ASC"),
            "{sql}"
        );
        assert!(sql.contains("(\"j\".\"child_id\" = \"h\".\"__id\")"), "{sql}");
    }

    #[test]
    fn many_one_link_has_no_group_by() {
        let sql = compile(
            &sales_domain(),
            SqlDialect::Sqlite,
            "child",
            "c_parent",
            NestedMode::Materialized,
        );
        assert!(!sql.contains("GROUP BY"), "{sql}");
        assert!(sql.contains("json_array("), "{sql}");
    }

    #[test]
    fn erroring_lookup_becomes_typed_null_column() {
        let mut domain = sales_domain();
        let mut broken = domain.field("p_titles").unwrap().clone();
        broken.has_error = true;
        domain.replace_field(broken).unwrap();
        let sql = compile(
            &domain,
            SqlDialect::Postgres,
            "parent",
            "p_children",
            NestedMode::Materialized,
        );
        assert!(sql.contains("CAST(NULL AS jsonb) AS \"lookup_p_titles\""), "{sql}");
    }

    #[test]
    fn filtered_rollup_is_gated_by_exists() {
        let mut domain = sales_domain();
        let mut filtered = domain.field("p_total").unwrap().clone();
        if let FieldKind::Rollup(options) = &mut filtered.kind {
            options.filter = Some(FilterSet::all(vec![FilterItem::Condition(
                FilterCondition::literal(
                    "c_amount",
                    FilterOperator::Greater,
                    serde_json::json!(150),
                ),
            )]));
        }
        domain.replace_field(filtered).unwrap();
        let sql = compile(
            &domain,
            SqlDialect::Postgres,
            "parent",
            "p_children",
            NestedMode::Materialized,
        );
        assert!(
            sql.contains("EXISTS (SELECT 1 AS \"one\" FROM \"child_t\" AS \"ff\""),
            "{sql}"
        );
    }

    #[test]
    fn recompute_mode_nests_the_foreign_link_cte() {
        let mut domain = sales_domain();
        domain
            .add_field(lookup("p_tag_names", "parent", "p_children", "c_tag_names", false))
            .unwrap();
        let sql = compile(
            &domain,
            SqlDialect::Postgres,
            "parent",
            "p_children",
            NestedMode::Recompute,
        );
        let nested = sql.find("\"cte_child_c_tags\" AS (").expect("nested cte defined");
        let outer = sql.find("\"cte_parent_p_children\" AS (").expect("outer cte defined");
        assert!(nested < outer, "{sql}");
        assert!(sql.contains("\"cte_child_c_tags\".\"rollup_c_tag_names\""), "{sql}");
    }

    #[test]
    fn missing_link_yields_none() {
        let domain = sales_domain();
        let config = EngineConfig::default();
        let mut ctx =
            QueryContext::new(&domain, dialect_for(SqlDialect::Sqlite), &config, "parent");
        let scope = TableScope::nested("parent");
        assert!(ensure_link_cte(&mut ctx, &scope, "nope").unwrap().is_none());
    }
}
