//! Root statements: listing queries and recompute passes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::backend::SqlDialect;
use crate::compiler::conditional::prepare_conditional;
use crate::compiler::context::{NestedMode, QueryContext, ROOT_ALIAS};
use crate::compiler::cte::ensure_link_cte;
use crate::compiler::select::{compute_field, select_field, SelectMode};
use crate::config::EngineConfig;
use crate::dialect::dialect_for;
use crate::domain::{
    Field, FieldKind, Table, TableDomain, AUTO_NUMBER_COLUMN, ID_COLUMN, VERSION_COLUMN,
};
use crate::errors;
use crate::sql::ast::{col, param, Join, OrderByItem, Select, TableFactor};
use crate::sql::{render_select, validate_statement, Statement};
use crate::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryOptions {
    /// Field ids to select, in order. `None` selects every field.
    pub projection: Option<Vec<String>>,
    pub nested: NestedMode,
    /// Read computed values from this pre-materialized view or cache table
    /// instead of deriving them.
    pub view: Option<String>,
    pub record_ids: Option<Vec<String>>,
}

/// A rendered listing query. `columns` names the result columns in order:
/// `__id` followed by the projected field ids.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub statement: Statement,
    pub columns: Vec<String>,
}

/// A rendered recompute pass over a set of records. Each row is
/// `__id, __version, __auto_number` followed by a (new, old) value pair per
/// entry of `field_ids`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecomputeQuery {
    pub statement: Statement,
    pub field_ids: Vec<String>,
}

impl RecomputeQuery {
    pub(crate) const LEADING_COLUMNS: usize = 3;
}

pub fn compile_query(
    domain: &TableDomain,
    dialect: SqlDialect,
    config: &EngineConfig,
    table_id: &str,
    options: &QueryOptions,
) -> Result<CompiledQuery, EngineError> {
    let table = domain
        .table(table_id)
        .ok_or_else(|| errors::missing_table_error(table_id))?;
    let fields = projected_fields(domain, table, options.projection.as_deref())?;

    let mut ctx = QueryContext::new(domain, dialect_for(dialect), config, table_id)
        .with_nested_mode(options.nested)
        .with_record_ids(options.record_ids.clone());
    let (from, mode) = match &options.view {
        Some(view) => (
            TableFactor::table(view.as_str(), ROOT_ALIAS),
            SelectMode::View {
                alias: ROOT_ALIAS.to_string(),
            },
        ),
        None => {
            prepare_fields(&mut ctx, &fields, true)?;
            (
                TableFactor::table(table.db_table_name.as_str(), ROOT_ALIAS),
                SelectMode::Query,
            )
        }
    };

    let mut select = Select::from(from).project(col(ROOT_ALIAS, ID_COLUMN), ID_COLUMN);
    let mut columns = vec![ID_COLUMN.to_string()];
    for field in &fields {
        select = select.project(select_field(&ctx, field, &mode)?, field.id.as_str());
        columns.push(field.id.clone());
    }
    let statement = finish(ctx, select, options.record_ids.as_deref(), dialect)?;
    Ok(CompiledQuery { statement, columns })
}

/// Compiles the pass that recomputes `field_ids` of `record_ids`. Foreign
/// values are read from their stored columns, which earlier steps have
/// already brought up to date.
pub fn compile_recompute(
    domain: &TableDomain,
    dialect: SqlDialect,
    config: &EngineConfig,
    table_id: &str,
    field_ids: &[String],
    record_ids: &[String],
) -> Result<RecomputeQuery, EngineError> {
    let table = domain
        .table(table_id)
        .ok_or_else(|| errors::missing_table_error(table_id))?;
    let fields = projected_fields(domain, table, Some(field_ids))?;

    let mut ctx = QueryContext::new(domain, dialect_for(dialect), config, table_id)
        .with_nested_mode(NestedMode::Materialized)
        .with_record_ids(Some(record_ids.to_vec()));
    prepare_fields(&mut ctx, &fields, false)?;

    let mut select = Select::from(TableFactor::table(table.db_table_name.as_str(), ROOT_ALIAS))
        .project(col(ROOT_ALIAS, ID_COLUMN), ID_COLUMN)
        .project(col(ROOT_ALIAS, VERSION_COLUMN), VERSION_COLUMN)
        .project(col(ROOT_ALIAS, AUTO_NUMBER_COLUMN), AUTO_NUMBER_COLUMN);
    for (idx, field) in fields.iter().enumerate() {
        let fresh = match field.kind {
            FieldKind::Formula(_) => compute_field(&ctx, field, &SelectMode::Propagation)?,
            _ => select_field(&ctx, field, &SelectMode::Query)?,
        };
        select = select
            .project(fresh, format!("new_{idx}"))
            .project(col(ROOT_ALIAS, field.physical_column()), format!("old_{idx}"));
    }
    let statement = finish(ctx, select, Some(record_ids), dialect)?;
    Ok(RecomputeQuery {
        statement,
        field_ids: fields.iter().map(|field| field.id.clone()).collect(),
    })
}

fn projected_fields<'d>(
    domain: &'d TableDomain,
    table: &'d Table,
    projection: Option<&[String]>,
) -> Result<Vec<&'d Field>, EngineError> {
    let Some(ids) = projection else {
        return Ok(table.fields.iter().collect());
    };
    ids.iter()
        .map(|id| {
            domain
                .field(id)
                .filter(|field| field.table_id == table.id)
                .ok_or_else(|| errors::missing_field_error(id, "projection"))
        })
        .collect()
}

/// Builds and joins the CTEs the projected fields read. With
/// `follow_formulas` unset, formula references keep reading stored columns.
fn prepare_fields(
    ctx: &mut QueryContext<'_>,
    fields: &[&Field],
    follow_formulas: bool,
) -> Result<(), EngineError> {
    let mut visited = BTreeSet::new();
    for field in fields {
        prepare_field(ctx, field, follow_formulas, &mut visited)?;
    }
    Ok(())
}

fn prepare_field(
    ctx: &mut QueryContext<'_>,
    field: &Field,
    follow_formulas: bool,
    visited: &mut BTreeSet<String>,
) -> Result<(), EngineError> {
    if !visited.insert(field.id.clone()) || field.has_error {
        return Ok(());
    }
    let domain = ctx.domain;
    match &field.kind {
        FieldKind::Scalar | FieldKind::System(_) => {}
        FieldKind::Link(_) => join_link(ctx, &field.id)?,
        FieldKind::Lookup(options) => join_link(ctx, &options.link_field_id)?,
        FieldKind::Rollup(options) => join_link(ctx, &options.link_field_id)?,
        FieldKind::ConditionalLookup(_) | FieldKind::ConditionalRollup(_) => {
            prepare_conditional(ctx, field)?;
        }
        FieldKind::Formula(_) if !follow_formulas => {}
        FieldKind::Formula(options) => {
            for reference in options.expression.referenced_field_ids() {
                if let Some(referenced) = domain.field(&reference) {
                    prepare_field(ctx, referenced, follow_formulas, visited)?;
                }
            }
        }
    }
    Ok(())
}

fn join_link(ctx: &mut QueryContext<'_>, link_field_id: &str) -> Result<(), EngineError> {
    let scope = ctx.root_scope();
    let Some(name) = ensure_link_cte(ctx, &scope, link_field_id)? else {
        return Ok(());
    };
    let join = Join::left(
        TableFactor::Table {
            name: name.as_str().into(),
            alias: None,
        },
        col(name.as_str(), ID_COLUMN).eq(col(ROOT_ALIAS, ID_COLUMN)),
    );
    ctx.join_root(&scope, link_field_id, join);
    Ok(())
}

fn finish(
    mut ctx: QueryContext<'_>,
    mut select: Select,
    record_ids: Option<&[String]>,
    dialect: SqlDialect,
) -> Result<Statement, EngineError> {
    for join in ctx.take_root_joins() {
        select = select.join(join);
    }
    if let Some(ids) = record_ids {
        let filter = match ctx.shared_record_filter(col(ROOT_ALIAS, ID_COLUMN)) {
            Some(filter) => filter,
            None => col(ROOT_ALIAS, ID_COLUMN)
                .in_list(ids.iter().map(|id| param(id.as_str())).collect()),
        };
        select = select.filter(filter);
    }
    select.order_by = vec![OrderByItem::asc(col(ROOT_ALIAS, AUTO_NUMBER_COLUMN))];
    select.with = ctx.take_definitions();

    let statement = render_select(&select, dialect);
    if ctx.config.validate_sql {
        validate_statement(&statement.sql, dialect)?;
    }
    Ok(statement)
}

#[cfg(test)]
mod tests {
    use super::{compile_query, compile_recompute, QueryOptions};
    use crate::backend::SqlDialect;
    use crate::compiler::NestedMode;
    use crate::config::EngineConfig;
    use crate::sql::validate_statement;
    use crate::test_support::{payments_domain, sales_domain};
    use crate::Value;

    fn strict() -> EngineConfig {
        EngineConfig {
            validate_sql: true,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn listing_query_joins_one_cte_per_link() {
        let compiled = compile_query(
            &sales_domain(),
            SqlDialect::Postgres,
            &strict(),
            "parent",
            &QueryOptions::default(),
        )
        .unwrap();
        let sql = &compiled.statement.sql;
        assert!(sql.starts_with("WITH \"cte_parent_p_children\" AS ("), "{sql}");
        assert_eq!(sql.matches("LEFT JOIN \"cte_parent_p_children\"").count(), 1, "{sql}");
        assert!(sql.contains("FROM \"parent_t\" AS \"t\""), "{sql}");
        assert!(sql.ends_with("ORDER BY \"t\".\"__auto_number\" ASC"), "{sql}");
        assert_eq!(
            compiled.columns,
            vec!["__id", "p_name", "p_children", "p_total", "p_titles", "p_total_x2"]
        );
    }

    #[test]
    fn formula_over_rollup_reads_the_cte_column() {
        let options = QueryOptions {
            projection: Some(vec!["p_total_x2".to_string()]),
            ..QueryOptions::default()
        };
        let compiled =
            compile_query(&sales_domain(), SqlDialect::Sqlite, &strict(), "parent", &options)
                .unwrap();
        let sql = &compiled.statement.sql;
        assert!(
            sql.contains("CAST(\"cte_parent_p_children\".\"rollup_p_total\" AS REAL)"),
            "{sql}"
        );
    }

    #[test]
    fn record_ids_restrict_ctes_and_root() {
        let options = QueryOptions {
            projection: Some(vec!["p_total".to_string()]),
            record_ids: Some(vec!["p1".to_string(), "p2".to_string()]),
            ..QueryOptions::default()
        };
        let compiled =
            compile_query(&sales_domain(), SqlDialect::Postgres, &strict(), "parent", &options)
                .unwrap();
        let sql = &compiled.statement.sql;
        assert!(
            sql.starts_with(
                "WITH \"cte_ids_parent\" AS (SELECT \"i\".\"__id\" AS \"__id\" \
                 FROM \"parent_t\" AS \"i\" WHERE (\"i\".\"__id\" IN ($1, $2))), \
                 \"cte_rows_parent_p_children\" AS ("
            ),
            "{sql}"
        );
        let shared = "IN (SELECT \"cte_ids_parent\".\"__id\" AS \"__id\" FROM \"cte_ids_parent\")";
        assert_eq!(sql.matches(shared).count(), 2, "{sql}");
        assert!(sql.contains(&format!("(\"t\".\"__id\" {shared})")), "{sql}");
        assert_eq!(
            compiled.statement.params,
            vec![Value::Text("p1".to_string()), Value::Text("p2".to_string())]
        );
    }

    #[test]
    fn view_mode_reads_stored_columns_without_ctes() {
        let options = QueryOptions {
            view: Some("parent_cache".to_string()),
            ..QueryOptions::default()
        };
        let compiled =
            compile_query(&sales_domain(), SqlDialect::Sqlite, &strict(), "parent", &options)
                .unwrap();
        let sql = &compiled.statement.sql;
        assert!(!sql.contains("WITH"), "{sql}");
        assert!(sql.contains("FROM \"parent_cache\" AS \"t\""), "{sql}");
        assert!(sql.contains("\"t\".\"p_total\" AS \"p_total\""), "{sql}");
    }

    #[test]
    fn recompute_nesting_still_parses() {
        let options = QueryOptions {
            nested: NestedMode::Recompute,
            ..QueryOptions::default()
        };
        let compiled =
            compile_query(&sales_domain(), SqlDialect::Postgres, &strict(), "child", &options)
                .unwrap();
        validate_statement(&compiled.statement.sql, SqlDialect::Postgres).unwrap();
    }

    #[test]
    fn unknown_table_and_field_are_rejected() {
        let domain = sales_domain();
        let config = EngineConfig::default();
        let err = compile_query(
            &domain,
            SqlDialect::Sqlite,
            &config,
            "nope",
            &QueryOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.code, "COMPUTED_ERROR_MISSING_FOREIGN_TABLE");

        let options = QueryOptions {
            projection: Some(vec!["c_title".to_string()]),
            ..QueryOptions::default()
        };
        let err = compile_query(&domain, SqlDialect::Sqlite, &config, "parent", &options)
            .unwrap_err();
        assert_eq!(err.code, "COMPUTED_ERROR_MISSING_FIELD");
    }

    #[test]
    fn recompute_pairs_fresh_and_stored_values() {
        let query = compile_recompute(
            &sales_domain(),
            SqlDialect::Sqlite,
            &strict(),
            "parent",
            &["p_total".to_string(), "p_titles".to_string()],
            &["p1".to_string()],
        )
        .unwrap();
        let sql = &query.statement.sql;
        assert!(
            sql.contains(
                "CAST(\"cte_rows_parent_p_children\".\"rollup_p_total\" AS REAL) AS \"new_0\""
            ),
            "{sql}"
        );
        assert!(sql.contains("\"t\".\"p_total\" AS \"old_0\""), "{sql}");
        assert!(sql.contains("\"t\".\"p_titles\" AS \"old_1\""), "{sql}");
        assert_eq!(sql.matches("LEFT JOIN \"cte_rows_parent_p_children\"").count(), 1);
        assert_eq!(query.statement.params, vec![Value::Text("p1".to_string())]);
        assert_eq!(query.field_ids, vec!["p_total", "p_titles"]);
    }

    #[test]
    fn recomputed_formula_reads_stored_references() {
        let query = compile_recompute(
            &sales_domain(),
            SqlDialect::Sqlite,
            &strict(),
            "parent",
            &["p_total_x2".to_string()],
            &["p1".to_string()],
        )
        .unwrap();
        let sql = &query.statement.sql;
        assert!(!sql.contains("WITH"), "{sql}");
        assert!(
            sql.contains("CAST((\"t\".\"p_total\" * 2.0) AS REAL) AS \"new_0\""),
            "{sql}"
        );
    }

    #[test]
    fn conditional_rollup_projects_inline_value() {
        let query = compile_recompute(
            &payments_domain(None, true),
            SqlDialect::Postgres,
            &strict(),
            "orders",
            &["ord_paid".to_string()],
            &["o1".to_string()],
        )
        .unwrap();
        let sql = &query.statement.sql;
        assert!(sql.contains("LEFT JOIN \"cte_cond_orders_ord_paid\""), "{sql}");
        assert!(sql.contains("AS \"new_0\""), "{sql}");
    }
}
