//! Value expressions of single fields in root statements.
//!
//! A computed field reads, in order: the column of a CTE already joined
//! into the statement, the column of a materialized view, the stored
//! column during propagation, and otherwise a NULL of its declared type.
//! Every result is cast to the declared storage type so it can be written
//! back without a mismatch.

use serde::{Deserialize, Serialize};

use crate::compiler::context::{QueryContext, ROOT_ALIAS};
use crate::compiler::formula::FormulaCompiler;
use crate::domain::{Field, FieldKind};
use crate::sql::ast::{col, SqlExpr};
use crate::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum SelectMode {
    /// Listing query; computed fields are derived live.
    #[default]
    Query,
    /// Reading a pre-materialized view or cache table under `alias`.
    View { alias: String },
    /// Recompute pass; values about to be written back to their columns.
    Propagation,
}

/// The SQL value of `field` for the root row.
pub(crate) fn select_field(
    ctx: &QueryContext<'_>,
    field: &Field,
    mode: &SelectMode,
) -> Result<SqlExpr, EngineError> {
    let dialect = ctx.dialect;
    let stored = || match mode {
        SelectMode::View { alias } => col(alias.as_str(), field.physical_column()),
        SelectMode::Query | SelectMode::Propagation => col(ROOT_ALIAS, field.physical_column()),
    };

    match &field.kind {
        FieldKind::Scalar => Ok(stored()),
        FieldKind::System(column) if column.is_user() => Ok(dialect
            .build_user_json_object_by_id(stored(), &ctx.config.user_table)),
        FieldKind::System(_) => Ok(stored()),
        FieldKind::Formula(_) => match mode {
            SelectMode::Query => compute_field(ctx, field, mode),
            SelectMode::View { .. } | SelectMode::Propagation => Ok(stored()),
        },
        FieldKind::Link(_)
        | FieldKind::Lookup(_)
        | FieldKind::Rollup(_)
        | FieldKind::ConditionalLookup(_)
        | FieldKind::ConditionalRollup(_) => {
            if let Some(value) = prepared_value(ctx, field) {
                return Ok(dialect.cast_to(value, field.storage_type));
            }
            Ok(match mode {
                SelectMode::View { .. } | SelectMode::Propagation => stored(),
                SelectMode::Query => dialect.typed_null(field.storage_type),
            })
        }
    }
}

/// Like `select_field`, but formulas are always evaluated from their
/// references instead of read from a stored column.
pub(crate) fn compute_field(
    ctx: &QueryContext<'_>,
    field: &Field,
    mode: &SelectMode,
) -> Result<SqlExpr, EngineError> {
    let FieldKind::Formula(options) = &field.kind else {
        return select_field(ctx, field, mode);
    };
    if field.has_error {
        return Ok(ctx.dialect.typed_null(field.storage_type));
    }
    let mut compiler = FormulaCompiler {
        domain: ctx.domain,
        dialect: ctx.dialect,
        resolve: |referenced: &Field| -> Result<SqlExpr, EngineError> {
            select_field(ctx, referenced, mode)
        },
    };
    compiler.compile_field(field, &options.expression)
}

/// Value from a joined CTE or a compiled conditional, before the cast.
fn prepared_value(ctx: &QueryContext<'_>, field: &Field) -> Option<SqlExpr> {
    let dialect = ctx.dialect;
    let (value, is_array) = match &field.kind {
        FieldKind::Link(_) => {
            let entry = ctx.joined_entry(&field.id)?;
            let column = entry.columns.get(&field.id)?;
            (col(entry.name.as_str(), column.as_str()), false)
        }
        FieldKind::Lookup(_) | FieldKind::Rollup(_) => {
            let entry = ctx.joined_entry(field.join_link_field_id()?)?;
            let column = entry.columns.get(&field.id)?;
            let is_lookup = matches!(field.kind, FieldKind::Lookup(_));
            (col(entry.name.as_str(), column.as_str()), is_lookup)
        }
        FieldKind::ConditionalLookup(_) => (ctx.inline_value(&field.id)?.clone(), true),
        FieldKind::ConditionalRollup(_) => (ctx.inline_value(&field.id)?.clone(), false),
        _ => return None,
    };
    if is_array && !field.storage_type.is_json() {
        return Some(dialect.flatten_lookup_cte_value(value));
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::{select_field, SelectMode};
    use crate::backend::SqlDialect;
    use crate::compiler::context::QueryContext;
    use crate::config::EngineConfig;
    use crate::dialect::dialect_for;
    use crate::domain::{Field, FieldKind, StorageType, SystemColumn};
    use crate::sql::render_expr;
    use crate::test_support::sales_domain;

    fn render(field_id: &str, mode: SelectMode) -> String {
        let domain = sales_domain();
        let config = EngineConfig::default();
        let ctx = QueryContext::new(&domain, dialect_for(SqlDialect::Postgres), &config, "parent");
        let field = domain.field(field_id).unwrap();
        render_expr(&select_field(&ctx, field, &mode).unwrap(), SqlDialect::Postgres).sql
    }

    #[test]
    fn unprepared_rollup_is_a_typed_null_in_queries() {
        assert_eq!(render("p_total", SelectMode::Query), "CAST(NULL AS double precision)");
    }

    #[test]
    fn propagation_reads_the_stored_column() {
        assert_eq!(render("p_total", SelectMode::Propagation), "\"t\".\"p_total\"");
    }

    #[test]
    fn view_reads_the_view_alias() {
        let mode = SelectMode::View {
            alias: "v".to_string(),
        };
        assert_eq!(render("p_titles", mode), "\"v\".\"p_titles\"");
    }

    #[test]
    fn query_formula_is_evaluated_from_references() {
        let sql = render("p_total_x2", SelectMode::Query);
        assert_eq!(sql, "CAST((CAST(NULL AS double precision) * 2.0) AS double precision)");
    }

    #[test]
    fn user_system_field_becomes_a_user_object() {
        let field = Field::scalar(
            "p_owner",
            "parent",
            "Owner",
            "__created_by",
            StorageType::Json,
        )
        .with_kind(FieldKind::System(SystemColumn::CreatedBy));
        let domain = sales_domain();
        let config = EngineConfig::default();
        let ctx = QueryContext::new(&domain, dialect_for(SqlDialect::Sqlite), &config, "parent");
        let sql = render_expr(
            &select_field(&ctx, &field, &SelectMode::Query).unwrap(),
            SqlDialect::Sqlite,
        )
        .sql;
        assert!(sql.contains("FROM \"users\" AS \"u\""), "{sql}");
        assert!(sql.contains("\"t\".\"__created_by\""), "{sql}");
    }
}
