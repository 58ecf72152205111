use crate::backend::SqlDialect;
use crate::sql::ast::{
    Cte, FunctionCall, Ident, Join, JoinKind, Literal, OrderByItem, Select, SqlExpr, TableFactor,
    UnaryOp, Update, WindowSpec,
};
use crate::Value;

/// Rendered SQL text plus the parameters bound to its placeholders, in
/// placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}

pub fn render_select(select: &Select, dialect: SqlDialect) -> Statement {
    let mut renderer = Renderer::new(dialect);
    renderer.select(select);
    renderer.finish()
}

pub fn render_update(update: &Update, dialect: SqlDialect) -> Statement {
    let mut renderer = Renderer::new(dialect);
    renderer.update(update);
    renderer.finish()
}

/// Renders a lone expression. Used by tests and by callers splicing a
/// projection into a statement of their own.
pub fn render_expr(expr: &SqlExpr, dialect: SqlDialect) -> Statement {
    let mut renderer = Renderer::new(dialect);
    renderer.expr(expr);
    renderer.finish()
}

struct Renderer {
    dialect: SqlDialect,
    out: String,
    params: Vec<Value>,
}

impl Renderer {
    fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            out: String::new(),
            params: Vec::new(),
        }
    }

    fn finish(self) -> Statement {
        Statement {
            sql: self.out,
            params: self.params,
        }
    }

    fn push(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn ident(&mut self, ident: &Ident) {
        let quoted = quote_ident(ident.as_str());
        self.push(&quoted);
    }

    fn param(&mut self, value: &Value) {
        self.params.push(value.clone());
        match self.dialect {
            SqlDialect::Sqlite => self.push("?"),
            SqlDialect::Postgres => {
                let placeholder = format!("${}", self.params.len());
                self.push(&placeholder);
            }
        }
    }

    fn literal(&mut self, literal: &Literal) {
        match literal {
            Literal::Null => self.push("NULL"),
            Literal::Integer(value) => self.push(&value.to_string()),
            Literal::Real(value) if value.is_finite() => self.push(&format!("{value:?}")),
            Literal::Real(_) => self.push("NULL"),
            Literal::Bool(value) => match (self.dialect, value) {
                (SqlDialect::Sqlite, true) => self.push("1"),
                (SqlDialect::Sqlite, false) => self.push("0"),
                (SqlDialect::Postgres, true) => self.push("TRUE"),
                (SqlDialect::Postgres, false) => self.push("FALSE"),
            },
            Literal::Text(value) => {
                let escaped = format!("'{}'", escape_sql_string(value));
                self.push(&escaped);
            }
        }
    }

    fn comma_separated<T>(&mut self, items: &[T], mut render: impl FnMut(&mut Self, &T)) {
        for (idx, item) in items.iter().enumerate() {
            if idx > 0 {
                self.push(", ");
            }
            render(self, item);
        }
    }

    fn expr(&mut self, expr: &SqlExpr) {
        match expr {
            SqlExpr::Column { qualifier, name } => {
                if let Some(qualifier) = qualifier {
                    self.ident(qualifier);
                    self.push(".");
                }
                self.ident(name);
            }
            SqlExpr::Literal(literal) => self.literal(literal),
            SqlExpr::Param(value) => self.param(value),
            SqlExpr::Cast { expr, data_type } => {
                self.push("CAST(");
                self.expr(expr);
                self.push(" AS ");
                self.push(data_type);
                self.push(")");
            }
            SqlExpr::Function(call) => self.function(call),
            SqlExpr::Binary { left, op, right } => {
                self.push("(");
                self.expr(left);
                self.push(" ");
                self.push(op.as_sql());
                self.push(" ");
                self.expr(right);
                self.push(")");
            }
            SqlExpr::Unary { op, expr } => {
                match op {
                    UnaryOp::Not => self.push("NOT ("),
                    UnaryOp::Minus => self.push("-("),
                }
                self.expr(expr);
                self.push(")");
            }
            SqlExpr::IsNull { expr, negated } => {
                self.push("(");
                self.expr(expr);
                self.push(if *negated { " IS NOT NULL)" } else { " IS NULL)" });
            }
            SqlExpr::InList {
                expr,
                list,
                negated,
            } => {
                if list.is_empty() {
                    // `x IN ()` is not valid SQL on either engine.
                    self.push(if *negated { "(1 = 1)" } else { "(1 = 0)" });
                    return;
                }
                self.push("(");
                self.expr(expr);
                self.push(if *negated { " NOT IN (" } else { " IN (" });
                self.comma_separated(list, |renderer, item| renderer.expr(item));
                self.push("))");
            }
            SqlExpr::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                self.push("(");
                self.expr(expr);
                self.push(if *negated { " NOT IN (" } else { " IN (" });
                self.select(subquery);
                self.push("))");
            }
            SqlExpr::Case {
                branches,
                else_result,
            } => {
                self.push("CASE");
                for (condition, result) in branches {
                    self.push(" WHEN ");
                    self.expr(condition);
                    self.push(" THEN ");
                    self.expr(result);
                }
                if let Some(else_result) = else_result {
                    self.push(" ELSE ");
                    self.expr(else_result);
                }
                self.push(" END");
            }
            SqlExpr::Exists(select) => {
                self.push("EXISTS (");
                self.select(select);
                self.push(")");
            }
            SqlExpr::Subquery(select) => {
                self.push("(");
                self.select(select);
                self.push(")");
            }
            SqlExpr::Nested(inner) => {
                self.push("(");
                self.expr(inner);
                self.push(")");
            }
            SqlExpr::Star => self.push("*"),
        }
    }

    fn function(&mut self, call: &FunctionCall) {
        self.push(call.name);
        self.push("(");
        if call.distinct {
            self.push("DISTINCT ");
        }
        self.comma_separated(&call.args, |renderer, arg| renderer.expr(arg));
        if !call.order_by.is_empty() {
            self.push(" ORDER BY ");
            self.order_by(&call.order_by);
        }
        self.push(")");
        if let Some(filter) = &call.filter {
            self.push(" FILTER (WHERE ");
            self.expr(filter);
            self.push(")");
        }
        if let Some(window) = &call.over {
            self.window(window);
        }
    }

    fn window(&mut self, window: &WindowSpec) {
        self.push(" OVER (");
        if !window.partition_by.is_empty() {
            self.push("PARTITION BY ");
            self.comma_separated(&window.partition_by, |renderer, expr| renderer.expr(expr));
        }
        if !window.order_by.is_empty() {
            if !window.partition_by.is_empty() {
                self.push(" ");
            }
            self.push("ORDER BY ");
            self.order_by(&window.order_by);
        }
        self.push(")");
    }

    fn order_by(&mut self, items: &[OrderByItem]) {
        self.comma_separated(items, |renderer, item| {
            renderer.expr(&item.expr);
            renderer.push(if item.descending { " DESC" } else { " ASC" });
            if item.nulls_last {
                renderer.push(" NULLS LAST");
            }
        });
    }

    fn cte(&mut self, cte: &Cte) {
        self.ident(&cte.name);
        self.push(if cte.materialized {
            " AS MATERIALIZED ("
        } else {
            " AS ("
        });
        self.select(&cte.query);
        self.push(")");
    }

    fn table_factor(&mut self, factor: &TableFactor) {
        match factor {
            TableFactor::Table { name, alias } => {
                self.ident(name);
                if let Some(alias) = alias {
                    self.push(" AS ");
                    self.ident(alias);
                }
            }
            TableFactor::Derived { subquery, alias } => {
                self.push("(");
                self.select(subquery);
                self.push(") AS ");
                self.ident(alias);
            }
            TableFactor::Function { call, alias } => {
                self.function(call);
                self.push(" AS ");
                self.ident(alias);
            }
        }
    }

    fn join(&mut self, join: &Join) {
        self.push(match join.kind {
            JoinKind::Inner => " INNER JOIN ",
            JoinKind::Left => " LEFT JOIN ",
        });
        self.table_factor(&join.relation);
        if let Some(on) = &join.on {
            self.push(" ON ");
            self.expr(on);
        }
    }

    fn select(&mut self, select: &Select) {
        if !select.with.is_empty() {
            self.push("WITH ");
            self.comma_separated(&select.with, |renderer, cte| renderer.cte(cte));
            self.push(" ");
        }
        self.push("SELECT ");
        if select.distinct {
            self.push("DISTINCT ");
        }
        if select.projection.is_empty() {
            self.push("1");
        }
        self.comma_separated(&select.projection, |renderer, item| {
            renderer.expr(&item.expr);
            if let Some(alias) = &item.alias {
                renderer.push(" AS ");
                renderer.ident(alias);
            }
        });
        if let Some(from) = &select.from {
            self.push(" FROM ");
            self.table_factor(from);
        }
        for join in &select.joins {
            self.join(join);
        }
        if let Some(selection) = &select.selection {
            self.push(" WHERE ");
            self.expr(selection);
        }
        if !select.group_by.is_empty() {
            self.push(" GROUP BY ");
            self.comma_separated(&select.group_by, |renderer, expr| renderer.expr(expr));
        }
        if !select.order_by.is_empty() {
            self.push(" ORDER BY ");
            self.order_by(&select.order_by);
        }
        if let Some(limit) = &select.limit {
            self.push(" LIMIT ");
            self.expr(limit);
        }
    }

    fn update(&mut self, update: &Update) {
        self.push("UPDATE ");
        self.ident(&update.table);
        self.push(" SET ");
        self.comma_separated(&update.assignments, |renderer, assignment| {
            renderer.ident(&assignment.column);
            renderer.push(" = ");
            renderer.expr(&assignment.value);
        });
        if let Some(selection) = &update.selection {
            self.push(" WHERE ");
            self.expr(selection);
        }
        if !update.returning.is_empty() {
            self.push(" RETURNING ");
            self.comma_separated(&update.returning, |renderer, expr| renderer.expr(expr));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::ast::{
        bare_col, col, func, int_lit, param, Assignment, BinaryOp, FunctionCall, Select,
        TableFactor,
    };

    #[test]
    fn identifiers_are_quoted_and_escaped() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn user_values_become_placeholders() {
        let select = Select::from(TableFactor::table("items", "t"))
            .project(col("t", "__id"), "id")
            .filter(col("t", "name").eq(param("O'Brien")))
            .filter(col("t", "amount").binary(BinaryOp::Gt, param(10_i64)));

        let sqlite = render_select(&select, SqlDialect::Sqlite);
        assert_eq!(
            sqlite.sql,
            "SELECT \"t\".\"__id\" AS \"id\" FROM \"items\" AS \"t\" \
             WHERE ((\"t\".\"name\" = ?) AND (\"t\".\"amount\" > ?))"
        );
        assert_eq!(
            sqlite.params,
            vec![Value::Text("O'Brien".to_string()), Value::Integer(10)]
        );

        let postgres = render_select(&select, SqlDialect::Postgres);
        assert!(postgres.sql.contains("= $1"));
        assert!(postgres.sql.contains("> $2"));
    }

    #[test]
    fn aggregate_clauses_render_in_order() {
        let call = FunctionCall::new("jsonb_agg", vec![col("f", "v")])
            .order_by(vec![OrderByItem::asc(col("f", "o")).nulls_last()])
            .filter(col("f", "v").is_not_null());
        let rendered = render_expr(&call.into_expr(), SqlDialect::Postgres);
        assert_eq!(
            rendered.sql,
            "jsonb_agg(\"f\".\"v\" ORDER BY \"f\".\"o\" ASC NULLS LAST) \
             FILTER (WHERE (\"f\".\"v\" IS NOT NULL))"
        );
    }

    #[test]
    fn materialized_cte_and_limit() {
        let inner = Select::from(TableFactor::table("t", "x")).project(int_lit(1), "one");
        let select = Select {
            with: vec![Cte {
                name: Ident::new("cte_a"),
                materialized: true,
                query: inner,
            }],
            limit: Some(param(5_i64)),
            ..Select::from(TableFactor::Table {
                name: Ident::new("cte_a"),
                alias: None,
            })
        }
        .project(func("COUNT", vec![SqlExpr::Star]), "n");

        let rendered = render_select(&select, SqlDialect::Postgres);
        assert_eq!(
            rendered.sql,
            "WITH \"cte_a\" AS MATERIALIZED (SELECT 1 AS \"one\" FROM \"t\" AS \"x\") \
             SELECT COUNT(*) AS \"n\" FROM \"cte_a\" LIMIT $1"
        );
    }

    #[test]
    fn empty_in_list_is_constant_false() {
        let rendered = render_expr(&bare_col("a").in_list(Vec::new()), SqlDialect::Sqlite);
        assert_eq!(rendered.sql, "(1 = 0)");
    }

    #[test]
    fn in_subquery_renders_the_nested_select() {
        let ids = Select::from(TableFactor::Table {
            name: Ident::new("cte_ids"),
            alias: None,
        })
        .project(col("cte_ids", "__id"), "__id");
        let rendered = render_expr(&col("t", "__id").in_subquery(ids), SqlDialect::Sqlite);
        assert_eq!(
            rendered.sql,
            "(\"t\".\"__id\" IN (SELECT \"cte_ids\".\"__id\" AS \"__id\" FROM \"cte_ids\"))"
        );
        assert!(rendered.params.is_empty());
    }

    #[test]
    fn update_with_returning() {
        let update = Update {
            table: Ident::new("t"),
            assignments: vec![Assignment {
                column: Ident::new("total"),
                value: param(3.5_f64).cast("REAL"),
            }],
            selection: Some(bare_col("__id").eq(param("r1"))),
            returning: vec![bare_col("__version")],
        };
        let rendered = render_update(&update, SqlDialect::Sqlite);
        assert_eq!(
            rendered.sql,
            "UPDATE \"t\" SET \"total\" = CAST(? AS REAL) WHERE (\"__id\" = ?) \
             RETURNING \"__version\""
        );
        assert_eq!(rendered.params.len(), 2);
    }

    #[test]
    fn boolean_literals_follow_dialect() {
        let expr = SqlExpr::Literal(Literal::Bool(true));
        assert_eq!(render_expr(&expr, SqlDialect::Sqlite).sql, "1");
        assert_eq!(render_expr(&expr, SqlDialect::Postgres).sql, "TRUE");
        let real = SqlExpr::Literal(Literal::Real(2.0));
        assert_eq!(render_expr(&real, SqlDialect::Sqlite).sql, "2.0");
    }
}
