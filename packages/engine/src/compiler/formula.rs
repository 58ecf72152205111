use crate::dialect::Dialect;
use crate::domain::{
    Field, FormulaBinaryOp, FormulaExpr, FormulaFunction, FormulaUnaryOp, StorageType,
    TableDomain,
};
use crate::errors;
use crate::sql::ast::{
    case_when, func, int_lit, null, param, text_lit, BinaryOp, Literal, SqlExpr, UnaryOp,
};
use crate::EngineError;

/// Coarse result type, enough to pick truthiness tests and casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FormulaType {
    Number,
    Text,
    Boolean,
}

impl FormulaType {
    fn of_storage(storage: StorageType) -> Self {
        match storage {
            StorageType::Integer | StorageType::Real => Self::Number,
            StorageType::Boolean => Self::Boolean,
            StorageType::Text | StorageType::DateTime | StorageType::Json => Self::Text,
        }
    }
}

/// Emits SQL for a formula tree. `resolve` yields the SQL value of a
/// referenced field of the current row.
pub(crate) struct FormulaCompiler<'d, F> {
    pub(crate) domain: &'d TableDomain,
    pub(crate) dialect: &'static dyn Dialect,
    pub(crate) resolve: F,
}

impl<F> FormulaCompiler<'_, F>
where
    F: FnMut(&Field) -> Result<SqlExpr, EngineError>,
{
    /// Compiles a formula and casts it to the field's storage type.
    pub(crate) fn compile_field(
        &mut self,
        field: &Field,
        expr: &FormulaExpr,
    ) -> Result<SqlExpr, EngineError> {
        let (compiled, ty) = self.compile(expr)?;
        Ok(coerce(self.dialect, compiled, ty, field.storage_type))
    }

    pub(crate) fn compile(
        &mut self,
        expr: &FormulaExpr,
    ) -> Result<(SqlExpr, FormulaType), EngineError> {
        match expr {
            FormulaExpr::Field { id } => {
                let field = self
                    .domain
                    .field(id)
                    .ok_or_else(|| errors::missing_field_error(id, "formula reference"))?;
                let value = (self.resolve)(field)?;
                Ok((value, FormulaType::of_storage(field.storage_type)))
            }
            FormulaExpr::Number { value } => {
                Ok((SqlExpr::Literal(Literal::Real(*value)), FormulaType::Number))
            }
            FormulaExpr::Text { value } => Ok((param(value.as_str()), FormulaType::Text)),
            FormulaExpr::Boolean { value } => {
                Ok((SqlExpr::Literal(Literal::Bool(*value)), FormulaType::Boolean))
            }
            FormulaExpr::Unary { op, expr } => {
                let (inner, ty) = self.compile(expr)?;
                Ok(match op {
                    FormulaUnaryOp::Negate => (
                        SqlExpr::Unary {
                            op: UnaryOp::Minus,
                            expr: Box::new(inner),
                        },
                        FormulaType::Number,
                    ),
                    FormulaUnaryOp::Not => (self.truthy(inner, ty).not(), FormulaType::Boolean),
                })
            }
            FormulaExpr::Binary { op, left, right } => self.binary(*op, left, right),
            FormulaExpr::Call { function, args } => self.call(*function, args),
        }
    }

    fn binary(
        &mut self,
        op: FormulaBinaryOp,
        left: &FormulaExpr,
        right: &FormulaExpr,
    ) -> Result<(SqlExpr, FormulaType), EngineError> {
        let (left, left_ty) = self.compile(left)?;
        let (right, right_ty) = self.compile(right)?;
        let number = FormulaType::Number;
        let boolean = FormulaType::Boolean;
        Ok(match op {
            FormulaBinaryOp::Add => (left.binary(BinaryOp::Plus, right), number),
            FormulaBinaryOp::Subtract => (left.binary(BinaryOp::Minus, right), number),
            FormulaBinaryOp::Multiply => (left.binary(BinaryOp::Multiply, right), number),
            FormulaBinaryOp::Divide => (self.dialect.divide(left, right), number),
            FormulaBinaryOp::Modulo => (self.dialect.modulo(left, right), number),
            FormulaBinaryOp::Equal => (left.binary(BinaryOp::Eq, right), boolean),
            FormulaBinaryOp::NotEqual => (left.binary(BinaryOp::NotEq, right), boolean),
            FormulaBinaryOp::Greater => (left.binary(BinaryOp::Gt, right), boolean),
            FormulaBinaryOp::GreaterEqual => (left.binary(BinaryOp::GtEq, right), boolean),
            FormulaBinaryOp::Less => (left.binary(BinaryOp::Lt, right), boolean),
            FormulaBinaryOp::LessEqual => (left.binary(BinaryOp::LtEq, right), boolean),
            FormulaBinaryOp::And => (
                self.truthy(left, left_ty)
                    .and(self.truthy(right, right_ty)),
                boolean,
            ),
            FormulaBinaryOp::Or => (
                self.truthy(left, left_ty)
                    .or(self.truthy(right, right_ty)),
                boolean,
            ),
            FormulaBinaryOp::Concat => (self.concat(vec![left, right]), FormulaType::Text),
        })
    }

    fn call(
        &mut self,
        function: FormulaFunction,
        args: &[FormulaExpr],
    ) -> Result<(SqlExpr, FormulaType), EngineError> {
        let mut compiled = Vec::with_capacity(args.len());
        for arg in args {
            compiled.push(self.compile(arg)?);
        }
        let arg = |idx: usize| {
            compiled
                .get(idx)
                .map(|(expr, _)| expr.clone())
                .unwrap_or_else(null)
        };
        let all = || compiled.iter().map(|(expr, _)| expr.clone()).collect::<Vec<_>>();

        Ok(match function {
            FormulaFunction::Abs => (func("ABS", vec![arg(0)]), FormulaType::Number),
            FormulaFunction::Round => {
                let digits = if compiled.len() > 1 { arg(1) } else { int_lit(0) };
                (self.dialect.round(arg(0), digits), FormulaType::Number)
            }
            FormulaFunction::Ceiling => (self.dialect.ceiling(arg(0)), FormulaType::Number),
            FormulaFunction::Floor => (self.dialect.floor(arg(0)), FormulaType::Number),
            FormulaFunction::Upper => (func("UPPER", vec![arg(0)]), FormulaType::Text),
            FormulaFunction::Lower => (func("LOWER", vec![arg(0)]), FormulaType::Text),
            FormulaFunction::Len => (
                func("LENGTH", vec![arg(0).cast(self.dialect.text_type())]),
                FormulaType::Number,
            ),
            FormulaFunction::Concatenate => (self.concat(all()), FormulaType::Text),
            FormulaFunction::If => {
                let condition_ty = compiled
                    .first()
                    .map(|(_, ty)| *ty)
                    .unwrap_or(FormulaType::Boolean);
                let result_ty = compiled
                    .get(1)
                    .map(|(_, ty)| *ty)
                    .unwrap_or(FormulaType::Text);
                let otherwise = compiled.get(2).map(|(expr, _)| expr.clone());
                (
                    case_when(self.truthy(arg(0), condition_ty), arg(1), otherwise),
                    result_ty,
                )
            }
            FormulaFunction::Sum => {
                let total = all()
                    .into_iter()
                    .map(|expr| func("COALESCE", vec![expr, int_lit(0)]))
                    .reduce(|left, right| left.binary(BinaryOp::Plus, right))
                    .unwrap_or_else(|| int_lit(0));
                (total, FormulaType::Number)
            }
            FormulaFunction::Max => (self.dialect.greatest(all()), FormulaType::Number),
            FormulaFunction::Min => (self.dialect.least(all()), FormulaType::Number),
            FormulaFunction::Blank => (null(), FormulaType::Text),
        })
    }

    fn concat(&self, parts: Vec<SqlExpr>) -> SqlExpr {
        let text = self.dialect.text_type();
        parts
            .into_iter()
            .map(|part| func("COALESCE", vec![part.cast(text), text_lit("")]))
            .reduce(|left, right| left.binary(BinaryOp::Concat, right))
            .unwrap_or_else(|| text_lit(""))
    }

    fn truthy(&self, expr: SqlExpr, ty: FormulaType) -> SqlExpr {
        match ty {
            FormulaType::Boolean => expr,
            FormulaType::Number => expr.binary(BinaryOp::NotEq, int_lit(0)),
            FormulaType::Text => expr.binary(BinaryOp::NotEq, text_lit("")),
        }
    }
}

/// Casts a formula result to its column type. Postgres has no direct cast
/// between boolean and floating point, so those go through CASE.
fn coerce(
    dialect: &dyn Dialect,
    expr: SqlExpr,
    ty: FormulaType,
    storage: StorageType,
) -> SqlExpr {
    if expr.is_null_literal() {
        return dialect.typed_null(storage);
    }
    match (ty, storage) {
        (FormulaType::Boolean, StorageType::Integer | StorageType::Real) => {
            dialect.cast_to(case_when(expr, int_lit(1), Some(int_lit(0))), storage)
        }
        (FormulaType::Number, StorageType::Boolean) => expr.binary(BinaryOp::NotEq, int_lit(0)),
        _ => dialect.cast_to(expr, storage),
    }
}

#[cfg(test)]
mod tests {
    use super::FormulaCompiler;
    use crate::backend::SqlDialect;
    use crate::dialect::dialect_for;
    use crate::domain::{Field, FormulaBinaryOp, FormulaExpr, FormulaFunction};
    use crate::sql::ast::{col, SqlExpr};
    use crate::sql::render_expr;
    use crate::test_support::sales_domain;
    use crate::{EngineError, Value};

    fn compile(kind: SqlDialect, field_id: &str, expr: &FormulaExpr) -> String {
        let domain = sales_domain();
        let field = domain.field(field_id).unwrap().clone();
        let mut compiler = FormulaCompiler {
            domain: &domain,
            dialect: dialect_for(kind),
            resolve: |field: &Field| -> Result<SqlExpr, EngineError> {
                Ok(col("t", field.physical_column()))
            },
        };
        let sql = compiler.compile_field(&field, expr).unwrap();
        render_expr(&sql, kind).sql
    }

    #[test]
    fn references_resolve_through_the_callback() {
        let expr = FormulaExpr::binary(
            FormulaBinaryOp::Multiply,
            FormulaExpr::field("p_total"),
            FormulaExpr::number(2.0),
        );
        assert_eq!(
            compile(SqlDialect::Sqlite, "p_total_x2", &expr),
            "CAST((\"t\".\"p_total\" * 2.0) AS REAL)"
        );
    }

    #[test]
    fn division_is_guarded_on_postgres() {
        let expr = FormulaExpr::binary(
            FormulaBinaryOp::Divide,
            FormulaExpr::field("p_total"),
            FormulaExpr::number(0.0),
        );
        let sql = compile(SqlDialect::Postgres, "p_total_x2", &expr);
        assert!(sql.contains("NULLIF(CAST(0.0 AS double precision), 0)"), "{sql}");
    }

    #[test]
    fn max_uses_greatest_on_postgres_and_scalar_max_on_sqlite() {
        let expr = FormulaExpr::call(
            FormulaFunction::Max,
            vec![FormulaExpr::field("p_total"), FormulaExpr::number(10.0)],
        );
        assert!(compile(SqlDialect::Postgres, "p_total_x2", &expr).contains("GREATEST("));
        assert!(compile(SqlDialect::Sqlite, "p_total_x2", &expr).contains("MAX("));
    }

    #[test]
    fn blank_is_a_typed_null() {
        let expr = FormulaExpr::call(FormulaFunction::Blank, Vec::new());
        assert_eq!(
            compile(SqlDialect::Postgres, "p_total_x2", &expr),
            "CAST(NULL AS double precision)"
        );
    }

    #[test]
    fn concat_coalesces_each_part_to_text() {
        let domain = sales_domain();
        let field = domain.field("p_name").unwrap().clone();
        let expr = FormulaExpr::binary(
            FormulaBinaryOp::Concat,
            FormulaExpr::field("p_name"),
            FormulaExpr::text("!"),
        );
        let mut compiler = FormulaCompiler {
            domain: &domain,
            dialect: dialect_for(SqlDialect::Sqlite),
            resolve: |field: &Field| -> Result<SqlExpr, EngineError> {
                Ok(col("t", field.physical_column()))
            },
        };
        let compiled = compiler.compile_field(&field, &expr).unwrap();
        let rendered = render_expr(&compiled, SqlDialect::Sqlite);
        assert_eq!(
            rendered.sql,
            "CAST((COALESCE(CAST(\"t\".\"name\" AS TEXT), '') || \
             COALESCE(CAST(? AS TEXT), '')) AS TEXT)"
        );
        assert_eq!(rendered.params, vec![Value::from("!")]);
    }
}
