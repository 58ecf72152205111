//! Structured SQL the compilers build instead of concatenating text.
//!
//! Identifiers are always quoted on render, `Literal` is reserved for
//! internal constants, and anything that came from a user (filter values,
//! record ids, formula text) travels as a `Param`.

use crate::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(String);

impl Ident {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Ident {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Ident {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&String> for Ident {
    fn from(value: &String) -> Self {
        Self(value.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Integer(i64),
    Real(f64),
    Bool(bool),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Concat,
    Like,
    NotLike,
    /// Postgres `->>`
    JsonGetText,
}

impl BinaryOp {
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Concat => "||",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::JsonGetText => "->>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Minus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expr: SqlExpr,
    pub descending: bool,
    pub nulls_last: bool,
}

impl OrderByItem {
    pub fn asc(expr: SqlExpr) -> Self {
        Self {
            expr,
            descending: false,
            nulls_last: false,
        }
    }

    pub fn desc(expr: SqlExpr) -> Self {
        Self {
            expr,
            descending: true,
            nulls_last: false,
        }
    }

    pub fn nulls_last(mut self) -> Self {
        self.nulls_last = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WindowSpec {
    pub partition_by: Vec<SqlExpr>,
    pub order_by: Vec<OrderByItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: &'static str,
    pub distinct: bool,
    pub args: Vec<SqlExpr>,
    pub order_by: Vec<OrderByItem>,
    pub filter: Option<Box<SqlExpr>>,
    pub over: Option<WindowSpec>,
}

impl FunctionCall {
    pub fn new(name: &'static str, args: Vec<SqlExpr>) -> Self {
        Self {
            name,
            distinct: false,
            args,
            order_by: Vec::new(),
            filter: None,
            over: None,
        }
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn order_by(mut self, order_by: Vec<OrderByItem>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn filter(mut self, condition: SqlExpr) -> Self {
        self.filter = Some(Box::new(condition));
        self
    }

    pub fn over(mut self, window: WindowSpec) -> Self {
        self.over = Some(window);
        self
    }

    pub fn into_expr(self) -> SqlExpr {
        SqlExpr::Function(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    Column {
        qualifier: Option<Ident>,
        name: Ident,
    },
    Literal(Literal),
    Param(Value),
    Cast {
        expr: Box<SqlExpr>,
        data_type: &'static str,
    },
    Function(FunctionCall),
    Binary {
        left: Box<SqlExpr>,
        op: BinaryOp,
        right: Box<SqlExpr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<SqlExpr>,
    },
    IsNull {
        expr: Box<SqlExpr>,
        negated: bool,
    },
    InList {
        expr: Box<SqlExpr>,
        list: Vec<SqlExpr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<SqlExpr>,
        subquery: Box<Select>,
        negated: bool,
    },
    Case {
        branches: Vec<(SqlExpr, SqlExpr)>,
        else_result: Option<Box<SqlExpr>>,
    },
    Exists(Box<Select>),
    Subquery(Box<Select>),
    Nested(Box<SqlExpr>),
    /// `*` inside `COUNT(*)`.
    Star,
}

pub fn col(qualifier: impl Into<Ident>, name: impl Into<Ident>) -> SqlExpr {
    SqlExpr::Column {
        qualifier: Some(qualifier.into()),
        name: name.into(),
    }
}

pub fn bare_col(name: impl Into<Ident>) -> SqlExpr {
    SqlExpr::Column {
        qualifier: None,
        name: name.into(),
    }
}

pub fn func(name: &'static str, args: Vec<SqlExpr>) -> SqlExpr {
    SqlExpr::Function(FunctionCall::new(name, args))
}

pub fn text_lit(value: &str) -> SqlExpr {
    SqlExpr::Literal(Literal::Text(value.to_string()))
}

pub fn int_lit(value: i64) -> SqlExpr {
    SqlExpr::Literal(Literal::Integer(value))
}

pub fn null() -> SqlExpr {
    SqlExpr::Literal(Literal::Null)
}

pub fn param(value: impl Into<Value>) -> SqlExpr {
    SqlExpr::Param(value.into())
}

/// Conjunction of every condition; `None` when the list is empty.
pub fn and_all(conditions: impl IntoIterator<Item = SqlExpr>) -> Option<SqlExpr> {
    conditions.into_iter().reduce(|left, right| left.and(right))
}

pub fn or_all(conditions: impl IntoIterator<Item = SqlExpr>) -> Option<SqlExpr> {
    conditions.into_iter().reduce(|left, right| left.or(right))
}

pub fn case_when(condition: SqlExpr, result: SqlExpr, else_result: Option<SqlExpr>) -> SqlExpr {
    SqlExpr::Case {
        branches: vec![(condition, result)],
        else_result: else_result.map(Box::new),
    }
}

impl SqlExpr {
    pub fn binary(self, op: BinaryOp, right: SqlExpr) -> SqlExpr {
        SqlExpr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(self, right: SqlExpr) -> SqlExpr {
        self.binary(BinaryOp::Eq, right)
    }

    pub fn and(self, right: SqlExpr) -> SqlExpr {
        self.binary(BinaryOp::And, right)
    }

    pub fn or(self, right: SqlExpr) -> SqlExpr {
        self.binary(BinaryOp::Or, right)
    }

    pub fn is_null(self) -> SqlExpr {
        SqlExpr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> SqlExpr {
        SqlExpr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    pub fn cast(self, data_type: &'static str) -> SqlExpr {
        SqlExpr::Cast {
            expr: Box::new(self),
            data_type,
        }
    }

    pub fn not(self) -> SqlExpr {
        SqlExpr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(self),
        }
    }

    pub fn in_list(self, list: Vec<SqlExpr>) -> SqlExpr {
        SqlExpr::InList {
            expr: Box::new(self),
            list,
            negated: false,
        }
    }

    pub fn in_subquery(self, subquery: Select) -> SqlExpr {
        SqlExpr::InSubquery {
            expr: Box::new(self),
            subquery: Box::new(subquery),
            negated: false,
        }
    }

    pub fn is_null_literal(&self) -> bool {
        matches!(self, SqlExpr::Literal(Literal::Null))
            || matches!(self, SqlExpr::Cast { expr, .. } if expr.is_null_literal())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: SqlExpr,
    pub alias: Option<Ident>,
}

impl SelectItem {
    pub fn aliased(expr: SqlExpr, alias: impl Into<Ident>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableFactor {
    Table {
        name: Ident,
        alias: Option<Ident>,
    },
    Derived {
        subquery: Box<Select>,
        alias: Ident,
    },
    Function {
        call: FunctionCall,
        alias: Ident,
    },
}

impl TableFactor {
    pub fn table(name: impl Into<Ident>, alias: impl Into<Ident>) -> Self {
        Self::Table {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }

    pub fn derived(subquery: Select, alias: impl Into<Ident>) -> Self {
        Self::Derived {
            subquery: Box::new(subquery),
            alias: alias.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub relation: TableFactor,
    pub on: Option<SqlExpr>,
}

impl Join {
    pub fn left(relation: TableFactor, on: SqlExpr) -> Self {
        Self {
            kind: JoinKind::Left,
            relation,
            on: Some(on),
        }
    }

    pub fn inner(relation: TableFactor, on: SqlExpr) -> Self {
        Self {
            kind: JoinKind::Inner,
            relation,
            on: Some(on),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: Ident,
    pub materialized: bool,
    pub query: Select,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Select {
    pub with: Vec<Cte>,
    pub distinct: bool,
    pub projection: Vec<SelectItem>,
    pub from: Option<TableFactor>,
    pub joins: Vec<Join>,
    pub selection: Option<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<SqlExpr>,
}

impl Select {
    pub fn from(relation: TableFactor) -> Self {
        Self {
            from: Some(relation),
            ..Self::default()
        }
    }

    pub fn project(mut self, expr: SqlExpr, alias: impl Into<Ident>) -> Self {
        self.projection.push(SelectItem::aliased(expr, alias));
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// ANDs `condition` onto the existing WHERE clause.
    pub fn filter(mut self, condition: SqlExpr) -> Self {
        self.selection = match self.selection.take() {
            Some(existing) => Some(existing.and(condition)),
            None => Some(condition),
        };
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: Ident,
    pub value: SqlExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: Ident,
    pub assignments: Vec<Assignment>,
    pub selection: Option<SqlExpr>,
    pub returning: Vec<SqlExpr>,
}
