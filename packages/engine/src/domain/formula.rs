use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FormulaBinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    And,
    Or,
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FormulaUnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FormulaFunction {
    Abs,
    Round,
    Ceiling,
    Floor,
    Upper,
    Lower,
    Len,
    Concatenate,
    If,
    Sum,
    Max,
    Min,
    Blank,
}

impl FormulaFunction {
    /// Accepted argument counts as an inclusive range; `None` means unbounded.
    pub const fn arity(self) -> (usize, Option<usize>) {
        match self {
            Self::Abs | Self::Ceiling | Self::Floor | Self::Upper | Self::Lower | Self::Len => {
                (1, Some(1))
            }
            Self::Round => (1, Some(2)),
            Self::If => (2, Some(3)),
            Self::Concatenate | Self::Sum | Self::Max | Self::Min => (1, None),
            Self::Blank => (0, Some(0)),
        }
    }
}

/// Pre-parsed formula tree. Field references point at fields of the same
/// table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FormulaExpr {
    Field {
        id: String,
    },
    Number {
        value: f64,
    },
    Text {
        value: String,
    },
    Boolean {
        value: bool,
    },
    Binary {
        op: FormulaBinaryOp,
        left: Box<FormulaExpr>,
        right: Box<FormulaExpr>,
    },
    Unary {
        op: FormulaUnaryOp,
        expr: Box<FormulaExpr>,
    },
    Call {
        function: FormulaFunction,
        args: Vec<FormulaExpr>,
    },
}

impl FormulaExpr {
    pub fn field(id: &str) -> Self {
        Self::Field { id: id.to_string() }
    }

    pub fn number(value: f64) -> Self {
        Self::Number { value }
    }

    pub fn text(value: &str) -> Self {
        Self::Text {
            value: value.to_string(),
        }
    }

    pub fn binary(op: FormulaBinaryOp, left: FormulaExpr, right: FormulaExpr) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn call(function: FormulaFunction, args: Vec<FormulaExpr>) -> Self {
        Self::Call { function, args }
    }

    pub fn referenced_field_ids(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Field { id } => {
                out.insert(id.clone());
            }
            Self::Number { .. } | Self::Text { .. } | Self::Boolean { .. } => {}
            Self::Binary { left, right, .. } => {
                left.collect_references(out);
                right.collect_references(out);
            }
            Self::Unary { expr, .. } => expr.collect_references(out),
            Self::Call { args, .. } => {
                for arg in args {
                    arg.collect_references(out);
                }
            }
        }
    }

    /// First function call whose argument count is outside its arity.
    pub fn arity_violation(&self) -> Option<FormulaFunction> {
        match self {
            Self::Binary { left, right, .. } => {
                left.arity_violation().or_else(|| right.arity_violation())
            }
            Self::Unary { expr, .. } => expr.arity_violation(),
            Self::Call { function, args } => {
                let (min, max) = function.arity();
                if args.len() < min || max.is_some_and(|max| args.len() > max) {
                    return Some(*function);
                }
                args.iter().find_map(FormulaExpr::arity_violation)
            }
            _ => None,
        }
    }
}
