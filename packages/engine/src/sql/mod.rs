//! Structured SQL construction, rendering and pre-flight validation.

pub mod ast;
mod render;
mod validate;

pub use render::{
    escape_sql_string, quote_ident, render_expr, render_select, render_update, Statement,
};
pub use validate::validate_statement;
