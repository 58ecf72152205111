//! SQL compilation of computed fields.
//!
//! `context` holds the per-pass state, `cte` and `conditional` build the
//! CTEs and subqueries, `select` resolves single fields and `query`
//! assembles whole statements.

mod conditional;
mod context;
mod cte;
mod filter;
mod formula;
mod query;
mod select;

pub use context::NestedMode;
pub use query::{compile_query, compile_recompute, CompiledQuery, QueryOptions, RecomputeQuery};
pub use select::SelectMode;
