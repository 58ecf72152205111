use sqlparser::ast::Statement as ParsedStatement;
use sqlparser::dialect::{PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

use crate::backend::SqlDialect;
use crate::errors;
use crate::EngineError;

fn parse_sql_statements(
    sql: &str,
    dialect: SqlDialect,
) -> Result<Vec<ParsedStatement>, EngineError> {
    let parsed = match dialect {
        SqlDialect::Sqlite => Parser::parse_sql(&SQLiteDialect {}, sql),
        SqlDialect::Postgres => Parser::parse_sql(&PostgreSqlDialect {}, sql),
    };
    parsed.map_err(|error| errors::invalid_sql_error(sql, &error.to_string()))
}

/// Pre-flight check that compiled SQL is exactly one statement the target
/// dialect's grammar accepts.
pub fn validate_statement(sql: &str, dialect: SqlDialect) -> Result<(), EngineError> {
    let statements = parse_sql_statements(sql, dialect)?;
    if statements.len() != 1 {
        return Err(errors::invalid_sql_error(
            sql,
            &format!("expected one statement, found {}", statements.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::validate_statement;
    use crate::backend::SqlDialect;

    #[test]
    fn accepts_placeholders_of_each_dialect() {
        validate_statement("SELECT \"a\" FROM \"t\" WHERE \"b\" = ?", SqlDialect::Sqlite).unwrap();
        validate_statement("SELECT \"a\" FROM \"t\" WHERE \"b\" = $1", SqlDialect::Postgres)
            .unwrap();
    }

    #[test]
    fn rejects_malformed_sql() {
        let err = validate_statement("SELECT * FROM (", SqlDialect::Postgres).unwrap_err();
        assert_eq!(err.code, "COMPUTED_ERROR_INVALID_SQL");
    }

    #[test]
    fn rejects_multiple_statements() {
        let err = validate_statement("SELECT 1; SELECT 2", SqlDialect::Sqlite).unwrap_err();
        assert!(err.description.contains("expected one statement"));
    }
}
