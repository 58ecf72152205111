use std::sync::Mutex;

use async_trait::async_trait;
use computed_engine::{EngineBackend, EngineError, QueryResult, SqlDialect, Value};
use rusqlite::{params_from_iter, Connection, Row};

pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory().map_err(backend_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait(?Send)]
impl EngineBackend for SqliteBackend {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, EngineError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| EngineError::unknown("sqlite mutex poisoned"))?;

        if params.is_empty() && sql.contains(';') {
            conn.execute_batch(sql).map_err(backend_error)?;
            return Ok(QueryResult::default());
        }

        let mut stmt = conn.prepare(sql).map_err(|err| {
            EngineError::unknown(format!("{err} while preparing: {sql}"))
        })?;
        let bound_params = params.iter().cloned().map(to_sql_value);
        let mut rows = stmt
            .query(params_from_iter(bound_params))
            .map_err(backend_error)?;
        let mut result_rows = Vec::new();
        while let Some(row) = rows.next().map_err(backend_error)? {
            result_rows.push(map_row(row)?);
        }
        Ok(QueryResult { rows: result_rows })
    }
}

fn backend_error(err: rusqlite::Error) -> EngineError {
    EngineError::unknown(err.to_string())
}

fn map_row(row: &Row<'_>) -> Result<Vec<Value>, EngineError> {
    let mut values = Vec::new();
    for idx in 0..row.as_ref().column_count() {
        let value = row.get_ref(idx).map_err(backend_error)?;
        values.push(match value {
            rusqlite::types::ValueRef::Null => Value::Null,
            rusqlite::types::ValueRef::Integer(value) => Value::Integer(value),
            rusqlite::types::ValueRef::Real(value) => Value::Real(value),
            rusqlite::types::ValueRef::Text(value) => {
                Value::Text(String::from_utf8_lossy(value).to_string())
            }
            rusqlite::types::ValueRef::Blob(value) => Value::Blob(value.to_vec()),
        });
    }
    Ok(values)
}

fn to_sql_value(value: Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Integer(value) => rusqlite::types::Value::Integer(value),
        Value::Real(value) => rusqlite::types::Value::Real(value),
        Value::Text(value) => rusqlite::types::Value::Text(value),
        Value::Blob(value) => rusqlite::types::Value::Blob(value),
    }
}
