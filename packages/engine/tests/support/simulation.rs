use std::future::Future;

use computed_engine::{boot, BootArgs, Engine, EngineConfig, EngineError, Value};

use super::sqlite_backend::SqliteBackend;

/// One test run against a fresh in-memory database.
pub struct Simulation {
    pub name: &'static str,
}

impl Simulation {
    /// Boots an engine over an empty database with `schema` applied.
    pub async fn boot_engine(
        &self,
        config: Option<EngineConfig>,
        schema: &str,
    ) -> Result<Engine, EngineError> {
        let backend = SqliteBackend::in_memory()?;
        let engine = boot(
            BootArgs::new(Box::new(backend)).with_config(config.unwrap_or_default()),
        )?;
        engine.execute(schema, &[]).await?;
        Ok(engine)
    }
}

pub async fn run_sqlite_test<F, Fut>(name: &'static str, test: F)
where
    F: FnOnce(Simulation) -> Fut,
    Fut: Future<Output = ()>,
{
    test(Simulation { name }).await;
}

pub async fn exec(engine: &Engine, sql: &str, params: &[Value]) {
    engine
        .execute(sql, params)
        .await
        .unwrap_or_else(|err| panic!("statement failed: {err}\n{sql}"));
}

/// Single stored value of `column` for record `id`.
pub async fn stored(engine: &Engine, table: &str, column: &str, id: &str) -> Value {
    let sql = format!("SELECT \"{column}\" FROM \"{table}\" WHERE \"__id\" = ?");
    let result = engine
        .execute(&sql, &[Value::from(id)])
        .await
        .expect("stored value query should succeed");
    result
        .rows
        .first()
        .and_then(|row| row.first())
        .cloned()
        .unwrap_or_else(|| panic!("record {id} missing from {table}"))
}

pub async fn version(engine: &Engine, table: &str, id: &str) -> i64 {
    stored(engine, table, "__version", id)
        .await
        .as_i64()
        .expect("version is an integer")
}

pub fn real(value: &Value) -> f64 {
    value
        .as_f64()
        .unwrap_or_else(|| panic!("expected a number, got {value:?}"))
}
