use crate::errors;
use crate::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ids per recompute pass for the record-id strategy.
    pub record_batch_size: usize,
    /// Largest known id set still executed by id; bigger sets page by cursor.
    pub record_id_strategy_limit: usize,
    pub cursor_page_size: usize,
    /// Parse every compiled statement with `sqlparser` before execution.
    pub validate_sql: bool,
    /// Postgres only: emit `AS MATERIALIZED` for CTEs joined more than once.
    pub materialize_ctes: bool,
    pub user_table: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            record_batch_size: 500,
            record_id_strategy_limit: 5_000,
            cursor_page_size: 1_000,
            validate_sql: false,
            materialize_ctes: false,
            user_table: "users".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|error| errors::invalid_config_error(&error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.record_batch_size == 0 {
            return Err(errors::invalid_config_error(
                "record_batch_size must be greater than zero",
            ));
        }
        if self.cursor_page_size == 0 {
            return Err(errors::invalid_config_error(
                "cursor_page_size must be greater than zero",
            ));
        }
        if self.user_table.trim().is_empty() {
            return Err(errors::invalid_config_error("user_table must not be empty"));
        }
        Ok(())
    }
}
