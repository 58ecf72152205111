use crate::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    CycleDetected,
    InvalidRollupExpression,
    MissingForeignTable,
    MissingField,
    InvalidLinkOptions,
    InvalidFieldDefinition,
    UnsupportedDriver,
    InvalidSql,
    Backend,
    InvalidConfig,
    HandlerAborted,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CycleDetected => "COMPUTED_ERROR_CYCLE_DETECTED",
            Self::InvalidRollupExpression => "COMPUTED_ERROR_INVALID_ROLLUP_EXPRESSION",
            Self::MissingForeignTable => "COMPUTED_ERROR_MISSING_FOREIGN_TABLE",
            Self::MissingField => "COMPUTED_ERROR_MISSING_FIELD",
            Self::InvalidLinkOptions => "COMPUTED_ERROR_INVALID_LINK_OPTIONS",
            Self::InvalidFieldDefinition => "COMPUTED_ERROR_INVALID_FIELD_DEFINITION",
            Self::UnsupportedDriver => "COMPUTED_ERROR_UNSUPPORTED_DRIVER",
            Self::InvalidSql => "COMPUTED_ERROR_INVALID_SQL",
            Self::Backend => "COMPUTED_ERROR_BACKEND",
            Self::InvalidConfig => "COMPUTED_ERROR_INVALID_CONFIG",
            Self::HandlerAborted => "COMPUTED_ERROR_HANDLER_ABORTED",
        }
    }

    pub const fn all() -> &'static [Self] {
        &[
            Self::CycleDetected,
            Self::InvalidRollupExpression,
            Self::MissingForeignTable,
            Self::MissingField,
            Self::InvalidLinkOptions,
            Self::InvalidFieldDefinition,
            Self::UnsupportedDriver,
            Self::InvalidSql,
            Self::Backend,
            Self::InvalidConfig,
            Self::HandlerAborted,
        ]
    }
}

fn build_error(code: ErrorCode, title: &str, description: &str) -> EngineError {
    EngineError::new(code.as_str(), title, description)
}

/// `path` lists field names in resolution order, ending with the field that
/// closed the cycle.
pub(crate) fn cycle_detected_error(path: &[String]) -> EngineError {
    build_error(
        ErrorCode::CycleDetected,
        "Field dependency cycle detected",
        &format!(
            "Fields depend on each other in a cycle: {}. Remove one of the references.",
            path.join(" -> ")
        ),
    )
}

pub(crate) fn invalid_rollup_expression_error(field_id: &str, expression: &str) -> EngineError {
    build_error(
        ErrorCode::InvalidRollupExpression,
        "Invalid rollup expression",
        &format!(
            "Rollup field `{field_id}` has expression `{expression}`. Expected `fn({{values}})` with a known function such as sum, count or array_join."
        ),
    )
}

pub(crate) fn missing_foreign_table_error(field_id: &str, table_id: &str) -> EngineError {
    build_error(
        ErrorCode::MissingForeignTable,
        "Foreign table does not exist",
        &format!(
            "Field `{field_id}` references table `{table_id}`, which is not part of the domain."
        ),
    )
}

pub(crate) fn missing_table_error(table_id: &str) -> EngineError {
    build_error(
        ErrorCode::MissingForeignTable,
        "Table does not exist",
        &format!("Table `{table_id}` is not part of the domain."),
    )
}

pub(crate) fn missing_field_error(field_id: &str, context: &str) -> EngineError {
    build_error(
        ErrorCode::MissingField,
        "Field does not exist",
        &format!("Field `{field_id}` does not exist ({context})."),
    )
}

pub(crate) fn invalid_link_options_error(field_id: &str, reason: &str) -> EngineError {
    build_error(
        ErrorCode::InvalidLinkOptions,
        "Invalid link configuration",
        &format!("Link field `{field_id}`: {reason}"),
    )
}

pub(crate) fn invalid_field_definition_error(field_id: &str, reason: &str) -> EngineError {
    build_error(
        ErrorCode::InvalidFieldDefinition,
        "Invalid field definition",
        &format!("Field `{field_id}`: {reason}"),
    )
}

pub(crate) fn unsupported_driver_error(driver: &str, operation: &str) -> EngineError {
    build_error(
        ErrorCode::UnsupportedDriver,
        "Unsupported database driver",
        &format!("`{operation}` is not implemented for driver `{driver}`."),
    )
}

pub(crate) fn invalid_sql_error(sql: &str, reason: &str) -> EngineError {
    build_error(
        ErrorCode::InvalidSql,
        "Compiled SQL failed to parse",
        &format!("{reason}. Statement: {sql}"),
    )
}

pub(crate) fn backend_error(description: &str) -> EngineError {
    build_error(ErrorCode::Backend, "Backend returned an unexpected result", description)
}

pub(crate) fn invalid_config_error(reason: &str) -> EngineError {
    build_error(ErrorCode::InvalidConfig, "Invalid engine configuration", reason)
}

pub(crate) fn handler_aborted_error(reason: &str) -> EngineError {
    build_error(
        ErrorCode::HandlerAborted,
        "Batch handler aborted execution",
        reason,
    )
}
