#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub code: String,
    pub title: String,
    pub description: String,
}

impl EngineError {
    pub fn new(code: &str, title: &str, description: &str) -> Self {
        Self {
            code: code.to_string(),
            title: title.to_string(),
            description: description.to_string(),
        }
    }

    pub fn unknown(description: impl Into<String>) -> Self {
        Self {
            code: "COMPUTED_ERROR_UNKNOWN".to_string(),
            title: "Unknown error".to_string(),
            description: description.into(),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.code, self.title, self.description)
    }
}

impl std::error::Error for EngineError {}
