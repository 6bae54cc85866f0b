use thiserror::Error;

/// Dataset-level failures. Per-record problems never end up here; they are
/// dropped during normalization and only show up in the coverage counters.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("no assessment data: {0}")]
    MissingInputData(String),

    #[error("invalid grade scale: {0}")]
    InvalidScale(String),

    #[error("invalid table {table}: {message}")]
    InvalidTable { table: String, message: String },

    #[error("{0}")]
    BadParams(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::MissingInputData(_) => "no_assessment_data",
            EngineError::InvalidScale(_) => "bad_params",
            EngineError::InvalidTable { .. } => "bad_params",
            EngineError::BadParams(_) => "bad_params",
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        EngineError::BadParams(message.into())
    }
}
