//! Error types for the table store

use thiserror::Error;

pub type Result<T> = std::result::Result<T, JqlError>;

#[derive(Error, Debug)]
pub enum JqlError {
    #[error("table does not exist: {0}")]
    TableNotFound(String),

    #[error("no such column '{column}' in table '{table}'")]
    ColumnNotFound { table: String, column: String },

    #[error("no such pk '{pk}' in table '{table}'")]
    RowNotFound { table: String, pk: String },

    #[error("pk '{pk}' already exists in table '{table}'")]
    DuplicateKey { table: String, pk: String },

    #[error("invalid value for {column}: {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("cannot increment {0}")]
    NotIncrementable(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("payload of {size} bytes exceeds the maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("{message}")]
    Remote { code: String, message: String },

    #[error("macro error: {0}")]
    Macro(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

impl JqlError {
    /// Get error code for wire protocol
    pub fn code(&self) -> &str {
        match self {
            JqlError::TableNotFound(_) => "TABLE_NOT_FOUND",
            JqlError::ColumnNotFound { .. } => "COLUMN_NOT_FOUND",
            JqlError::RowNotFound { .. } => "ROW_NOT_FOUND",
            JqlError::DuplicateKey { .. } => "DUPLICATE_KEY",
            JqlError::InvalidValue { .. } => "INVALID_VALUE",
            JqlError::NotIncrementable(_) => "NOT_INCREMENTABLE",
            JqlError::InvalidFilter(_) => "INVALID_FILTER",
            JqlError::Schema(_) => "SCHEMA_ERROR",
            JqlError::Io(_) | JqlError::Json(_) | JqlError::Encoding(_) => "CODEC_ERROR",
            JqlError::Transport(_) => "TRANSPORT_ERROR",
            JqlError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            JqlError::Remote { code, .. } => code.as_str(),
            JqlError::Macro(_) => "MACRO_ERROR",
            JqlError::Cancelled => "CANCELLED",
            JqlError::Config(_) => "CONFIG_ERROR",
        }
    }

    pub(crate) fn invalid_value(column: &str, reason: impl Into<String>) -> Self {
        JqlError::InvalidValue {
            column: column.to_string(),
            reason: reason.into(),
        }
    }
}
