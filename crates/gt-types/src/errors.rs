use thiserror::Error;

/// Main error type for the GridTree system
#[derive(Error, Debug)]
pub enum RaoError {
    #[error("Sensitivity computation failed: {message}")]
    Sensitivity { message: String },

    #[error("No results available for {leaf}: evaluation has not succeeded")]
    NoResultsAvailable { leaf: String },

    #[error("Cannot optimize {leaf}: optimization data has been released")]
    LeafFinalized { leaf: String },

    #[error("Sensitivities of {leaf} have been released")]
    SensitivitiesReleased { leaf: String },

    #[error("Root leaf could not be evaluated: {message}")]
    RootLeafEvaluation { message: String },

    #[error("An action combination needs at least one network action")]
    EmptyCombination,

    #[error("Unknown {kind}: {id}")]
    UnknownElement { kind: String, id: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RaoError {
    pub fn unknown(kind: &str, id: impl Into<String>) -> Self {
        Self::UnknownElement {
            kind: kind.to_string(),
            id: id.into(),
        }
    }
}

/// Result type alias for GridTree operations
pub type RaoResult<T> = Result<T, RaoError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::RaoError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::RaoError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::RaoError::Config(format!($($arg)*))
    };
}
