//! Error types for the colspool pipeline

/// Result type alias using ColspoolError
pub type Result<T> = std::result::Result<T, ColspoolError>;

/// Main error type for colspool operations
#[derive(Debug, thiserror::Error)]
pub enum ColspoolError {
    /// A native type code with no semantic mapping. Fatal before any
    /// conversion work: a guessed type would corrupt the columnar layout.
    #[error("unmapped database type code {code}")]
    UnknownType { code: i32 },

    /// A later batch disagrees with the inferred schema
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A value could not be coerced to its column's semantic type
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// Underlying cursor read failed
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Connection or statement-level driver failure
    #[error("driver error: {0}")]
    Driver(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant breakage
    #[error("internal error: {0}")]
    Internal(String),
}

impl ColspoolError {
    /// Create an internal error from any displayable error
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ColspoolError::Internal(err.to_string())
    }

    /// Get the stable error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            ColspoolError::UnknownType { .. } => "UNKNOWN_TYPE",
            ColspoolError::SchemaMismatch(_) => "SCHEMA_MISMATCH",
            ColspoolError::Conversion(_) => "CONVERSION_FAILED",
            ColspoolError::Fetch(_) => "FETCH_FAILED",
            ColspoolError::Driver(_) => "DRIVER_ERROR",
            ColspoolError::Config(_) => "CONFIG_ERROR",
            ColspoolError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<std::io::Error> for ColspoolError {
    fn from(err: std::io::Error) -> Self {
        ColspoolError::Driver(format!("IO error: {}", err))
    }
}

impl From<config::ConfigError> for ColspoolError {
    fn from(err: config::ConfigError) -> Self {
        ColspoolError::Config(err.to_string())
    }
}
