use thiserror::Error;

/// Main error type for scanchain operations
#[derive(Error, Debug)]
pub enum ScanChainError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Design error: {0}")]
    Design(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No scan chain controller configured")]
    MissingController,

    #[error("Did not find any usages of the controller {controller} under {top}")]
    ControllerNotFound { controller: String, top: String },

    #[error("No starting point: configure a controller or export starts")]
    NoStartingPoint,

    #[error("Scan chain validation failed: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ScanChainError>;
