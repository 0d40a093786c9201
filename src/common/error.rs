use thiserror::Error;

use crate::common::error::SpoolError::GenericError;

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Structural error: {0}")]
    StructuralError(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_yaml::Error> for SpoolError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::ConfigError(error.to_string())
    }
}

impl From<anyhow::Error> for SpoolError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(error.to_string())
    }
}

impl From<String> for SpoolError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}

pub fn error<T>(message: String) -> crate::Result<T> {
    Err(GenericError(message))
}
