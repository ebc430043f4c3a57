//! Core error types for ecotale-core.
//!
//! This module defines the error hierarchy using thiserror. Only a few of
//! these ever reach a caller: persistence and caching failures are logged
//! and swallowed by the components that own them.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Core error type for ecotale-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Durable storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Rejected input at the call boundary
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Remote read failures surfaced through the fetch coordinator
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Durable storage errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backing store refused the write because it is full.
    #[error("Storage quota exceeded while writing '{namespace}'")]
    QuotaExceeded { namespace: String },

    /// Any other backend failure (locked database, I/O, ...)
    #[error("Storage backend failure: {0}")]
    Backend(String),

    /// Bytes under a namespace could not be decoded
    #[error("Corrupt data in '{namespace}': {message}")]
    Corrupt { namespace: String, message: String },
}

impl StorageError {
    pub fn is_quota(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Failures of a single remote read. `Clone` so it can live in fetch state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The loader itself failed
    #[error("{0}")]
    Loader(String),

    /// The loader did not finish in time
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The load was superseded or torn down
    #[error("Request cancelled")]
    Cancelled,
}

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Weight must be strictly positive
    #[error("Invalid weight {0}: recycled weight must be greater than zero")]
    NonPositiveWeight(f64),

    /// NaN or infinite weights
    #[error("Invalid weight: value is not a finite number")]
    NonFiniteWeight,

    /// Negative CO2 savings
    #[error("Invalid CO2 value {0}: must not be negative")]
    NegativeCo2(f64),

    /// Missing material type
    #[error("Material type must not be empty")]
    EmptyMaterial,

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) if e.code == rusqlite::ErrorCode::DiskFull => {
                StorageError::QuotaExceeded {
                    namespace: String::new(),
                }
            }
            _ => StorageError::Backend(err.to_string()),
        }
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for CoreError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        CoreError::Custom(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
