mod config;
pub mod database;

pub use config::{CalendarConfig, Config};
pub use database::Database;

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ConfigError, StorageError};
use crate::ports::DurableStore;

/// Durable namespaces owned by the engine's components.
pub mod namespaces {
    /// Prefix of per-key cache entries (`ecotale:cache:<key>`).
    pub const CACHE_PREFIX: &str = "ecotale:cache:";
    pub const TASKS: &str = "ecotale:tasks";
    pub const NOTIFICATIONS: &str = "ecotale:notifications";
    pub const ACHIEVEMENTS: &str = "ecotale:achievements";
}

/// Returns `~/.config/ecotale[-dev]/` based on ECOTALE_ENV.
///
/// Set ECOTALE_ENV=dev to use development data directory, or
/// ECOTALE_DATA_DIR to point somewhere else entirely.
///
/// # Errors
/// Returns an error if creating the data directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("ECOTALE_DATA_DIR") {
        Some(explicit) => PathBuf::from(explicit),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env = std::env::var("ECOTALE_ENV").unwrap_or_else(|_| "production".to_string());

            if env == "dev" {
                base_dir.join("ecotale-dev")
            } else {
                base_dir.join("ecotale")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}

/// What a component found in durable storage at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hydration {
    /// Nothing stored yet (first run).
    Empty,
    /// State restored; `items` counts the restored records.
    Restored { items: usize },
    /// Stored bytes were unreadable and have been ignored.
    Discarded { reason: String },
}

/// Read and decode a namespace.
///
/// Backend failures are errors; undecodable bytes come back as
/// `Hydration::Discarded` alongside `None`, so foreign or corrupted data
/// never stops startup.
pub(crate) fn load_json<T: DeserializeOwned>(
    store: &dyn DurableStore,
    namespace: &str,
) -> Result<(Option<T>, Option<String>), StorageError> {
    let Some(bytes) = store.load_namespace(namespace)? else {
        return Ok((None, None));
    };
    match serde_json::from_slice::<T>(&bytes) {
        Ok(value) => Ok((Some(value), None)),
        Err(e) => {
            tracing::warn!(namespace, error = %e, "discarding unreadable persisted state");
            Ok((None, Some(e.to_string())))
        }
    }
}

/// Serialize the whole value first, then hand it to the store in one call.
pub(crate) fn save_json<T: Serialize>(
    store: &dyn DurableStore,
    namespace: &str,
    value: &T,
) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec(value).map_err(|e| StorageError::Corrupt {
        namespace: namespace.to_string(),
        message: e.to_string(),
    })?;
    store.save_namespace(namespace, &bytes)
}

/// `save_json` for state whose persistence is best-effort: failures are
/// logged and swallowed.
pub(crate) fn persist_best_effort<T: Serialize>(
    store: &dyn DurableStore,
    namespace: &str,
    value: &T,
) -> bool {
    match save_json(store, namespace, value) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(namespace, error = %e, "failed to persist state; continuing in memory");
            false
        }
    }
}
