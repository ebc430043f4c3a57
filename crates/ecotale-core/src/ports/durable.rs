use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::StorageError;

/// Namespaced byte storage that survives restarts.
///
/// Each namespace holds one opaque value. `save_namespace` replaces the whole
/// value at once; implementations must never leave a half-written value.
pub trait DurableStore: Send + Sync {
    fn load_namespace(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn save_namespace(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError>;

    fn remove_namespace(&self, name: &str) -> Result<(), StorageError>;

    /// Names of every namespace starting with `prefix`, in lexical order.
    fn list_namespaces(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// In-process store. Optionally refuses writes past a fixed number of
/// namespaces, which is how quota pressure is simulated.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    capacity: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that raises `QuotaExceeded` once `max_namespaces` are in use.
    pub fn with_capacity(max_namespaces: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            capacity: Some(max_namespaces),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DurableStore for MemoryStore {
    fn load_namespace(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.lock().get(name).cloned())
    }

    fn save_namespace(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let mut entries = self.lock();
        if let Some(capacity) = self.capacity {
            if !entries.contains_key(name) && entries.len() >= capacity {
                return Err(StorageError::QuotaExceeded {
                    namespace: name.to_string(),
                });
            }
        }
        entries.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove_namespace(&self, name: &str) -> Result<(), StorageError> {
        self.lock().remove(name);
        Ok(())
    }

    fn list_namespaces(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
