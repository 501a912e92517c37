//! In-process object store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{AdapterError, ObjectStore};

const SERVICE: &str = "memory-store";
const SCHEME: &str = "mem://";

/// Objects kept in a shared map. Clones see the same objects.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.objects
            .read()
            .map(|o| o.contains_key(key))
            .unwrap_or(false)
    }

    fn reference(key: &str) -> String {
        format!("{}{}", SCHEME, key)
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<String, AdapterError> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| AdapterError::transient(SERVICE, "lock poisoned"))?;
        objects.insert(key.to_string(), bytes.to_vec());
        Ok(Self::reference(key))
    }

    fn get(&self, reference: &str) -> Result<Vec<u8>, AdapterError> {
        let key = reference.strip_prefix(SCHEME).ok_or_else(|| {
            AdapterError::permanent(SERVICE, format!("not a memory reference: {}", reference))
        })?;
        let objects = self
            .objects
            .read()
            .map_err(|_| AdapterError::transient(SERVICE, "lock poisoned"))?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| AdapterError::permanent(SERVICE, format!("object not found: {}", key)))
    }

    fn head(&self, key: &str) -> Result<Option<String>, AdapterError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| AdapterError::transient(SERVICE, "lock poisoned"))?;
        Ok(objects.contains_key(key).then(|| Self::reference(key)))
    }
}
