use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::KeyValueStore;

/// Process-local store for tests and dry runs. Contents die with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<(String, Vec<u8>), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys in `bucket`.
    pub async fn len(&self, bucket: &str) -> usize {
        self.entries
            .read()
            .await
            .keys()
            .filter(|(b, _)| b == bucket)
            .count()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .entries
            .read()
            .await
            .get(&(bucket.to_string(), key.to_vec()))
            .cloned())
    }

    async fn put(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.entries
            .write()
            .await
            .insert((bucket.to_string(), key.to_vec()), value.to_vec());
        Ok(())
    }
}
