//! Durable bucketed key/value storage for dedup state.

pub mod error;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

const HEALTH_BUCKET: &str = "health";

/// Bucketed byte-string store.
///
/// A `put` must be visible to every later `get` of the same bucket and key.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    async fn put(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Write `ping -> pong` and read it back.
    async fn ping(&self) -> Result<(), StorageError> {
        self.put(HEALTH_BUCKET, b"ping", b"pong").await?;
        match self.get(HEALTH_BUCKET, b"ping").await? {
            Some(value) if value == b"pong" => Ok(()),
            Some(_) => Err(StorageError::HealthCheck("ping read back a different value".into())),
            None => Err(StorageError::HealthCheck("ping was not persisted".into())),
        }
    }
}

#[async_trait::async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(bucket, key).await
    }

    async fn put(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        (**self).put(bucket, key, value).await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        (**self).ping().await
    }
}
