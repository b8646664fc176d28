//! Object storage interface for snapshot blobs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::ObjectStoreError;

/// Result type alias for object store operations.
pub type Result<T> = std::result::Result<T, ObjectStoreError>;

/// Interface to the snapshot bucket.
///
/// Keys are flat strings; `snapshot-<config_version>.json` keys sort
/// lexically to version order, which is how clients find the newest
/// snapshot without any index.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All object keys in the bucket.
    async fn list(&self) -> Result<Vec<String>>;

    /// Full contents of one object.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Create or overwrite one object.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Object store over a local directory; one file per object.
pub struct LocalDirObjectStore {
    root: PathBuf,
}

impl LocalDirObjectStore {
    /// Use `root` as the bucket, creating it if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }
}

#[async_trait]
impl ObjectStore for LocalDirObjectStore {
    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Ok(name) = entry.file_name().into_string() {
                    keys.push(name);
                }
            }
        }
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.root.join(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        tokio::fs::write(self.root.join(key), bytes).await?;
        Ok(())
    }
}

/// In-memory object store for tests.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.objects.read().await.keys().cloned().collect())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.objects
            .write()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}
