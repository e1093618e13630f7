use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::StoreError;
use crate::store::keys::file_name;

pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;
    fn save(&self, key: &str, value: String) -> impl Future<Output = Result<(), StoreError>> + Send;
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn save(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// One JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(file_name(key))
    }
}

impl KeyValueStore for JsonFileStore {
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(payload) => Ok(Some(payload)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, key: &str, value: String) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
