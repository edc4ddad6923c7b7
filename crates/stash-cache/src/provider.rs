//! Local object store implementations.

use crate::keys::escape_key;
use async_trait::async_trait;
use stash_core::{Error, ObjectReader, ObjectStore, Result};
use std::collections::HashMap;
use std::io::{Cursor, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Filesystem-backed store for local development and self-hosted runners.
///
/// Objects live at `<root>/<bucket>/<key>` with both parts escaped into
/// single file names.
pub struct FilesystemStore {
    root_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root_dir
            .join(escape_key(bucket))
            .join(escape_key(key))
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        _storage_class: Option<&str>,
    ) -> Result<u64> {
        let path = self.object_path(bucket, key);
        let bucket_dir = self.root_dir.join(escape_key(bucket));
        tokio::fs::create_dir_all(&bucket_dir)
            .await
            .map_err(|e| Error::Store(format!("Failed to create bucket dir: {}", e)))?;

        // Copy to a private temp file next to the target and rename, so readers
        // never see a partial object and concurrent puts never share a file.
        // Escaped keys never start with `.`, so the temp name cannot clash.
        let partial = tempfile::Builder::new()
            .prefix(".put-")
            .tempfile_in(&bucket_dir)
            .map_err(|e| Error::Store(format!("Failed to stage object: {}", e)))?;
        let size = tokio::fs::copy(source, partial.path())
            .await
            .map_err(|e| Error::Store(format!("Failed to write object: {}", e)))?;
        partial
            .persist(&path)
            .map_err(|e| Error::Store(format!("Failed to publish object: {}", e.error)))?;

        tracing::debug!(path = %path.display(), size, "stored object");
        Ok(size)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader> {
        let path = self.object_path(bucket, key);
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(Error::Store(format!("Failed to read object: {}", e))),
        }
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let path = self.object_path(bucket, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Store(format!("Failed to delete object: {}", e))),
        }
    }

    fn name(&self) -> &str {
        "filesystem"
    }
}

/// In-memory store, mostly for tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.lock()?.insert((bucket.to_string(), key.to_string()), bytes);
        Ok(())
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .ok()?
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(String, String), Vec<u8>>>> {
        self.objects
            .lock()
            .map_err(|_| Error::Internal("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        _storage_class: Option<&str>,
    ) -> Result<u64> {
        let bytes = tokio::fs::read(source)
            .await
            .map_err(|e| Error::file(source, e))?;
        let size = bytes.len() as u64;
        self.insert(bucket, key, bytes)?;
        Ok(size)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader> {
        let bytes = self.object(bucket, key).ok_or_else(|| Error::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        Ok(Box::pin(Cursor::new(bytes)))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.lock()?.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
