//! Port traits.
//!
//! The object store is the only external collaborator of the archive engine.

use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Byte stream of a downloaded object.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Remote blob storage addressed by bucket and key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `source` and return the number of bytes stored.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        storage_class: Option<&str>,
    ) -> Result<u64>;

    /// Open an object for reading.
    ///
    /// A missing object must be reported as [`crate::Error::NotFound`].
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader>;

    /// Remove an object. Removing a missing object is not an error.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}
