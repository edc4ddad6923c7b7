//! S3 and S3-compatible (R2, MinIO) object store.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::StorageClass;
use stash_core::{Error, ObjectReader, ObjectStore, Result};
use std::path::Path;

/// Connection settings for [`S3Store`]. Unset fields fall back to the
/// standard AWS environment and profile chain.
#[derive(Debug, Clone, Default)]
pub struct S3Settings {
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services.
    pub endpoint: Option<String>,
    pub force_path_style: bool,
}

pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Build a client from the environment plus `settings`.
    pub async fn connect(settings: &S3Settings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(settings.force_path_style);
        if let Some(endpoint) = &settings.endpoint {
            config = config.endpoint_url(endpoint);
        }

        tracing::debug!(
            region = ?settings.region,
            endpoint = ?settings.endpoint,
            "s3 client configured"
        );
        Self::from_client(Client::from_conf(config.build()))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        storage_class: Option<&str>,
    ) -> Result<u64> {
        let size = tokio::fs::metadata(source)
            .await
            .map_err(|e| Error::file(source, e))?
            .len();
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| Error::Store(format!("Failed to read {}: {}", source.display(), e)))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_length(size as i64)
            .set_storage_class(storage_class.map(StorageClass::from))
            .send()
            .await
            .map_err(|e| {
                Error::Store(format!(
                    "Failed to upload {}/{}: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;

        tracing::debug!(bucket, key, size, "uploaded object");
        Ok(size)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    Error::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    Error::Store(format!(
                        "Failed to download {}/{}: {}",
                        bucket,
                        key,
                        DisplayErrorContext(&e)
                    ))
                }
            })?;

        Ok(Box::pin(output.body.into_async_read()))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                Error::Store(format!(
                    "Failed to delete {}/{}: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }

    fn name(&self) -> &str {
        "s3"
    }
}
