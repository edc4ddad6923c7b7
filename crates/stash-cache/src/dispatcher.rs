//! Cache action dispatcher.
//!
//! Turns an [`Action`] into archive work plus one object store round trip.
//! Archives are staged in a temporary directory that is removed when the
//! action returns.

use crate::archiver::{extract_archive, write_archive};
use crate::compression::unpack_stream;
use crate::keys::staged_name;
use crate::pipeline::{PipelineOptions, write_archive_parallel};
use crate::types::Outcome;
use sha2::{Digest, Sha256};
use stash_core::{Action, ActionKind, ArchiveFormat, Error, Logger, ObjectStore, Result};
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Deadline for the whole action, including archive work.
    pub timeout: Option<Duration>,
    /// Settings for the stream format writer.
    pub pipeline: PipelineOptions,
    /// Parent of the staging directory; the system temp dir when unset.
    pub staging_dir: Option<PathBuf>,
    pub logger: Logger,
}

pub struct Dispatcher {
    store: Arc<dyn ObjectStore>,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn ObjectStore>, options: DispatchOptions) -> Self {
        Self { store, options }
    }

    /// Run one cache action. A missing object on `get` is [`Outcome::Miss`].
    pub async fn dispatch(&self, action: &Action) -> Result<Outcome> {
        action.validate()?;
        tracing::info!(
            action = %action.action,
            bucket = %action.bucket,
            key = %action.key,
            store = self.store.name(),
            "dispatching cache action"
        );

        let work = async {
            match action.action {
                ActionKind::Put => self.put(action).await,
                ActionKind::Get => self.get(action).await,
                ActionKind::Delete => self.delete(action).await,
            }
        };

        match self.options.timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => work.await,
        }
    }

    async fn put(&self, action: &Action) -> Result<Outcome> {
        let started = Instant::now();
        let staging = self.staging()?;
        let archive = staging.path().join(staged_name(&action.key, action.format));

        let files = self.build(action, archive.clone()).await?;
        if files == 0 {
            self.options
                .logger
                .warning(format_args!("no files matched {:?}", action.artifacts));
        }

        let digest_path = archive.clone();
        let checksum = blocking(move || sha256_file(&digest_path)).await?;
        let bytes = self
            .store
            .put_object(
                &action.bucket,
                &action.key,
                &archive,
                action.s3_class.as_deref(),
            )
            .await?;

        tracing::info!(key = %action.key, bytes, files, checksum = %checksum, "cache stored");
        Ok(Outcome::Stored {
            bytes,
            checksum,
            files,
            duration: started.elapsed(),
        })
    }

    /// Write the archive for `action` to `archive` and return the file count.
    async fn build(&self, action: &Action, archive: PathBuf) -> Result<usize> {
        let patterns = action.artifacts.clone();
        let logger = self.options.logger;
        match action.format {
            ArchiveFormat::Tar => {
                blocking(move || write_archive(&archive, &patterns, &logger).map(|r| r.files))
                    .await
            }
            ArchiveFormat::Stream => {
                let options = self.options.pipeline.clone();
                blocking(move || {
                    write_archive_parallel(&archive, &patterns, &options, &logger)
                        .map(|r| r.files)
                })
                .await
            }
        }
    }

    async fn get(&self, action: &Action) -> Result<Outcome> {
        let started = Instant::now();
        let mut reader = match self.store.get_object(&action.bucket, &action.key).await {
            Ok(reader) => reader,
            Err(e) if e.is_not_found() => {
                tracing::info!(bucket = %action.bucket, key = %action.key, "cache miss");
                return Ok(Outcome::Miss);
            }
            Err(e) => return Err(e),
        };

        let staging = self.staging()?;
        let archive = staging.path().join(staged_name(&action.key, action.format));
        let mut file = tokio::fs::File::create(&archive)
            .await
            .map_err(|e| Error::file(&archive, e))?;
        let bytes = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| Error::Store(format!("Failed to download {}: {}", action.key, e)))?;
        file.flush().await.map_err(|e| Error::file(&archive, e))?;
        drop(file);

        let logger = self.options.logger;
        let files = match action.format {
            ArchiveFormat::Tar => {
                let root = action.root.clone();
                blocking(move || {
                    std::fs::create_dir_all(&root).map_err(|e| Error::file(&root, e))?;
                    extract_archive(&archive, &root, &logger).map(|r| r.files)
                })
                .await?
            }
            ArchiveFormat::Stream => {
                let output = action.output.clone().ok_or_else(|| {
                    Error::Config("get of a stream archive requires an output file".into())
                })?;
                blocking(move || decode_to_file(&archive, &output).map(|_| 0)).await?
            }
        };

        tracing::info!(key = %action.key, bytes, files, "cache restored");
        Ok(Outcome::Restored {
            bytes,
            files,
            duration: started.elapsed(),
        })
    }

    async fn delete(&self, action: &Action) -> Result<Outcome> {
        self.store
            .delete_object(&action.bucket, &action.key)
            .await?;
        tracing::info!(bucket = %action.bucket, key = %action.key, "cache deleted");
        Ok(Outcome::Deleted)
    }

    fn staging(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("stash-");
        match &self.options.staging_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent).map_err(|e| Error::file(parent, e))?;
                builder.tempdir_in(parent).map_err(|e| Error::file(parent, e))
            }
            None => builder.tempdir().map_err(Error::Io),
        }
    }
}

/// Run synchronous engine work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("blocking task failed: {}", e)))?
}

/// Hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path).map_err(|e| Error::file(path, e))?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher).map_err(|e| Error::file(path, e))?;
    Ok(hex::encode(hasher.finalize()))
}

fn decode_to_file(archive: &Path, output: &Path) -> Result<u64> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::file(parent, e))?;
    }
    let file = File::create(output).map_err(|e| Error::file(output, e))?;
    unpack_stream(archive, BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryStore;
    use async_trait::async_trait;
    use stash_core::ObjectReader;

    fn dispatcher(store: &MemoryStore) -> Dispatcher {
        Dispatcher::new(Arc::new(store.clone()), DispatchOptions::default())
    }

    #[tokio::test]
    async fn test_get_missing_key_is_miss() {
        let store = MemoryStore::new();
        let action = Action::new(ActionKind::Get, "ci-cache", "nope");
        let outcome = dispatcher(&store).dispatch(&action).await.unwrap();
        assert!(outcome.is_miss());
    }

    #[tokio::test]
    async fn test_put_then_get_roundtrip() {
        let work = tempfile::tempdir().unwrap();
        let build = work.path().join("build");
        std::fs::create_dir_all(build.join("meta")).unwrap();
        std::fs::write(build.join("app.bin"), b"0123456789").unwrap();
        std::fs::write(build.join("meta/version.txt"), b"1.0").unwrap();

        let store = MemoryStore::new();
        let put = Action::new(ActionKind::Put, "ci-cache", "main/build").with_artifacts([
            format!("{}/*.bin", build.display()),
            format!("{}/meta/", build.display()),
        ]);
        let stored = dispatcher(&store).dispatch(&put).await.unwrap();
        let (bytes, checksum, files) = match stored {
            Outcome::Stored {
                bytes,
                checksum,
                files,
                ..
            } => (bytes, checksum, files),
            other => panic!("expected Stored, got {other:?}"),
        };
        assert_eq!(files, 2);
        assert_eq!(checksum.len(), 64);
        let object = store.object("ci-cache", "main/build").unwrap();
        assert_eq!(bytes, object.len() as u64);
        assert_eq!(checksum, hex::encode(Sha256::digest(&object)));

        let restore = tempfile::tempdir().unwrap();
        let mut get = Action::new(ActionKind::Get, "ci-cache", "main/build");
        get.root = restore.path().to_path_buf();
        let restored = dispatcher(&store).dispatch(&get).await.unwrap();
        assert!(restored.is_hit());

        let relative = build.strip_prefix("/").unwrap();
        let restored_build = restore.path().join(relative);
        assert_eq!(std::fs::read(restored_build.join("app.bin")).unwrap(), b"0123456789");
        assert_eq!(
            std::fs::read(restored_build.join("meta/version.txt")).unwrap(),
            b"1.0"
        );
    }

    #[tokio::test]
    async fn test_stream_format_roundtrip() {
        let work = tempfile::tempdir().unwrap();
        std::fs::write(work.path().join("only.log"), vec![b'x'; 5000]).unwrap();

        let store = MemoryStore::new();
        let mut put = Action::new(ActionKind::Put, "ci-cache", "logs")
            .with_artifacts([format!("{}/*.log", work.path().display())]);
        put.format = ArchiveFormat::Stream;
        dispatcher(&store).dispatch(&put).await.unwrap();

        let output = work.path().join("out/decoded.log");
        let mut get = Action::new(ActionKind::Get, "ci-cache", "logs");
        get.format = ArchiveFormat::Stream;
        get.output = Some(output.clone());
        let outcome = dispatcher(&store).dispatch(&get).await.unwrap();
        assert!(outcome.is_hit());
        assert_eq!(std::fs::read(output).unwrap(), vec![b'x'; 5000]);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();
        store.insert("ci-cache", "old", b"stale".to_vec()).unwrap();

        let action = Action::new(ActionKind::Delete, "ci-cache", "old");
        let outcome = dispatcher(&store).dispatch(&action).await.unwrap();
        assert_eq!(outcome, Outcome::Deleted);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_put_with_invalid_pattern_uploads_nothing() {
        let store = MemoryStore::new();
        let action = Action::new(ActionKind::Put, "ci-cache", "bad").with_artifacts(["[a-"]);
        let err = dispatcher(&store).dispatch(&action).await.unwrap_err();
        assert!(err.is_pattern());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_action_is_rejected() {
        let store = MemoryStore::new();
        let action = Action::new(ActionKind::Put, "ci-cache", "empty");
        let err = dispatcher(&store).dispatch(&action).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    struct SlowStore;

    #[async_trait]
    impl ObjectStore for SlowStore {
        async fn put_object(
            &self,
            _bucket: &str,
            _key: &str,
            _source: &Path,
            _storage_class: Option<&str>,
        ) -> Result<u64> {
            Ok(0)
        }

        async fn get_object(&self, _bucket: &str, _key: &str) -> Result<ObjectReader> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Box::pin(std::io::Cursor::new(Vec::new())))
        }

        async fn delete_object(&self, _bucket: &str, _key: &str) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let options = DispatchOptions {
            timeout: Some(Duration::from_millis(20)),
            ..DispatchOptions::default()
        };
        let dispatcher = Dispatcher::new(Arc::new(SlowStore), options);
        let action = Action::new(ActionKind::Get, "ci-cache", "slow");
        let err = dispatcher.dispatch(&action).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_sha256_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
