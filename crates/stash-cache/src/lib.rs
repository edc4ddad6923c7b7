//! Archive engine and object store providers for stash.
//!
//! Build artifacts are selected with glob patterns and packed either into a
//! gzip-compressed tar ([`write_archive`]) or, for large single-stream
//! payloads, into concatenated gzip members by a concurrent pipeline
//! ([`write_archive_parallel`]). The [`Dispatcher`] moves those archives in
//! and out of an [`stash_core::ObjectStore`].

pub mod archiver;
pub mod compression;
pub mod dispatcher;
pub mod keys;
pub mod pipeline;
pub mod provider;
pub mod resolver;
pub mod s3;
pub mod types;

pub use archiver::{extract_archive, write_archive};
pub use compression::{decompress, unpack_stream};
pub use dispatcher::{DispatchOptions, Dispatcher, sha256_file};
pub use keys::{escape_key, staged_name};
pub use pipeline::{PipelineOptions, write_archive_parallel};
pub use provider::{FilesystemStore, MemoryStore};
pub use resolver::{ArtifactPattern, resolve};
pub use s3::{S3Settings, S3Store};
pub use types::{ArchiveReport, ExtractReport, Outcome, PipelineReport};
