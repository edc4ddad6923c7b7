//! Archive reports and dispatcher outcomes.

use std::time::Duration;

/// Result of writing a structured archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    /// File entries written.
    pub files: usize,
    /// Directory entries written.
    pub directories: usize,
    /// Payload bytes written, before compression.
    pub bytes: u64,
}

/// Result of the concurrent pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Files streamed into the output.
    pub files: usize,
    /// Uncompressed bytes read from those files.
    pub bytes_in: u64,
    /// Compressed bytes written to the destination.
    pub bytes_out: u64,
}

/// Result of restoring an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// What a dispatched cache action did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Archive uploaded.
    Stored {
        /// Size of the uploaded object.
        bytes: u64,
        /// Hex SHA-256 of the uploaded object.
        checksum: String,
        /// Files packed into the archive.
        files: usize,
        duration: Duration,
    },
    /// Archive downloaded and restored.
    Restored {
        /// Size of the downloaded object.
        bytes: u64,
        /// Files restored; zero for stream archives.
        files: usize,
        duration: Duration,
    },
    /// The key does not exist remotely.
    Miss,
    /// Remote object removed.
    Deleted,
}

impl Outcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, Outcome::Restored { .. })
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Outcome::Miss)
    }
}
