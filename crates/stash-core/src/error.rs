//! Error types for stash.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Stage of the concurrent archive pipeline that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discovery,
    Compression,
    Sink,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Discovery => "discovery",
            Stage::Compression => "compression",
            Stage::Sink => "sink",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    // Pattern errors
    #[error("Invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    // Filesystem errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error on {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path cannot be stored in an archive: {}", .0.display())]
    UnsupportedPath(PathBuf),

    // Archive errors
    #[error("Malformed archive: {0}")]
    Format(String),

    #[error("Pipeline {stage} stage failed: {source}")]
    Pipeline {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    // Object store errors
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Object store error: {0}")]
    Store(String),

    // Input errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Attach the path an I/O error happened on.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::File {
            path: path.into(),
            source,
        }
    }

    /// Wrap an error as the failure of a pipeline stage.
    pub fn pipeline(stage: Stage, source: Error) -> Self {
        Error::Pipeline {
            stage,
            source: Box::new(source),
        }
    }

    /// Returns true if the remote object was absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Returns true for pattern syntax errors, including ones raised inside the pipeline.
    pub fn is_pattern(&self) -> bool {
        match self {
            Error::Pattern { .. } => true,
            Error::Pipeline { source, .. } => source.is_pattern(),
            _ => false,
        }
    }

    /// Returns true for filesystem I/O failures.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_) | Error::File { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_error_mentions_path() {
        let err = Error::file(
            "build/app.bin",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_io());
        assert!(err.to_string().contains("build/app.bin"));
    }

    #[test]
    fn test_pipeline_error_wraps_cause() {
        let cause = Error::Pattern {
            pattern: "[a".into(),
            message: "unclosed character class".into(),
        };
        let err = Error::pipeline(Stage::Discovery, cause);
        assert!(err.is_pattern());
        assert!(err.to_string().starts_with("Pipeline discovery stage failed"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_not_found() {
        let err = Error::NotFound {
            bucket: "ci-cache".into(),
            key: "main/deps".into(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_io());
    }
}
