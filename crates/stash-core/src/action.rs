//! Cache action input.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Prefix used by CI runners to pass step inputs as environment variables.
pub const INPUT_PREFIX: &str = "INPUT_";

/// What to do with the remote cache object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Put,
    Get,
    Delete,
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "put" => Ok(ActionKind::Put),
            "get" => Ok(ActionKind::Get),
            "delete" => Ok(ActionKind::Delete),
            other => Err(Error::Config(format!(
                "unknown action '{}', expected put, get or delete",
                other
            ))),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionKind::Put => "put",
            ActionKind::Get => "get",
            ActionKind::Delete => "delete",
        })
    }
}

/// Archive layout stored under the cache key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// gzip-compressed tar with per-entry headers.
    #[default]
    Tar,
    /// Concatenated gzip members of file contents, no headers.
    Stream,
}

impl FromStr for ArchiveFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "tar" => Ok(ArchiveFormat::Tar),
            "stream" => Ok(ArchiveFormat::Stream),
            other => Err(Error::Config(format!(
                "unknown archive format '{}', expected tar or stream",
                other
            ))),
        }
    }
}

impl ArchiveFormat {
    /// File extension of a staged archive.
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "tar.gz",
            ArchiveFormat::Stream => "gz",
        }
    }
}

/// A single cache request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub action: ActionKind,
    pub bucket: String,
    pub key: String,
    /// Glob patterns selecting what to archive (put only).
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Storage class for the uploaded object (put only).
    #[serde(default)]
    pub s3_class: Option<String>,
    #[serde(default)]
    pub format: ArchiveFormat,
    /// Directory archives are extracted into (get only).
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Destination file for a decoded stream archive (get only).
    #[serde(default)]
    pub output: Option<PathBuf>,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

impl Action {
    pub fn new(action: ActionKind, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            action,
            bucket: bucket.into(),
            key: key.into(),
            artifacts: Vec::new(),
            s3_class: None,
            format: ArchiveFormat::default(),
            root: default_root(),
            output: None,
        }
    }

    pub fn with_artifacts<I, S>(mut self, artifacts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.artifacts = artifacts.into_iter().map(Into::into).collect();
        self
    }

    /// Read an action from `INPUT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_inputs(|name| std::env::var(format!("{}{}", INPUT_PREFIX, name)).ok())
    }

    /// Build an action from named inputs (`ACTION`, `BUCKET`, `KEY`, `ARTIFACTS`,
    /// `S3_CLASS`, `FORMAT`, `ROOT`, `OUTPUT`).
    pub fn from_inputs<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &str| {
            get(name)
                .map(|v| v.trim().to_string())
                .ok_or_else(|| Error::Config(format!("missing input {}{}", INPUT_PREFIX, name)))
        };

        let mut action = Action::new(
            required("ACTION")?.parse()?,
            required("BUCKET")?,
            required("KEY")?,
        );
        action.artifacts = get("ARTIFACTS")
            .map(|raw| split_patterns(&raw))
            .unwrap_or_default();
        action.s3_class = get("S3_CLASS").map(|v| v.trim().to_string());
        if let Some(format) = get("FORMAT") {
            action.format = format.parse()?;
        }
        if let Some(root) = get("ROOT") {
            action.root = PathBuf::from(root.trim());
        }
        action.output = get("OUTPUT").map(|v| PathBuf::from(v.trim()));

        action.validate()?;
        Ok(action)
    }

    /// Check the fields the requested action needs.
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(Error::Config("bucket must not be empty".into()));
        }
        if self.key.trim().is_empty() {
            return Err(Error::Config("key must not be empty".into()));
        }
        match self.action {
            ActionKind::Put if self.artifacts.is_empty() => Err(Error::Config(
                "put requires at least one artifact pattern".into(),
            )),
            ActionKind::Get if self.format == ArchiveFormat::Stream && self.output.is_none() => {
                Err(Error::Config(
                    "get of a stream archive requires an output file".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Split a multi-line or comma separated pattern list.
pub fn split_patterns(raw: &str) -> Vec<String> {
    raw.split(['\n', ','])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn inputs(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_parse_action_kind() {
        assert_eq!("put".parse::<ActionKind>().unwrap(), ActionKind::Put);
        assert_eq!(" GET ".parse::<ActionKind>().unwrap(), ActionKind::Get);
        assert_eq!("delete".parse::<ActionKind>().unwrap(), ActionKind::Delete);
        assert!("restore".parse::<ActionKind>().is_err());
    }

    #[test]
    fn test_split_patterns() {
        assert_eq!(
            split_patterns("build/*.bin\n  target/release ,\n\n,dist/"),
            vec!["build/*.bin", "target/release", "dist/"]
        );
    }

    #[test]
    fn test_from_inputs_put() {
        let action = Action::from_inputs(inputs(&[
            ("ACTION", "put"),
            ("BUCKET", "ci-cache"),
            ("KEY", "deps-abc"),
            ("ARTIFACTS", "node_modules\nbuild/*.bin"),
            ("S3_CLASS", "STANDARD_IA"),
        ]))
        .unwrap();

        assert_eq!(action.action, ActionKind::Put);
        assert_eq!(action.bucket, "ci-cache");
        assert_eq!(action.artifacts, vec!["node_modules", "build/*.bin"]);
        assert_eq!(action.s3_class.as_deref(), Some("STANDARD_IA"));
        assert_eq!(action.format, ArchiveFormat::Tar);
        assert_eq!(action.root, PathBuf::from("."));
    }

    #[test]
    fn test_from_inputs_missing_key() {
        let err = Action::from_inputs(inputs(&[("ACTION", "get"), ("BUCKET", "ci-cache")]))
            .unwrap_err();
        assert!(err.to_string().contains("INPUT_KEY"));
    }

    #[test]
    fn test_put_without_artifacts_is_rejected() {
        let err = Action::from_inputs(inputs(&[
            ("ACTION", "put"),
            ("BUCKET", "ci-cache"),
            ("KEY", "deps"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_stream_get_needs_output() {
        let mut action = Action::new(ActionKind::Get, "ci-cache", "blob");
        action.format = ArchiveFormat::Stream;
        assert!(action.validate().is_err());
        action.output = Some(PathBuf::from("blob.bin"));
        assert!(action.validate().is_ok());
    }
}
