//! Glob pattern expansion against the file system.

use globset::{GlobBuilder, GlobMatcher};
use stash_core::{Error, Result};
use std::collections::HashSet;
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

const GLOB_META: [char; 4] = ['*', '?', '[', '{'];

/// A compiled artifact pattern.
///
/// The pattern is split into a literal base directory and a glob tail. Only
/// the base is walked, and only as deep as the tail has components unless
/// the tail contains `**`.
#[derive(Debug, Clone)]
pub struct ArtifactPattern {
    raw: String,
    base: PathBuf,
    matcher: Option<GlobMatcher>,
    max_depth: Option<usize>,
}

impl ArtifactPattern {
    /// Compile a pattern. Fails with [`Error::Pattern`] on invalid syntax.
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = normalize(raw).ok_or_else(|| Error::Pattern {
            pattern: raw.to_string(),
            message: "pattern is empty".into(),
        })?;

        let absolute = normalized.starts_with('/');
        let parts: Vec<&str> = normalized.split('/').filter(|p| !p.is_empty()).collect();
        let literal_len = parts.iter().take_while(|p| !has_meta(p)).count();

        let mut base = if absolute {
            PathBuf::from("/")
        } else {
            PathBuf::new()
        };
        for part in &parts[..literal_len] {
            base.push(part);
        }

        let tail = &parts[literal_len..];
        if tail.is_empty() {
            return Ok(Self {
                raw: raw.to_string(),
                base,
                matcher: None,
                max_depth: Some(0),
            });
        }

        let matcher = GlobBuilder::new(&normalized)
            .literal_separator(true)
            .build()
            .map_err(|e| Error::Pattern {
                pattern: raw.to_string(),
                message: e.kind().to_string(),
            })?
            .compile_matcher();
        let max_depth = if tail.iter().any(|p| p.contains("**")) {
            None
        } else {
            Some(tail.len())
        };

        Ok(Self {
            raw: raw.to_string(),
            base,
            matcher: Some(matcher),
            max_depth,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern contains no wildcards.
    pub fn is_literal(&self) -> bool {
        self.matcher.is_none()
    }

    /// Paths matching the pattern itself, in sorted walk order.
    pub fn matches(&self) -> Result<Vec<PathBuf>> {
        let Some(matcher) = &self.matcher else {
            return Ok(if fs_exists(&self.base) {
                vec![clean(&self.base)]
            } else {
                Vec::new()
            });
        };

        let root = if self.base.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            self.base.clone()
        };

        let mut walker = WalkDir::new(&root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name();
        if let Some(depth) = self.max_depth {
            walker = walker.max_depth(depth);
        }

        let mut found = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 && is_not_found(&e) => break,
                Err(e) => return Err(walk_error(e)),
            };
            let candidate = clean(entry.path());
            if matcher.is_match(&candidate) {
                found.push(candidate);
            }
        }
        Ok(found)
    }

    /// Visit every match and, for directory matches, every descendant.
    ///
    /// The callback receives the path and whether it is a directory. Returning
    /// an error from the callback stops the traversal.
    pub fn visit<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(PathBuf, bool) -> Result<()>,
    {
        for matched in self.matches()? {
            let walker = WalkDir::new(&matched)
                .follow_links(false)
                .follow_root_links(false)
                .sort_by_file_name();
            for entry in walker {
                let entry = entry.map_err(walk_error)?;
                let file_type = entry.file_type();
                let is_dir =
                    file_type.is_dir() || (file_type.is_symlink() && entry.path().is_dir());
                f(clean(entry.path()), is_dir)?;
            }
        }
        Ok(())
    }
}

/// Compile every pattern, failing on the first invalid one.
pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<ArtifactPattern>> {
    patterns
        .iter()
        .map(|p| ArtifactPattern::parse(p.as_ref()))
        .collect()
}

/// Expand patterns into a deduplicated list of files and directories.
///
/// Order is pattern order, then sorted walk order. A path reached through
/// several patterns keeps its first position.
pub fn resolve<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<PathBuf>> {
    let compiled = compile(patterns)?;
    let mut seen = HashSet::new();
    let mut resolved = Vec::new();

    for pattern in &compiled {
        let before = resolved.len();
        pattern.visit(|path, _| {
            if seen.insert(path.clone()) {
                resolved.push(path);
            }
            Ok(())
        })?;
        tracing::debug!(
            pattern = pattern.as_str(),
            added = resolved.len() - before,
            "resolved pattern"
        );
    }

    Ok(resolved)
}

/// Drop `.` components, repeated and trailing separators.
fn normalize(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let joined = raw
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect::<Vec<_>>()
        .join("/");
    Some(if raw.starts_with('/') {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    })
}

fn has_meta(part: &str) -> bool {
    part.contains(GLOB_META)
}

/// Drop `.` components so the same file always has the same spelling.
pub(crate) fn clean(path: &Path) -> PathBuf {
    let cleaned: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if cleaned.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        cleaned
    }
}

fn fs_exists(path: &Path) -> bool {
    let path = if path.as_os_str().is_empty() {
        Path::new(".")
    } else {
        path
    };
    std::fs::symlink_metadata(path).is_ok()
}

fn is_not_found(err: &walkdir::Error) -> bool {
    err.io_error()
        .is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
}

fn walk_error(err: walkdir::Error) -> Error {
    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
    Error::file(path, io::Error::from(err))
}
