//! Structured archives: gzip-compressed tar with one entry per path.

use crate::compression::{copy_stream, ensure_gzip, read_error};
use crate::resolver;
use crate::types::{ArchiveReport, ExtractReport};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use stash_core::{Error, Logger, Result};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

/// Create an archive at `destination` from everything `patterns` resolve to.
///
/// Patterns are resolved before the destination is touched, so an invalid
/// pattern never leaves a file behind. Any other error leaves a partial file
/// that must not be used.
pub fn write_archive<S: AsRef<str>>(
    destination: &Path,
    patterns: &[S],
    logger: &Logger,
) -> Result<ArchiveReport> {
    let paths = resolver::resolve(patterns)?;

    let file = File::create(destination).map_err(|e| Error::file(destination, e))?;
    let guard = DestinationGuard::new(destination);
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut report = ArchiveReport::default();

    for path in &paths {
        if guard.is_destination(path) {
            logger.verbose(format_args!("skipping archive itself: {}", path.display()));
            continue;
        }
        append_entry(&mut builder, path, &mut report, logger)?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| Error::file(destination, e))?;
    let writer = encoder.finish().map_err(|e| Error::file(destination, e))?;
    let file = writer
        .into_inner()
        .map_err(|e| Error::file(destination, e.into_error()))?;
    file.sync_all().map_err(|e| Error::file(destination, e))?;

    tracing::info!(
        destination = %destination.display(),
        files = report.files,
        directories = report.directories,
        bytes = report.bytes,
        "archive written"
    );
    Ok(report)
}

fn append_entry<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &Path,
    report: &mut ArchiveReport,
    logger: &Logger,
) -> Result<()> {
    let Some(name) = entry_name(path)? else {
        return Ok(());
    };
    let metadata = fs::metadata(path).map_err(|e| Error::file(path, e))?;
    let mut header = tar::Header::new_gnu();
    header.set_metadata(&metadata);

    if metadata.is_dir() {
        header.set_size(0);
        builder
            .append_data(&mut header, &name, io::empty())
            .map_err(|e| Error::file(path, e))?;
        report.directories += 1;
        logger.verbose(format_args!("added directory {}", name.display()));
        return Ok(());
    }

    if !metadata.is_file() {
        logger.warning(format_args!("skipping special file {}", path.display()));
        return Ok(());
    }

    let file = File::open(path).map_err(|e| Error::file(path, e))?;
    let len = file.metadata().map_err(|e| Error::file(path, e))?.len();
    header.set_size(len);
    builder
        .append_data(&mut header, &name, ExactReader::new(file, len))
        .map_err(|e| Error::file(path, e))?;

    report.files += 1;
    report.bytes += len;
    logger.verbose(format_args!("added {} ({} bytes)", name.display(), len));
    Ok(())
}

/// Restore every entry of the archive at `source` below `root`.
pub fn extract_archive(source: &Path, root: &Path, logger: &Logger) -> Result<ExtractReport> {
    let file = File::open(source).map_err(|e| Error::file(source, e))?;
    let mut reader = BufReader::new(file);
    ensure_gzip(&mut reader, source)?;

    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let entries = archive.entries().map_err(|e| read_error(source, e))?;
    let mut report = ExtractReport::default();

    for entry in entries {
        let mut entry = entry.map_err(|e| read_error(source, e))?;
        let name = entry
            .path()
            .map_err(|e| read_error(source, e))?
            .into_owned();
        let relative = contained_path(&name)?;
        let target = root.join(&relative);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::file(parent, e))?;
        }

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::file(&target, e))?;
            report.directories += 1;
            logger.verbose(format_args!("restored directory {}", relative.display()));
            continue;
        }
        if !entry_type.is_file() {
            logger.warning(format_args!(
                "skipping unsupported entry {} ({:?})",
                relative.display(),
                entry_type
            ));
            continue;
        }

        let declared = entry.header().size().map_err(|e| read_error(source, e))?;
        let mode = entry.header().mode().unwrap_or(0o644);

        let mut out = File::create(&target).map_err(|e| Error::file(&target, e))?;
        let copied = copy_stream(&mut entry, &mut out, source, &target)?;
        if copied != declared {
            return Err(Error::Format(format!(
                "entry {} declares {} bytes but holds {}",
                relative.display(),
                declared,
                copied
            )));
        }
        out.flush().map_err(|e| Error::file(&target, e))?;
        drop(out);
        apply_mode(&target, mode, logger);

        report.files += 1;
        report.bytes += copied;
        logger.verbose(format_args!("restored {} ({} bytes)", relative.display(), copied));
    }

    tracing::info!(
        source = %source.display(),
        root = %root.display(),
        files = report.files,
        directories = report.directories,
        "archive extracted"
    );
    Ok(report)
}

/// Archive name for a path: relative, with root and `.` components dropped.
/// Returns `None` for the current directory itself.
pub(crate) fn entry_name(path: &Path) -> Result<Option<PathBuf>> {
    let mut name = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => return Err(Error::UnsupportedPath(path.to_path_buf())),
            Component::Normal(part) => name.push(part),
        }
    }
    Ok((!name.as_os_str().is_empty()).then_some(name))
}

/// Reject entry names that would land outside the extraction root.
fn contained_path(name: &Path) -> Result<PathBuf> {
    let mut relative = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => {
                return Err(Error::Format(format!(
                    "entry {} escapes the extraction root",
                    name.display()
                )));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(Error::Format("entry with empty name".into()));
    }
    Ok(relative)
}

#[cfg(unix)]
fn apply_mode(target: &Path, mode: u32, logger: &Logger) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = fs::set_permissions(target, fs::Permissions::from_mode(mode & 0o7777)) {
        logger.warning(format_args!(
            "could not set mode {:o} on {}: {}",
            mode,
            target.display(),
            e
        ));
    }
}

#[cfg(not(unix))]
fn apply_mode(_target: &Path, _mode: u32, _logger: &Logger) {}

/// Recognizes the archive being written when a pattern also covers it.
pub(crate) struct DestinationGuard {
    file_name: Option<OsString>,
    canonical: Option<PathBuf>,
}

impl DestinationGuard {
    pub(crate) fn new(destination: &Path) -> Self {
        Self {
            file_name: destination.file_name().map(OsString::from),
            canonical: fs::canonicalize(destination).ok(),
        }
    }

    pub(crate) fn is_destination(&self, path: &Path) -> bool {
        if self.canonical.is_none() || path.file_name() != self.file_name.as_deref() {
            return false;
        }
        fs::canonicalize(path).ok() == self.canonical
    }
}

/// Yields exactly `remaining` bytes of the inner reader, failing if it ends early.
struct ExactReader<R> {
    inner: R,
    remaining: u64,
}

impl<R> ExactReader<R> {
    fn new(inner: R, len: u64) -> Self {
        Self {
            inner,
            remaining: len,
        }
    }
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank while it was being archived",
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}
