//! Concurrent archive pipeline.
//!
//! Three stages connected by bounded channels:
//!
//! 1. discovery: one thread per pattern pushes file paths onto the work queue;
//! 2. compression: worker threads claim paths and compress each file into
//!    gzip members, block by block;
//! 3. sink: the calling thread owns the destination and appends one file's
//!    members at a time, in the order workers claimed the files.
//!
//! The sink is the only writer of the output, so blocks of different files
//! never interleave. Every stage reports failure through its return value and
//! raises a shared abort flag; the others notice the flag or a disconnected
//! channel and wind down before the scope joins them.

use crate::archiver::DestinationGuard;
use crate::compression::compress_block;
use crate::resolver::{self, ArtifactPattern};
use crate::types::PipelineReport;
use crossbeam_channel::{Receiver, Sender};
use flate2::Compression;
use stash_core::{Error, Logger, Result, Stage};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Paths waiting for a worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
/// Uncompressed bytes per gzip member.
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;
/// Compressed blocks a worker may run ahead of the sink.
const BLOCKS_IN_FLIGHT: usize = 4;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Compression worker threads.
    pub workers: usize,
    pub queue_capacity: usize,
    pub block_size: usize,
    /// gzip level, 0-9.
    pub level: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            block_size: DEFAULT_BLOCK_SIZE,
            level: Compression::default().level(),
        }
    }
}

impl PipelineOptions {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("pipeline needs at least one worker".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue capacity must be positive".into()));
        }
        if self.block_size == 0 {
            return Err(Error::Config("block size must be positive".into()));
        }
        if self.level > 9 {
            return Err(Error::Config(format!(
                "gzip level {} is out of range 0-9",
                self.level
            )));
        }
        Ok(())
    }
}

/// A file claimed by a worker. Its blocks arrive on `blocks`, ending with
/// [`Chunk::End`]; a channel that closes without `End` means the worker gave up.
struct FileStream {
    path: PathBuf,
    blocks: Receiver<Chunk>,
}

enum Chunk {
    Data { member: Vec<u8>, raw_len: u64 },
    End,
}

/// Compress every file matched by `patterns` into one multi-member gzip file.
///
/// No headers or directory entries are stored. Decode the result with
/// [`crate::compression::unpack_stream`], not with the tar reader.
pub fn write_archive_parallel<S: AsRef<str>>(
    destination: &Path,
    patterns: &[S],
    options: &PipelineOptions,
    logger: &Logger,
) -> Result<PipelineReport> {
    options.validate()?;
    let compiled = resolver::compile(patterns)?;

    let file = File::create(destination).map_err(|e| Error::file(destination, e))?;
    let guard = DestinationGuard::new(destination);
    let abort = AtomicBool::new(false);
    let seen = Mutex::new(HashSet::new());
    let level = Compression::new(options.level);

    let (discovery, compression, sink) = thread::scope(|s| {
        let (path_tx, path_rx) = crossbeam_channel::bounded::<PathBuf>(options.queue_capacity);
        let (file_tx, file_rx) = crossbeam_channel::bounded::<FileStream>(options.workers);

        let discovery: Vec<_> = compiled
            .iter()
            .map(|pattern| {
                let tx = path_tx.clone();
                let (abort, seen, guard) = (&abort, &seen, &guard);
                s.spawn(move || {
                    guarded(abort, || discover(pattern, &tx, seen, guard, abort, logger))
                })
            })
            .collect();
        // The queue closes once every discovery thread has dropped its sender.
        drop(path_tx);

        let workers: Vec<_> = (0..options.workers)
            .map(|_| {
                let rx = path_rx.clone();
                let tx = file_tx.clone();
                let abort = &abort;
                s.spawn(move || {
                    guarded(abort, || {
                        compress_files(&rx, &tx, options.block_size, level, abort, logger)
                    })
                })
            })
            .collect();
        drop(path_rx);
        drop(file_tx);

        let sink = guarded(&abort, || {
            let mut out = BufWriter::new(file);
            let report = drain(&mut out, destination, file_rx, level, &abort, logger)?;
            finish(out, destination, report)
        });

        (join_all(discovery), join_all(workers), sink)
    });

    let report = match (discovery, compression, sink) {
        (Err(e), _, _) => return Err(Error::pipeline(Stage::Discovery, e)),
        (Ok(()), Err(e), _) => return Err(Error::pipeline(Stage::Compression, e)),
        (Ok(()), Ok(()), Err(e)) => return Err(Error::pipeline(Stage::Sink, e)),
        (Ok(()), Ok(()), Ok(report)) => report,
    };

    tracing::info!(
        destination = %destination.display(),
        files = report.files,
        bytes_in = report.bytes_in,
        bytes_out = report.bytes_out,
        workers = options.workers,
        "stream archive written"
    );
    Ok(report)
}

/// Raise the abort flag when `f` fails.
fn guarded<T>(abort: &AtomicBool, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let result = f();
    if result.is_err() {
        abort.store(true, Ordering::SeqCst);
    }
    result
}

fn join_all(handles: Vec<thread::ScopedJoinHandle<'_, Result<()>>>) -> Result<()> {
    let mut first = Ok(());
    for handle in handles {
        let result = handle
            .join()
            .unwrap_or_else(|_| Err(Error::Internal("pipeline thread panicked".into())));
        if first.is_ok() {
            first = result;
        }
    }
    first
}

/// Discovery stage: walk one pattern and enqueue files not seen before.
fn discover(
    pattern: &ArtifactPattern,
    queue: &Sender<PathBuf>,
    seen: &Mutex<HashSet<PathBuf>>,
    guard: &DestinationGuard,
    abort: &AtomicBool,
    logger: &Logger,
) -> Result<()> {
    let mut stopped = false;
    let mut queued = 0usize;

    let walked = pattern.visit(|path, is_dir| {
        if abort.load(Ordering::SeqCst) {
            stopped = true;
            return Err(Error::Internal("discovery stopped".into()));
        }
        if is_dir || guard.is_destination(&path) {
            return Ok(());
        }
        let fresh = seen
            .lock()
            .map_err(|_| Error::Internal("discovery set poisoned".into()))?
            .insert(path.clone());
        if !fresh {
            return Ok(());
        }
        if queue.send(path).is_err() {
            // Every worker is gone; whoever failed reports it.
            stopped = true;
            return Err(Error::Internal("work queue closed".into()));
        }
        queued += 1;
        Ok(())
    });

    match walked {
        Err(_) if stopped => Ok(()),
        Err(e) => Err(e),
        Ok(()) => {
            logger.verbose(format_args!(
                "pattern {} queued {} files",
                pattern.as_str(),
                queued
            ));
            Ok(())
        }
    }
}

/// Compression stage: claim paths until the queue is closed and drained.
fn compress_files(
    queue: &Receiver<PathBuf>,
    files: &Sender<FileStream>,
    block_size: usize,
    level: Compression,
    abort: &AtomicBool,
    logger: &Logger,
) -> Result<()> {
    let mut buf = vec![0u8; block_size];

    for path in queue.iter() {
        if abort.load(Ordering::SeqCst) {
            return Ok(());
        }
        // Opening a FIFO with no writer blocks forever.
        let metadata = fs::metadata(&path).map_err(|e| Error::file(&path, e))?;
        if !metadata.is_file() {
            logger.warning(format_args!("skipping special file {}", path.display()));
            continue;
        }
        let mut source = File::open(&path).map_err(|e| Error::file(&path, e))?;

        let (tx, rx) = crossbeam_channel::bounded(BLOCKS_IN_FLIGHT);
        if files
            .send(FileStream {
                path: path.clone(),
                blocks: rx,
            })
            .is_err()
        {
            return Ok(());
        }

        loop {
            let n = read_block(&mut source, &mut buf).map_err(|e| Error::file(&path, e))?;
            if n == 0 {
                break;
            }
            let member = compress_block(&buf[..n], level).map_err(|e| Error::file(&path, e))?;
            let chunk = Chunk::Data {
                member,
                raw_len: n as u64,
            };
            if tx.send(chunk).is_err() {
                return Ok(());
            }
            if n < buf.len() {
                break;
            }
        }
        if tx.send(Chunk::End).is_err() {
            return Ok(());
        }
    }
    Ok(())
}

/// Fill `buf` as far as the source allows; a short count means end of file.
fn read_block<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Sink stage: the single owner of the destination.
///
/// Dropping `files` on return disconnects every worker still sending.
fn drain<W: Write>(
    out: &mut W,
    destination: &Path,
    files: Receiver<FileStream>,
    level: Compression,
    abort: &AtomicBool,
    logger: &Logger,
) -> Result<PipelineReport> {
    let mut report = PipelineReport::default();
    let mut members = 0usize;

    for stream in files.iter() {
        let mut raw = 0u64;
        let mut complete = false;
        for chunk in stream.blocks.iter() {
            match chunk {
                Chunk::Data { member, raw_len } => {
                    out.write_all(&member)
                        .map_err(|e| Error::file(destination, e))?;
                    raw += raw_len;
                    members += 1;
                }
                Chunk::End => {
                    complete = true;
                    break;
                }
            }
        }
        if !complete {
            return Err(Error::Internal(format!(
                "{} was abandoned mid-stream",
                stream.path.display()
            )));
        }
        report.files += 1;
        report.bytes_in += raw;
        logger.verbose(format_args!(
            "compressed {} ({} bytes)",
            stream.path.display(),
            raw
        ));
    }

    // Workers also stop early on abort, which closes the channel just like
    // a finished queue does.
    if abort.load(Ordering::SeqCst) {
        return Err(Error::Internal("pipeline aborted".into()));
    }

    // An archive of empty files still has to decode as gzip.
    if members == 0 {
        let empty = compress_block(&[], level).map_err(|e| Error::file(destination, e))?;
        out.write_all(&empty)
            .map_err(|e| Error::file(destination, e))?;
    }
    Ok(report)
}

fn finish(
    out: BufWriter<File>,
    destination: &Path,
    mut report: PipelineReport,
) -> Result<PipelineReport> {
    let file = out
        .into_inner()
        .map_err(|e| Error::file(destination, e.into_error()))?;
    file.sync_all().map_err(|e| Error::file(destination, e))?;
    report.bytes_out = file
        .metadata()
        .map_err(|e| Error::file(destination, e))?
        .len();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        let options = PipelineOptions::default();
        assert!(options.workers >= 1);
        assert_eq!(options.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        options.validate().unwrap();
    }

    #[test]
    fn test_invalid_options() {
        assert!(PipelineOptions::default().with_workers(0).validate().is_err());
        let options = PipelineOptions {
            level: 12,
            ..PipelineOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_read_block_fills_buffer() {
        let data = vec![1u8; 10];
        let mut buf = [0u8; 4];
        let mut source = &data[..];
        assert_eq!(read_block(&mut source, &mut buf).unwrap(), 4);
        assert_eq!(read_block(&mut source, &mut buf).unwrap(), 4);
        assert_eq!(read_block(&mut source, &mut buf).unwrap(), 2);
        assert_eq!(read_block(&mut source, &mut buf).unwrap(), 0);
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::StorageFull, "no space left"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn stream(path: &str) -> (FileStream, Sender<Chunk>) {
        let (tx, rx) = crossbeam_channel::bounded(BLOCKS_IN_FLIGHT);
        let stream = FileStream {
            path: PathBuf::from(path),
            blocks: rx,
        };
        (stream, tx)
    }

    #[test]
    fn test_drain_fails_on_write_error_and_releases_workers() {
        let (file_tx, file_rx) = crossbeam_channel::bounded(2);
        let (first, blocks) = stream("a.bin");
        file_tx.send(first).unwrap();
        blocks
            .send(Chunk::Data {
                member: compress_block(b"abc", Compression::default()).unwrap(),
                raw_len: 3,
            })
            .unwrap();

        let abort = AtomicBool::new(false);
        let err = drain(
            &mut FullDisk,
            Path::new("out.gz"),
            file_rx,
            Compression::default(),
            &abort,
            &Logger::quiet(),
        )
        .unwrap_err();
        assert!(err.is_io(), "unexpected error: {err}");

        // A worker mid-file and a worker about to hand over a file both see
        // the sink gone instead of blocking.
        assert!(blocks.send(Chunk::End).is_err());
        let (second, _blocks) = stream("b.bin");
        assert!(file_tx.send(second).is_err());
    }

    #[test]
    fn test_drain_rejects_abandoned_file() {
        let (file_tx, file_rx) = crossbeam_channel::bounded(1);
        let (first, blocks) = stream("a.bin");
        file_tx.send(first).unwrap();
        drop(blocks);
        drop(file_tx);

        let mut out = Vec::new();
        let abort = AtomicBool::new(true);
        let err = drain(
            &mut out,
            Path::new("out.gz"),
            file_rx,
            Compression::default(),
            &abort,
            &Logger::quiet(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("a.bin"), "unexpected error: {err}");
    }
}
