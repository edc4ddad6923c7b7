//! gzip helpers shared by the archive writers and readers.

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use stash_core::{Error, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;

/// Leading bytes of every gzip member.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const COPY_BUFFER: usize = 64 * 1024;

/// Compress one block into a self-contained gzip member.
pub fn compress_block(data: &[u8], level: Compression) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 64), level);
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompress every member of a gzip stream held in memory.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    MultiGzDecoder::new(data)
        .read_to_end(&mut output)
        .map_err(|e| Error::Format(format!("gzip read failed: {}", e)))?;
    Ok(output)
}

/// Decode a pipeline archive into `writer`, returning the number of bytes produced.
pub fn unpack_stream<W: Write>(source: &Path, mut writer: W) -> Result<u64> {
    let file = File::open(source).map_err(|e| Error::file(source, e))?;
    let mut reader = BufReader::new(file);
    ensure_gzip(&mut reader, source)?;

    let mut decoder = MultiGzDecoder::new(reader);
    let written = copy_stream(&mut decoder, &mut writer, source, Path::new("<output>"))?;
    writer
        .flush()
        .map_err(|e| Error::file("<output>", e))?;
    Ok(written)
}

/// Fail with [`Error::Format`] unless the stream starts with a gzip header.
pub(crate) fn ensure_gzip<R: BufRead>(reader: &mut R, source: &Path) -> Result<()> {
    let head = reader.fill_buf().map_err(|e| Error::file(source, e))?;
    if head.len() < GZIP_MAGIC.len() || head[..GZIP_MAGIC.len()] != GZIP_MAGIC {
        return Err(Error::Format(format!(
            "{} is not a gzip archive",
            source.display()
        )));
    }
    Ok(())
}

/// Copy until EOF, attributing read failures to the archive and write
/// failures to the destination.
pub(crate) fn copy_stream<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    source: &Path,
    target: &Path,
) -> Result<u64> {
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_error(source, e)),
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| Error::file(target, e))?;
        total += n as u64;
    }
}

/// Corrupt or truncated archive data is a format error; anything else is I/O.
pub(crate) fn read_error(source: &Path, err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::InvalidData
        | io::ErrorKind::InvalidInput
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::Other => Error::Format(format!("{}: {}", source.display(), err)),
        _ => Error::file(source, err),
    }
}
