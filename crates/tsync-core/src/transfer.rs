//! Streaming copies with cancellation and atomic file replacement

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::progress::Progress;

/// Size of the per-transfer copy buffer
pub const BUFFER_SIZE: usize = 8 * 1024;

/// Suffix of in-flight temporary files
pub const PARTIAL_SUFFIX: &str = ".tsync-part";

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Transfer canceled")]
    Canceled,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Copy `reader` into `writer`, polling `progress` for cancellation per chunk
pub fn copy(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    progress: Option<&Progress>,
) -> Result<u64, TransferError> {
    let mut buf = [0u8; BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        if progress.is_some_and(Progress::is_canceled) {
            return Err(TransferError::Canceled);
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
}

/// Reader that stops with an error once `progress` is canceled
///
/// Used where the copy loop belongs to someone else, such as a backend
/// consuming an upload stream.
pub struct CancelableReader<'a, R> {
    inner: R,
    progress: &'a Progress,
}

impl<'a, R: Read> CancelableReader<'a, R> {
    pub fn new(inner: R, progress: &'a Progress) -> Self {
        Self { inner, progress }
    }
}

impl<R: Read> Read for CancelableReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.progress.is_canceled() {
            return Err(io::Error::new(io::ErrorKind::Other, "transfer canceled"));
        }
        let len = buf.len().min(BUFFER_SIZE);
        self.inner.read(&mut buf[..len])
    }
}

/// Sibling path used while `path` is being written
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}

pub fn is_partial(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)
}

/// Replace `path` with everything read from `reader`
///
/// Content goes to a sibling temporary file first, which is renamed over
/// `path` once complete. On failure or cancellation the temporary file is
/// removed and `path` keeps its previous content.
pub fn write_atomically(
    path: &Path,
    reader: &mut dyn Read,
    progress: Option<&Progress>,
) -> Result<u64, TransferError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = partial_path(path);
    let result = (|| {
        let mut file = File::create(&temp_path)?;
        let written = copy(reader, &mut file, progress)?;
        file.sync_all()?;
        Ok::<_, TransferError>(written)
    })();

    match result {
        Ok(written) => {
            fs::rename(&temp_path, path)?;
            Ok(written)
        }
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            Err(e)
        }
    }
}

/// Compare two streams byte for byte
pub fn same_content(
    left: &mut dyn Read,
    right: &mut dyn Read,
    progress: Option<&Progress>,
) -> Result<bool, TransferError> {
    let mut a = [0u8; BUFFER_SIZE];
    let mut b = [0u8; BUFFER_SIZE];
    loop {
        if progress.is_some_and(Progress::is_canceled) {
            return Err(TransferError::Canceled);
        }
        let n = read_full(left, &mut a)?;
        let m = read_full(right, &mut b)?;
        if n != m || a[..n] != b[..m] {
            return Ok(false);
        }
        if n == 0 {
            return Ok(true);
        }
    }
}

/// Fill `buf` unless the stream ends first
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
