//! Backend for `file://` targets
//!
//! Serves a directory on a locally mounted filesystem (a network share, a
//! USB drive, another checkout). The released identifier combines the
//! modification time in nanoseconds with the file length.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};

use super::{BackendError, BackendResult, EntryKind, RemoteBackend, RemoteEntry, RemotePath};
use crate::transfer::{self, TransferError};

const URL_SCHEME: &str = "file://";

/// Remote target rooted at a local directory
#[derive(Debug, Clone)]
pub struct FileSystemBackend {
    root: PathBuf,
}

impl FileSystemBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Build from a `file:///absolute/path` URL
    pub fn from_url(url: &str) -> BackendResult<Self> {
        let path = url
            .strip_prefix(URL_SCHEME)
            .ok_or_else(|| BackendError::Other(format!("not a file URL: {}", url)))?;
        // Query strings and fragments mean nothing to a directory
        let path = path.split(['?', '#']).next().unwrap_or_default();
        if !path.starts_with('/') {
            return Err(BackendError::Other(format!(
                "file URL must hold an absolute path: {}",
                url
            )));
        }
        Ok(Self::new(path))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &RemotePath) -> PathBuf {
        path.segments().fold(self.root.clone(), |acc, s| acc.join(s))
    }

    fn entry(name: String, meta: &fs::Metadata) -> RemoteEntry {
        RemoteEntry {
            name,
            kind: if meta.is_dir() {
                EntryKind::Container
            } else {
                EntryKind::File
            },
            size: if meta.is_dir() { 0 } else { meta.len() },
            last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
        }
    }
}

impl RemoteBackend for FileSystemBackend {
    fn kind(&self) -> &str {
        "file"
    }

    fn stat(&self, path: &RemotePath) -> BackendResult<Option<RemoteEntry>> {
        let full = self.resolve(path);
        match fs::metadata(&full) {
            Ok(meta) => {
                let name = path.name().unwrap_or_default().to_string();
                Ok(Some(Self::entry(name, &meta)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackendError::io("stat", e)),
        }
    }

    fn children(&self, path: &RemotePath) -> BackendResult<Vec<RemoteEntry>> {
        let full = self.resolve(path);
        if !full.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for dirent in fs::read_dir(&full).map_err(|e| BackendError::io("list", e))? {
            let dirent = dirent.map_err(|e| BackendError::io("list", e))?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            if transfer::is_partial(&name) {
                continue;
            }
            let meta = dirent.metadata().map_err(|e| BackendError::io("stat", e))?;
            entries.push(Self::entry(name, &meta));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn mkdirs(&self, path: &RemotePath) -> BackendResult<()> {
        fs::create_dir_all(self.resolve(path)).map_err(|e| BackendError::io("mkdirs", e))
    }

    fn open(&self, path: &RemotePath) -> BackendResult<Box<dyn Read + Send>> {
        let file = File::open(self.resolve(path)).map_err(|e| BackendError::io("open", e))?;
        Ok(Box::new(file))
    }

    fn write(&self, path: &RemotePath, content: &mut dyn Read) -> BackendResult<()> {
        let full = self.resolve(path);
        if full.is_dir() {
            fs::remove_dir_all(&full).map_err(|e| BackendError::io("write", e))?;
        }
        transfer::write_atomically(&full, content, None).map_err(|e| match e {
            TransferError::Io(e) => BackendError::io("write", e),
            TransferError::Canceled => BackendError::Other("write canceled".to_string()),
        })?;
        Ok(())
    }

    fn delete(&self, path: &RemotePath) -> BackendResult<()> {
        let full = self.resolve(path);
        let meta = fs::symlink_metadata(&full).map_err(|e| BackendError::io("delete", e))?;
        if meta.is_dir() {
            fs::remove_dir_all(&full).map_err(|e| BackendError::io("delete", e))
        } else {
            fs::remove_file(&full).map_err(|e| BackendError::io("delete", e))
        }
    }

    fn released_identifier(&self, path: &RemotePath) -> BackendResult<String> {
        let meta =
            fs::metadata(self.resolve(path)).map_err(|e| BackendError::io("identify", e))?;
        let nanos = meta
            .modified()
            .map_err(|e| BackendError::io("identify", e))?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        if meta.is_dir() {
            Ok(format!("d:{}", nanos))
        } else {
            Ok(format!("{}:{}", nanos, meta.len()))
        }
    }
}
