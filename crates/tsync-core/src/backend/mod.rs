//! Remote backend capability
//!
//! A [`RemoteBackend`] is the only thing the synchronization engine knows
//! about a target. It answers existence, size, timestamp and children
//! queries, streams content in both directions, and hands out an opaque
//! identifier that changes whenever the remote resource changes.
//!
//! Backends are addressed by [`RemotePath`], a `/`-separated path relative
//! to the site's base URL.

mod filesystem;
mod memory;

pub use filesystem::FileSystemBackend;
pub use memory::MemoryBackend;

use std::fmt;
use std::io::{self, Read};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Errors reported by a backend
///
/// These never leave the core as-is; operations wrap them in
/// [`TargetError::Io`](crate::error::TargetError::Io).
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Remote resource not found: {0}")]
    NotFound(String),

    #[error("{operation} failed: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Other(String),

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),
}

impl BackendError {
    /// Attach the failing operation to an I/O error
    pub fn io(operation: &'static str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return BackendError::NotFound(source.to_string());
        }
        BackendError::Io { operation, source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }
}

impl From<io::Error> for BackendError {
    fn from(err: io::Error) -> Self {
        BackendError::io("I/O", err)
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Path of a resource relative to a site's base URL
///
/// Segments are joined with `/`; the site root is the empty path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RemotePath(String);

impl RemotePath {
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Build from a `/`-separated string, dropping empty segments
    pub fn new(path: &str) -> Self {
        let joined = path
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .collect::<Vec<_>>()
            .join("/");
        Self(joined)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn join(&self, name: &str) -> Self {
        if self.0.is_empty() {
            Self::new(name)
        } else {
            Self::new(&format!("{}/{}", self.0, name))
        }
    }

    /// Last segment, or `None` at the root
    pub fn name(&self) -> Option<&str> {
        if self.0.is_empty() {
            None
        } else {
            self.0.rsplit('/').next()
        }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

/// Kind of a remote resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Container,
}

/// Metadata for one remote resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    pub fn is_container(&self) -> bool {
        self.kind == EntryKind::Container
    }
}

/// Capability interface over a remote target
///
/// Implementations must be usable from any thread. Paths that do not exist
/// are reported as `Ok(None)` from [`stat`](Self::stat) and as
/// [`BackendError::NotFound`] from everything else.
pub trait RemoteBackend: Send + Sync {
    /// Short name of the site type (`file`, `memory`, ...)
    fn kind(&self) -> &str;

    /// Metadata for `path`, or `None` if it does not exist
    fn stat(&self, path: &RemotePath) -> BackendResult<Option<RemoteEntry>>;

    fn exists(&self, path: &RemotePath) -> BackendResult<bool> {
        Ok(self.stat(path)?.is_some())
    }

    fn size(&self, path: &RemotePath) -> BackendResult<u64> {
        self.stat(path)?
            .map(|e| e.size)
            .ok_or_else(|| BackendError::NotFound(path.to_string()))
    }

    fn last_modified(&self, path: &RemotePath) -> BackendResult<Option<DateTime<Utc>>> {
        self.stat(path)?
            .map(|e| e.last_modified)
            .ok_or_else(|| BackendError::NotFound(path.to_string()))
    }

    /// Direct members of a container, sorted by name
    fn children(&self, path: &RemotePath) -> BackendResult<Vec<RemoteEntry>>;

    /// Create `path` and any missing parents as containers
    fn mkdirs(&self, path: &RemotePath) -> BackendResult<()>;

    /// Stream the content of a file
    fn open(&self, path: &RemotePath) -> BackendResult<Box<dyn Read + Send>>;

    /// Replace (or create) a file with everything read from `content`
    fn write(&self, path: &RemotePath, content: &mut dyn Read) -> BackendResult<()>;

    /// Delete a file or a container with all its members
    fn delete(&self, path: &RemotePath) -> BackendResult<()>;

    /// Opaque token that changes whenever the resource changes
    fn released_identifier(&self, path: &RemotePath) -> BackendResult<String>;

    /// Server-side checkout hook; optimistic backends do nothing
    fn checkout(&self, _path: &RemotePath) -> BackendResult<()> {
        Ok(())
    }
}
