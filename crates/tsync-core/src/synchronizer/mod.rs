//! Key/value store for per-resource synchronization records
//!
//! A [`Synchronizer`] associates small byte records with local resources
//! under a [`QualifiedKey`]. Keys must be registered with [`add`] before
//! use. Records are independent of each other; flushing a resource can
//! reach its members to a given [`Depth`].
//!
//! [`add`]: Synchronizer::add

mod memory;
mod schema;
mod sqlite;

pub use memory::MemorySynchronizer;
pub use sqlite::SqliteSynchronizer;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::depth::Depth;
use crate::error::{TargetError, TargetResult};

/// Namespace for a family of records
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedKey {
    pub qualifier: String,
    pub local_name: String,
}

impl QualifiedKey {
    pub fn new(qualifier: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            qualifier: qualifier.into(),
            local_name: local_name.into(),
        }
    }
}

impl fmt::Display for QualifiedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.qualifier, self.local_name)
    }
}

/// Persistent per-resource record store
pub trait Synchronizer: Send + Sync {
    /// Register `key`; registering twice is harmless
    fn add(&self, key: &QualifiedKey) -> TargetResult<()>;

    /// Record stored for `resource`, if any
    fn get(&self, key: &QualifiedKey, resource: &Path) -> TargetResult<Option<Vec<u8>>>;

    /// Store a record, or remove it when `value` is `None`
    fn set(&self, key: &QualifiedKey, resource: &Path, value: Option<&[u8]>) -> TargetResult<()>;

    /// Remove the records of `resource` and of its members down to `depth`
    fn flush(&self, key: &QualifiedKey, resource: &Path, depth: Depth) -> TargetResult<()>;

    /// Direct members of `resource` that have a record, sorted
    fn members(&self, key: &QualifiedKey, resource: &Path) -> TargetResult<Vec<PathBuf>>;
}

pub(crate) fn unregistered(key: &QualifiedKey) -> TargetError {
    TargetError::InvalidConfiguration {
        details: format!("synchronizer key '{}' is not registered", key),
    }
}

/// Whether `candidate` is flushed together with `resource` at `depth`
pub(crate) fn within(resource: &Path, candidate: &Path, depth: Depth) -> bool {
    match depth {
        Depth::Zero => candidate == resource,
        Depth::One => candidate == resource || candidate.parent() == Some(resource),
        Depth::Infinite => candidate.starts_with(resource),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within() {
        let root = Path::new("/w/p");
        assert!(within(root, Path::new("/w/p"), Depth::Zero));
        assert!(!within(root, Path::new("/w/p/a"), Depth::Zero));

        assert!(within(root, Path::new("/w/p/a"), Depth::One));
        assert!(!within(root, Path::new("/w/p/a/b"), Depth::One));

        assert!(within(root, Path::new("/w/p/a/b"), Depth::Infinite));
        assert!(!within(root, Path::new("/w/pq"), Depth::Infinite));
    }
}
