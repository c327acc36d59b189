//! Error taxonomy and per-resource results
//!
//! Single-resource operations return a [`TargetError`] carrying one
//! [`ErrorKind`]. Batch operations collect one [`Status`] per requested
//! resource and, if any of them failed, raise a single [`BatchError`]
//! holding all of them.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::backend::BackendError;

/// Classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Conflict,
    NotCheckedOut,
    NotCheckedIn,
    NoRemoteResource,
    IoFailed,
    RequiredConfigurationMissing,
    InvalidConfiguration,
    NoBaseline,
    Canceled,
}

/// Errors raised by single-resource operations
#[derive(Error, Debug)]
pub enum TargetError {
    /// The remote changed since the last synchronization
    #[error("'{path}' was changed on the target since it was last synchronized")]
    Conflict { path: PathBuf },

    #[error("'{path}' is not checked out")]
    NotCheckedOut { path: PathBuf },

    #[error("'{path}' is already checked out")]
    NotCheckedIn { path: PathBuf },

    #[error("'{path}' has no counterpart on the target")]
    NoRemoteResource { path: PathBuf },

    /// Transport or local filesystem failure
    #[error("I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: BackendError,
    },

    #[error("Required configuration '{key}' is missing")]
    RequiredConfigurationMissing { key: String },

    #[error("Invalid configuration: {details}")]
    InvalidConfiguration { details: String },

    /// A baseline accessor was used on a resource that was never synchronized
    #[error("'{path}' has no synchronization baseline")]
    NoBaseline { path: PathBuf },

    #[error("Operation canceled")]
    Canceled,
}

impl TargetError {
    /// Wrap a backend or local I/O failure for `path`
    pub fn io(path: impl Into<PathBuf>, source: impl Into<BackendError>) -> Self {
        TargetError::Io {
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TargetError::Conflict { .. } => ErrorKind::Conflict,
            TargetError::NotCheckedOut { .. } => ErrorKind::NotCheckedOut,
            TargetError::NotCheckedIn { .. } => ErrorKind::NotCheckedIn,
            TargetError::NoRemoteResource { .. } => ErrorKind::NoRemoteResource,
            TargetError::Io { .. } => ErrorKind::IoFailed,
            TargetError::RequiredConfigurationMissing { .. } => {
                ErrorKind::RequiredConfigurationMissing
            }
            TargetError::InvalidConfiguration { .. } => ErrorKind::InvalidConfiguration,
            TargetError::NoBaseline { .. } => ErrorKind::NoBaseline,
            TargetError::Canceled => ErrorKind::Canceled,
        }
    }
}

/// Result type for single-resource operations
pub type TargetResult<T> = Result<T, TargetError>;

/// Severity of a [`Status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Error,
}

/// Outcome of an operation on one resource
///
/// Auto-recursive batch operations produce a tree of statuses mirroring the
/// resource tree; `children` is empty otherwise.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub resource: PathBuf,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Status>,
}

impl Status {
    pub fn ok(resource: impl Into<PathBuf>) -> Self {
        Self {
            resource: resource.into(),
            severity: Severity::Ok,
            kind: None,
            message: String::new(),
            children: Vec::new(),
        }
    }

    pub fn error(resource: impl Into<PathBuf>, error: &TargetError) -> Self {
        Self {
            resource: resource.into(),
            severity: Severity::Error,
            kind: Some(error.kind()),
            message: error.to_string(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<Status>) -> Self {
        self.children = children;
        self
    }

    /// True if this status and every nested status are OK
    pub fn is_ok(&self) -> bool {
        self.severity == Severity::Ok && self.children.iter().all(Status::is_ok)
    }

    /// All error statuses in this tree, depth-first
    pub fn failures(&self) -> Vec<&Status> {
        let mut out = Vec::new();
        self.collect_failures(&mut out);
        out
    }

    fn collect_failures<'a>(&'a self, out: &mut Vec<&'a Status>) {
        if self.severity == Severity::Error {
            out.push(self);
        }
        for child in &self.children {
            child.collect_failures(out);
        }
    }

    pub fn resource(&self) -> &Path {
        &self.resource
    }
}

/// Aggregate failure of a batch operation
///
/// Holds one status per requested top-level resource, in request order,
/// successes included.
#[derive(Error, Debug)]
#[error("{failed} of {total} resources failed")]
pub struct BatchError {
    failed: usize,
    total: usize,
    statuses: Vec<Status>,
}

impl BatchError {
    pub fn new(statuses: Vec<Status>) -> Self {
        let failed = statuses.iter().filter(|s| !s.is_ok()).count();
        Self {
            failed,
            total: statuses.len(),
            statuses,
        }
    }

    pub fn statuses(&self) -> &[Status] {
        &self.statuses
    }

    pub fn into_statuses(self) -> Vec<Status> {
        self.statuses
    }

    pub fn failed_count(&self) -> usize {
        self.failed
    }
}

/// Turn collected statuses into the batch result, raising once if any failed
pub fn aggregate(statuses: Vec<Status>) -> Result<Vec<Status>, BatchError> {
    if statuses.iter().all(Status::is_ok) {
        Ok(statuses)
    } else {
        Err(BatchError::new(statuses))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let path = PathBuf::from("/w/a.txt");
        assert_eq!(
            TargetError::Conflict { path: path.clone() }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            TargetError::io(&path, BackendError::NotFound("a.txt".into())).kind(),
            ErrorKind::IoFailed
        );
        assert_eq!(TargetError::Canceled.kind(), ErrorKind::Canceled);
    }

    #[test]
    fn test_error_display() {
        let err = TargetError::NotCheckedOut {
            path: PathBuf::from("/w/a.txt"),
        };
        let msg = err.to_string();
        assert!(msg.contains("not checked out"));
        assert!(msg.contains("/w/a.txt"));
    }

    #[test]
    fn test_status_tree_failures() {
        let err = TargetError::Canceled;
        let tree = Status::ok("/w").with_children(vec![
            Status::ok("/w/a"),
            Status::error("/w/b", &err).with_children(vec![Status::ok("/w/b/c")]),
        ]);

        assert!(!tree.is_ok());
        let failures = tree.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].resource(), Path::new("/w/b"));
        assert_eq!(failures[0].kind, Some(ErrorKind::Canceled));
    }

    #[test]
    fn test_aggregate() {
        assert!(aggregate(vec![Status::ok("/a"), Status::ok("/b")]).is_ok());

        let err = TargetError::NoRemoteResource {
            path: PathBuf::from("/b"),
        };
        let batch = aggregate(vec![Status::ok("/a"), Status::error("/b", &err)]).unwrap_err();
        assert_eq!(batch.statuses().len(), 2);
        assert_eq!(batch.failed_count(), 1);
        assert_eq!(batch.to_string(), "1 of 2 resources failed");
    }
}
