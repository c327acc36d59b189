//! Generic batch walker
//!
//! Applies a per-resource action across a list of top-level resources and
//! collects one [`Status`] per resource. Every top-level resource is visited
//! exactly once whatever happens to the others, and the aggregate error is
//! raised only after the last one.
//!
//! With [`FanOut::AutoRecursive`] the walker also visits the members of each
//! resource at one step shallower depth, producing a status tree. A failing
//! node prunes its own subtree only; its siblings are still visited.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::depth::Depth;
use crate::error::{aggregate, BatchError, Status, TargetResult};
use crate::progress::Progress;

/// How the walker reaches below a top-level resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    /// Call the action once per top-level resource with the requested
    /// depth; the action handles any recursion itself
    Iterative,
    /// Call the action on each resource, then on each of its members
    AutoRecursive,
}

/// Run `action` over `resources` and aggregate the outcome
///
/// `members` lists the members of a resource and is only consulted for
/// [`FanOut::AutoRecursive`].
pub fn dispatch<A, M>(
    task: &str,
    resources: &[PathBuf],
    depth: Depth,
    mode: FanOut,
    progress: &Progress,
    mut action: A,
    mut members: M,
) -> Result<Vec<Status>, BatchError>
where
    A: FnMut(&Path, Depth) -> TargetResult<()>,
    M: FnMut(&Path) -> TargetResult<Vec<PathBuf>>,
{
    progress.begin(task, Some(resources.len()));

    let statuses: Vec<Status> = resources
        .iter()
        .map(|resource| {
            let status = visit(resource, depth, mode, progress, &mut action, &mut members);
            progress.worked(1);
            status
        })
        .collect();

    progress.done();

    let result = aggregate(statuses);
    match &result {
        Ok(statuses) => debug!(task, count = statuses.len(), "batch completed"),
        Err(e) => warn!(task, failed = e.failed_count(), "batch completed with failures"),
    }
    result
}

fn visit<A, M>(
    resource: &Path,
    depth: Depth,
    mode: FanOut,
    progress: &Progress,
    action: &mut A,
    members: &mut M,
) -> Status
where
    A: FnMut(&Path, Depth) -> TargetResult<()>,
    M: FnMut(&Path) -> TargetResult<Vec<PathBuf>>,
{
    if let Err(e) = progress.check_canceled() {
        return Status::error(resource, &e);
    }
    progress.subtask(&resource.display().to_string());

    if let Err(e) = action(resource, depth) {
        debug!(resource = %resource.display(), error = %e, "resource failed");
        return Status::error(resource, &e);
    }

    if mode == FanOut::Iterative || !depth.includes_members() {
        return Status::ok(resource);
    }

    let children = match members(resource) {
        Ok(children) => children,
        Err(e) => return Status::error(resource, &e),
    };
    let child_depth = depth.shallower();
    let statuses = children
        .iter()
        .map(|child| visit(child, child_depth, mode, progress, action, members))
        .collect();

    Status::ok(resource).with_children(statuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, Severity, TargetError};
    use std::collections::HashMap;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    fn no_members(_: &Path) -> TargetResult<Vec<PathBuf>> {
        Ok(Vec::new())
    }

    fn io_failure(path: &Path) -> TargetError {
        TargetError::io(
            path,
            crate::backend::BackendError::Other("boom".to_string()),
        )
    }

    #[test]
    fn test_every_resource_attempted_once() {
        let resources = paths(&["/w/a", "/w/b", "/w/c", "/w/d", "/w/e"]);
        let mut calls = 0;

        let err = dispatch(
            "test",
            &resources,
            Depth::Infinite,
            FanOut::Iterative,
            &Progress::new(),
            |path, _| {
                calls += 1;
                if path == Path::new("/w/c") {
                    Err(io_failure(path))
                } else {
                    Ok(())
                }
            },
            no_members,
        )
        .unwrap_err();

        assert_eq!(calls, 5);
        let statuses = err.statuses();
        assert_eq!(statuses.len(), 5);
        for (i, status) in statuses.iter().enumerate() {
            assert_eq!(status.resource, resources[i]);
            if i == 2 {
                assert_eq!(status.severity, Severity::Error);
                assert_eq!(status.kind, Some(ErrorKind::IoFailed));
            } else {
                assert_eq!(status.severity, Severity::Ok);
            }
        }
    }

    #[test]
    fn test_iterative_passes_depth_through() {
        let mut seen = Vec::new();
        let statuses = dispatch(
            "test",
            &paths(&["/w/a"]),
            Depth::One,
            FanOut::Iterative,
            &Progress::new(),
            |path, depth| {
                seen.push((path.to_path_buf(), depth));
                Ok(())
            },
            |_| panic!("iterative walks never list members"),
        )
        .unwrap();

        assert_eq!(statuses.len(), 1);
        assert_eq!(seen, vec![(PathBuf::from("/w/a"), Depth::One)]);
    }

    fn tree() -> HashMap<PathBuf, Vec<PathBuf>> {
        let mut tree = HashMap::new();
        tree.insert(PathBuf::from("/r"), paths(&["/r/a", "/r/b"]));
        tree.insert(PathBuf::from("/r/a"), paths(&["/r/a/x"]));
        tree.insert(PathBuf::from("/r/b"), paths(&["/r/b/y"]));
        tree
    }

    #[test]
    fn test_auto_recursive_builds_status_tree() {
        let tree = tree();
        let mut seen = Vec::new();
        let statuses = dispatch(
            "test",
            &paths(&["/r"]),
            Depth::Infinite,
            FanOut::AutoRecursive,
            &Progress::new(),
            |path, depth| {
                seen.push((path.to_path_buf(), depth));
                Ok(())
            },
            |path| Ok(tree.get(path).cloned().unwrap_or_default()),
        )
        .unwrap();

        assert_eq!(seen.len(), 5);
        assert!(seen.iter().all(|(_, d)| *d == Depth::Infinite));
        assert_eq!(statuses[0].children.len(), 2);
        assert_eq!(statuses[0].children[0].children[0].resource, Path::new("/r/a/x"));
    }

    #[test]
    fn test_depth_one_visits_members_at_zero() {
        let tree = tree();
        let mut seen = Vec::new();
        dispatch(
            "test",
            &paths(&["/r"]),
            Depth::One,
            FanOut::AutoRecursive,
            &Progress::new(),
            |path, depth| {
                seen.push((path.to_path_buf(), depth));
                Ok(())
            },
            |path| Ok(tree.get(path).cloned().unwrap_or_default()),
        )
        .unwrap();

        assert_eq!(
            seen,
            vec![
                (PathBuf::from("/r"), Depth::One),
                (PathBuf::from("/r/a"), Depth::Zero),
                (PathBuf::from("/r/b"), Depth::Zero),
            ]
        );
    }

    #[test]
    fn test_failure_prunes_subtree_but_not_siblings() {
        let tree = tree();
        let mut seen = Vec::new();
        let err = dispatch(
            "test",
            &paths(&["/r"]),
            Depth::Infinite,
            FanOut::AutoRecursive,
            &Progress::new(),
            |path, _| {
                seen.push(path.to_path_buf());
                if path == Path::new("/r/a") {
                    Err(io_failure(path))
                } else {
                    Ok(())
                }
            },
            |path| Ok(tree.get(path).cloned().unwrap_or_default()),
        )
        .unwrap_err();

        assert_eq!(seen, paths(&["/r", "/r/a", "/r/b", "/r/b/y"]));
        let root = &err.statuses()[0];
        assert_eq!(root.severity, Severity::Ok);
        assert!(root.children[0].children.is_empty());
        assert_eq!(root.failures().len(), 1);
    }

    #[test]
    fn test_failing_parent_skips_its_members() {
        let tree = tree();
        let mut seen = Vec::new();
        let err = dispatch(
            "test",
            &paths(&["/r", "/other"]),
            Depth::Infinite,
            FanOut::AutoRecursive,
            &Progress::new(),
            |path, _| {
                seen.push(path.to_path_buf());
                if path == Path::new("/r") {
                    Err(io_failure(path))
                } else {
                    Ok(())
                }
            },
            |path| Ok(tree.get(path).cloned().unwrap_or_default()),
        )
        .unwrap_err();

        assert_eq!(seen, paths(&["/r", "/other"]));
        assert_eq!(err.statuses().len(), 2);
        assert!(err.statuses()[1].is_ok());
    }

    #[test]
    fn test_cancellation_marks_remaining_resources() {
        let progress = Progress::new();
        let handle = progress.clone();
        let mut calls = 0;

        let err = dispatch(
            "test",
            &paths(&["/a", "/b", "/c"]),
            Depth::Zero,
            FanOut::Iterative,
            &progress,
            |_, _| {
                calls += 1;
                handle.cancel();
                Ok(())
            },
            no_members,
        )
        .unwrap_err();

        assert_eq!(calls, 1);
        let kinds: Vec<_> = err.statuses().iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![None, Some(ErrorKind::Canceled), Some(ErrorKind::Canceled)]
        );
    }
}
