//! Bulk operations over a bound local tree
//!
//! A [`TargetProvider`] exposes get, put, delete and the dirty/out-of-date
//! queries over lists of local resources. Every call builds fresh
//! [`ResourceState`]s; nothing is cached between calls.
//!
//! Batch operations attempt every requested resource and raise a single
//! [`BatchError`] afterwards if any of them failed.

mod configuration;
mod walker;

pub use configuration::{TargetConfiguration, CONFIGURATION_VERSION, KEY_TYPE, KEY_URL};
pub use walker::{dispatch, FanOut};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::backend::{BackendError, RemoteBackend};
use crate::classify::TargetSyncElement;
use crate::depth::Depth;
use crate::error::{BatchError, Status, TargetError, TargetResult};
use crate::location::LocationMapping;
use crate::progress::Progress;
use crate::reconcile::{reconcile, ReconcileStats};
use crate::state::{Binding, ResourceState};
use crate::synchronizer::{QualifiedKey, Synchronizer};

/// Qualifier of the provider configuration record
pub const CONFIGURATION_QUALIFIER: &str = "tsync.configuration";

/// Synchronizer key holding provider configurations, one per bound root
pub fn configuration_key() -> QualifiedKey {
    QualifiedKey::new(CONFIGURATION_QUALIFIER, "provider")
}

/// Stored configuration of the provider bound at `root`
///
/// A missing, corrupt or differently versioned record yields `None`.
pub fn load_configuration(
    synchronizer: &dyn Synchronizer,
    root: &Path,
) -> TargetResult<Option<TargetConfiguration>> {
    let key = configuration_key();
    synchronizer.add(&key)?;
    let record = synchronizer.get(&key, root)?;
    Ok(TargetConfiguration::from_record(record.as_deref()))
}

pub fn save_configuration(
    synchronizer: &dyn Synchronizer,
    root: &Path,
    configuration: &TargetConfiguration,
) -> TargetResult<()> {
    let key = configuration_key();
    synchronizer.add(&key)?;
    synchronizer.set(&key, root, Some(&configuration.encode()))
}

pub fn remove_configuration(synchronizer: &dyn Synchronizer, root: &Path) -> TargetResult<()> {
    let key = configuration_key();
    synchronizer.add(&key)?;
    synchronizer.set(&key, root, None)
}

/// Synchronization provider for one bound root
pub struct TargetProvider {
    mapping: LocationMapping,
    configuration: TargetConfiguration,
    binding: Binding,
}

impl TargetProvider {
    pub fn new(
        mapping: LocationMapping,
        configuration: TargetConfiguration,
        backend: Arc<dyn RemoteBackend>,
        synchronizer: Arc<dyn Synchronizer>,
    ) -> TargetResult<Self> {
        let binding = Binding::new(mapping.path(), backend, synchronizer)?;
        Ok(Self {
            mapping,
            configuration,
            binding,
        })
    }

    pub fn root(&self) -> &Path {
        self.mapping.path()
    }

    pub fn mapping(&self) -> &LocationMapping {
        &self.mapping
    }

    pub fn configuration(&self) -> &TargetConfiguration {
        &self.configuration
    }

    pub fn backend(&self) -> &Arc<dyn RemoteBackend> {
        self.binding.backend()
    }

    /// Fresh state for `resource`, hydrated from the synchronizer
    pub fn get_state(&self, resource: &Path) -> TargetResult<ResourceState> {
        self.binding.state(resource)
    }

    pub fn sync_element(&self, resource: &Path) -> TargetResult<TargetSyncElement> {
        Ok(TargetSyncElement::new(self.get_state(resource)?))
    }

    fn local_members(&self, resource: &Path) -> TargetResult<Vec<PathBuf>> {
        let state = self.get_state(resource)?;
        Ok(state
            .local_children()?
            .into_iter()
            .map(|name| resource.join(name))
            .collect())
    }

    /// Make each local tree match the remote one down to `depth`
    pub fn get(
        &self,
        resources: &[PathBuf],
        depth: Depth,
        progress: &Progress,
    ) -> Result<ReconcileStats, BatchError> {
        let mut total = ReconcileStats::default();
        dispatch(
            "get",
            resources,
            depth,
            FanOut::Iterative,
            progress,
            |resource, depth| {
                let mut state = self.get_state(resource)?;
                total.merge(reconcile(&mut state, depth, progress)?);
                Ok(())
            },
            |resource| self.local_members(resource),
        )?;
        Ok(total)
    }

    /// Check in each resource and its local members down to `depth`
    pub fn put(
        &self,
        resources: &[PathBuf],
        depth: Depth,
        progress: &Progress,
    ) -> Result<Vec<Status>, BatchError> {
        dispatch(
            "put",
            resources,
            depth,
            FanOut::AutoRecursive,
            progress,
            |resource, _| {
                let mut state = self.get_state(resource)?;
                state.checkin(progress)?;
                Ok(())
            },
            |resource| self.local_members(resource),
        )
    }

    /// Delete the remote counterpart of each resource
    ///
    /// A remote container is only deleted if `depth` reaches all of its
    /// members: at depth zero it must be empty, at depth one it may only
    /// hold files and empty containers.
    pub fn delete(
        &self,
        resources: &[PathBuf],
        depth: Depth,
        progress: &Progress,
    ) -> Result<Vec<Status>, BatchError> {
        dispatch(
            "delete",
            resources,
            depth,
            FanOut::Iterative,
            progress,
            |resource, depth| {
                let mut state = self.get_state(resource)?;
                if !remote_within(&state, depth)? {
                    return Err(TargetError::io(
                        resource,
                        BackendError::Other(format!(
                            "remote container has members below depth {}",
                            depth
                        )),
                    ));
                }
                state.delete(progress)
            },
            |resource| self.local_members(resource),
        )
    }

    /// Re-read the records of each local tree
    ///
    /// Records of resources that no longer exist locally are dropped;
    /// records that fail to decode are cleared.
    pub fn refresh_state(
        &self,
        resources: &[PathBuf],
        depth: Depth,
        progress: &Progress,
    ) -> Result<Vec<Status>, BatchError> {
        dispatch(
            "refresh",
            resources,
            depth,
            FanOut::Iterative,
            progress,
            |resource, depth| self.refresh_tree(resource, depth, progress),
            |resource| self.local_members(resource),
        )
    }

    fn refresh_tree(&self, resource: &Path, depth: Depth, progress: &Progress) -> TargetResult<()> {
        progress.check_canceled()?;
        let mut state = self.get_state(resource)?;
        if !state.local_exists()? {
            debug!(resource = %resource.display(), "dropping records of missing resource");
            state.remove_state()?;
            return self.binding.synchronizer().flush(
                self.binding.key(),
                resource,
                Depth::Infinite,
            );
        }
        state.store_state()?;

        if depth.includes_members() {
            // Recorded members may have vanished from disk
            let mut members: BTreeSet<PathBuf> = self.local_members(resource)?.into_iter().collect();
            members.extend(
                self.binding
                    .synchronizer()
                    .members(self.binding.key(), resource)?,
            );
            for member in members {
                self.refresh_tree(&member, depth.shallower(), progress)?;
            }
        }
        Ok(())
    }

    /// Whether any resource in the given local trees changed locally
    pub fn is_dirty(&self, resources: &[PathBuf], depth: Depth) -> TargetResult<bool> {
        self.any_in_trees(resources, depth, &|state| state.is_dirty())
    }

    /// Whether any resource in the given local trees changed remotely
    pub fn is_out_of_date(&self, resources: &[PathBuf], depth: Depth) -> TargetResult<bool> {
        self.any_in_trees(resources, depth, &|state| state.is_out_of_date())
    }

    pub fn has_remote(&self, resource: &Path) -> TargetResult<bool> {
        self.get_state(resource)?.has_remote()
    }

    fn any_in_trees(
        &self,
        resources: &[PathBuf],
        depth: Depth,
        check: &dyn Fn(&ResourceState) -> TargetResult<bool>,
    ) -> TargetResult<bool> {
        for resource in resources {
            if self.any_in_tree(resource, depth, check)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn any_in_tree(
        &self,
        resource: &Path,
        depth: Depth,
        check: &dyn Fn(&ResourceState) -> TargetResult<bool>,
    ) -> TargetResult<bool> {
        let state = self.get_state(resource)?;
        if check(&state)? {
            return Ok(true);
        }
        if depth.includes_members() {
            for member in self.local_members(resource)? {
                if self.any_in_tree(&member, depth.shallower(), check)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

/// Whether every remote member below `state` lies within `depth`
fn remote_within(state: &ResourceState, depth: Depth) -> TargetResult<bool> {
    if depth == Depth::Infinite {
        return Ok(true);
    }
    let children = state.remote_children()?;
    if depth == Depth::Zero {
        return Ok(children.is_empty());
    }
    for child in &children {
        if !remote_within(&child.state, depth.shallower())? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::error::{ErrorKind, Severity};
    use crate::state::tests::touch;
    use crate::synchronizer::MemorySynchronizer;
    use std::fs;
    use tempfile::TempDir;

    struct Setup {
        dir: TempDir,
        backend: Arc<MemoryBackend>,
        synchronizer: Arc<MemorySynchronizer>,
        provider: TargetProvider,
    }

    impl Setup {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let backend = Arc::new(MemoryBackend::new());
            let synchronizer = Arc::new(MemorySynchronizer::new());
            let mapping = LocationMapping::new("memory", "memory://test", dir.path());
            let provider = TargetProvider::new(
                mapping,
                TargetConfiguration::for_site("memory", "memory://test"),
                backend.clone() as Arc<dyn RemoteBackend>,
                synchronizer.clone() as Arc<dyn Synchronizer>,
            )
            .unwrap();
            Self {
                dir,
                backend,
                synchronizer,
                provider,
            }
        }

        fn path(&self, relative: &str) -> PathBuf {
            self.dir.path().join(relative)
        }

        fn paths(&self, relatives: &[&str]) -> Vec<PathBuf> {
            relatives.iter().map(|r| self.path(r)).collect()
        }

        fn write(&self, relative: &str, content: &str) {
            let path = self.path(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
    }

    #[test]
    fn test_get_attempts_every_resource() {
        let s = Setup::new();
        for name in ["a", "b", "c", "d"] {
            s.backend.insert_file(&format!("{}/f.txt", name), name);
        }
        s.backend.fail_on("b/f.txt");

        let err = s
            .provider
            .get(&s.paths(&["a", "b", "c", "d"]), Depth::Infinite, &Progress::new())
            .unwrap_err();

        let severities: Vec<_> = err.statuses().iter().map(|st| st.severity).collect();
        assert_eq!(
            severities,
            vec![Severity::Ok, Severity::Error, Severity::Ok, Severity::Ok]
        );
        assert!(s.path("a/f.txt").exists());
        assert!(s.path("c/f.txt").exists());
        assert!(s.path("d/f.txt").exists());
        assert!(!s.path("b/f.txt").exists());
    }

    #[test]
    fn test_get_returns_merged_stats() {
        let s = Setup::new();
        s.backend.insert_file("a/x.txt", "x");
        s.backend.insert_file("b/y.txt", "y");

        let stats = s
            .provider
            .get(&s.paths(&["a", "b"]), Depth::Infinite, &Progress::new())
            .unwrap();
        assert_eq!(stats.downloaded, 2);
        assert_eq!(stats.created, 2);
    }

    #[test]
    fn test_put_uploads_tree() {
        let s = Setup::new();
        s.write("site/index.html", "<html>");
        s.write("site/css/main.css", "body {}");

        let statuses = s
            .provider
            .put(&s.paths(&["site"]), Depth::Infinite, &Progress::new())
            .unwrap();

        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].children.len(), 2);
        assert!(s.backend.is_container("site/css"));
        assert_eq!(
            s.backend.content("site/css/main.css"),
            Some(b"body {}".to_vec())
        );
    }

    #[test]
    fn test_put_depth_one_skips_grandchildren() {
        let s = Setup::new();
        s.write("site/index.html", "<html>");
        s.write("site/css/main.css", "body {}");

        s.provider
            .put(&s.paths(&["site"]), Depth::One, &Progress::new())
            .unwrap();

        assert!(s.backend.content("site/index.html").is_some());
        assert!(s.backend.is_container("site/css"));
        assert!(s.backend.content("site/css/main.css").is_none());
    }

    #[test]
    fn test_put_conflict_is_reported_per_resource() {
        let s = Setup::new();
        s.backend.insert_file("a.txt", "a");
        s.backend.insert_file("b.txt", "b");
        s.provider
            .get(&s.paths(&["a.txt", "b.txt"]), Depth::Zero, &Progress::new())
            .unwrap();

        s.backend.insert_file("a.txt", "changed remotely");
        s.write("a.txt", "changed locally");
        s.write("b.txt", "changed locally");
        touch(&s.path("b.txt"), 30);

        let err = s
            .provider
            .put(&s.paths(&["a.txt", "b.txt"]), Depth::Zero, &Progress::new())
            .unwrap_err();
        assert_eq!(err.statuses()[0].kind, Some(ErrorKind::Conflict));
        assert!(err.statuses()[1].is_ok());
        assert_eq!(s.backend.content("b.txt"), Some(b"changed locally".to_vec()));
    }

    #[test]
    fn test_delete() {
        let s = Setup::new();
        s.backend.insert_file("a.txt", "a");

        s.provider
            .delete(&s.paths(&["a.txt"]), Depth::Zero, &Progress::new())
            .unwrap();
        assert!(s.backend.content("a.txt").is_none());

        let err = s
            .provider
            .delete(&s.paths(&["a.txt"]), Depth::Zero, &Progress::new())
            .unwrap_err();
        assert_eq!(err.statuses()[0].kind, Some(ErrorKind::NoRemoteResource));
    }

    #[test]
    fn test_delete_respects_depth() {
        let s = Setup::new();
        s.backend.insert_file("d/a.txt", "a");
        s.backend.insert_file("d/sub/b.txt", "b");
        s.backend.insert_dir("e");
        let roots = s.paths(&["d"]);

        for depth in [Depth::Zero, Depth::One] {
            let err = s
                .provider
                .delete(&roots, depth, &Progress::new())
                .unwrap_err();
            assert_eq!(err.statuses()[0].kind, Some(ErrorKind::IoFailed));
            assert!(s.backend.content("d/sub/b.txt").is_some());
        }

        s.provider
            .delete(&s.paths(&["e"]), Depth::Zero, &Progress::new())
            .unwrap();
        s.provider
            .delete(&s.paths(&["d/sub"]), Depth::One, &Progress::new())
            .unwrap();
        s.provider
            .delete(&roots, Depth::One, &Progress::new())
            .unwrap();
        assert!(s.backend.content("d/a.txt").is_none());
    }

    #[test]
    fn test_dirty_and_out_of_date_queries() {
        let s = Setup::new();
        s.backend.insert_file("d/a.txt", "a");
        s.backend.insert_file("d/sub/b.txt", "b");
        let roots = s.paths(&["d"]);
        s.provider
            .get(&roots, Depth::Infinite, &Progress::new())
            .unwrap();

        assert!(!s.provider.is_dirty(&roots, Depth::Infinite).unwrap());
        assert!(!s.provider.is_out_of_date(&roots, Depth::Infinite).unwrap());

        touch(&s.path("d/sub/b.txt"), 30);
        assert!(s.provider.is_dirty(&roots, Depth::Infinite).unwrap());
        assert!(!s.provider.is_dirty(&roots, Depth::One).unwrap());

        s.backend.insert_file("d/a.txt", "a2");
        assert!(s.provider.is_out_of_date(&roots, Depth::One).unwrap());
        assert!(!s.provider.is_out_of_date(&roots, Depth::Zero).unwrap());
    }

    #[test]
    fn test_has_remote_and_outside_root() {
        let s = Setup::new();
        s.backend.insert_file("a.txt", "a");
        assert!(s.provider.has_remote(&s.path("a.txt")).unwrap());
        assert!(!s.provider.has_remote(&s.path("b.txt")).unwrap());

        let err = s
            .provider
            .get_state(Path::new("/definitely/elsewhere"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoRemoteResource);
    }

    #[test]
    fn test_refresh_state() {
        let s = Setup::new();
        s.backend.insert_file("d/a.txt", "a");
        s.backend.insert_file("d/b.txt", "b");
        let roots = s.paths(&["d"]);
        s.provider
            .get(&roots, Depth::Infinite, &Progress::new())
            .unwrap();
        let key = s.provider.binding.key().clone();
        assert_eq!(s.synchronizer.len(&key), 2);

        fs::remove_file(s.path("d/a.txt")).unwrap();
        s.synchronizer
            .set(&key, &s.path("d/b.txt"), Some(&[7, 7, 7]))
            .unwrap();

        s.provider
            .refresh_state(&roots, Depth::Infinite, &Progress::new())
            .unwrap();
        assert!(s.synchronizer.is_empty(&key));
    }

    #[test]
    fn test_configuration_persistence() {
        let sync = MemorySynchronizer::new();
        let root = Path::new("/w/site");
        assert_eq!(load_configuration(&sync, root).unwrap(), None);

        let config = TargetConfiguration::for_site("file", "file:///srv");
        save_configuration(&sync, root, &config).unwrap();
        assert_eq!(load_configuration(&sync, root).unwrap(), Some(config));

        sync.set(&configuration_key(), root, Some(&[2, b'a', b'=', b'b']))
            .unwrap();
        assert_eq!(load_configuration(&sync, root).unwrap(), None);

        remove_configuration(&sync, root).unwrap();
        assert_eq!(load_configuration(&sync, root).unwrap(), None);
    }
}
