//! Per-resource synchronization state
//!
//! A [`ResourceState`] binds one local resource to its remote counterpart.
//! It remembers the [`Baseline`] of the last successful transfer (the local
//! modification time and the remote's released identifier) and implements
//! the optimistic checkout/checkin protocol on top of it.
//!
//! States are cheap to build and are never cached: [`Binding::state`]
//! constructs a fresh one and hydrates it from the synchronizer every time.
//! The checked-out flag is held in memory only, so a fresh state always
//! starts checked out.
//!
//! ## Record format
//!
//! ```text
//! [format tag: u8 = 1][remote identifier: UTF][local timestamp: i64]
//! ```
//!
//! An empty identifier and a timestamp of `-1` mean "never synchronized".
//! Records that fail to decode are treated as absent.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::backend::{BackendError, RemoteBackend, RemoteEntry, RemotePath};
use crate::codec::{CodecError, RecordReader, RecordWriter};
use crate::depth::Depth;
use crate::error::{TargetError, TargetResult};
use crate::progress::Progress;
use crate::synchronizer::{QualifiedKey, Synchronizer};
use crate::transfer::{self, CancelableReader, TransferError};

/// Format tag of the state record
pub const STATE_FORMAT_TAG: u8 = 1;

/// Qualifier of every state record family
pub const STATE_QUALIFIER: &str = "tsync.state";

const UNSET_IDENTIFIER: &str = "";
const UNSET_TIMESTAMP: i64 = -1;

/// Last known synchronized state of a resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baseline {
    /// Local modification time in milliseconds since the epoch
    pub local_timestamp: Option<i64>,
    /// Remote released identifier
    pub remote_identifier: Option<String>,
}

impl Baseline {
    pub fn new(local_timestamp: i64, remote_identifier: impl Into<String>) -> Self {
        let identifier = remote_identifier.into();
        Self {
            local_timestamp: Some(local_timestamp),
            remote_identifier: (!identifier.is_empty()).then_some(identifier),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.local_timestamp.is_none() && self.remote_identifier.is_none()
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut writer = RecordWriter::new();
        writer.put_u8(STATE_FORMAT_TAG);
        writer.put_utf(self.remote_identifier.as_deref().unwrap_or(UNSET_IDENTIFIER))?;
        writer.put_i64(self.local_timestamp.unwrap_or(UNSET_TIMESTAMP));
        Ok(writer.into_bytes())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = RecordReader::new(bytes);
        let tag = reader.u8()?;
        if tag != STATE_FORMAT_TAG {
            return Err(CodecError::UnsupportedVersion {
                found: tag.into(),
                expected: STATE_FORMAT_TAG.into(),
            });
        }
        let identifier = reader.utf()?;
        let timestamp = reader.i64()?;
        reader.finish()?;

        Ok(Self {
            local_timestamp: (timestamp != UNSET_TIMESTAMP).then_some(timestamp),
            remote_identifier: (!identifier.is_empty()).then_some(identifier),
        })
    }
}

/// What a transfer actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Content was copied; the byte count
    Copied(u64),
    /// Both sides already matched the baseline
    Unchanged,
    /// A container was created
    Container,
}

/// Key of the state records for a site type and traversal root
pub fn state_key(kind: &str, root: &Path) -> QualifiedKey {
    QualifiedKey::new(STATE_QUALIFIER, format!("{}:{}", kind, root.display()))
}

/// Map `local` under `root` to a remote path, or `None` if outside it
pub fn relative_remote_path(root: &Path, local: &Path) -> Option<RemotePath> {
    let relative = local.strip_prefix(root).ok()?;
    let mut names = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => names.push(name.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(RemotePath::new(&names.join("/")))
}

/// A local root bound to a remote backend
///
/// Everything a [`ResourceState`] needs besides its own paths.
#[derive(Clone)]
pub struct Binding {
    root: PathBuf,
    backend: Arc<dyn RemoteBackend>,
    synchronizer: Arc<dyn Synchronizer>,
    key: QualifiedKey,
}

impl Binding {
    /// Bind `root` and register its state key with the synchronizer
    pub fn new(
        root: impl Into<PathBuf>,
        backend: Arc<dyn RemoteBackend>,
        synchronizer: Arc<dyn Synchronizer>,
    ) -> TargetResult<Self> {
        let root = root.into();
        let key = state_key(backend.kind(), &root);
        synchronizer.add(&key)?;
        Ok(Self {
            root,
            backend,
            synchronizer,
            key,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backend(&self) -> &Arc<dyn RemoteBackend> {
        &self.backend
    }

    pub fn synchronizer(&self) -> &Arc<dyn Synchronizer> {
        &self.synchronizer
    }

    pub fn key(&self) -> &QualifiedKey {
        &self.key
    }

    pub fn contains(&self, local: &Path) -> bool {
        relative_remote_path(&self.root, local).is_some()
    }

    /// Fresh, hydrated state for `local`
    pub fn state(&self, local: &Path) -> TargetResult<ResourceState> {
        let remote =
            relative_remote_path(&self.root, local).ok_or_else(|| {
                TargetError::NoRemoteResource {
                    path: local.to_path_buf(),
                }
            })?;
        let mut state = ResourceState {
            local: local.to_path_buf(),
            remote,
            baseline: Baseline::default(),
            checked_out: true,
            binding: self.clone(),
        };
        state.load_state()?;
        Ok(state)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("root", &self.root)
            .field("backend", &self.backend.kind())
            .field("key", &self.key)
            .finish()
    }
}

/// A remote member together with the state of its local counterpart
#[derive(Debug, Clone)]
pub struct RemoteChild {
    pub entry: RemoteEntry,
    pub state: ResourceState,
}

/// Synchronization state of one local resource
#[derive(Debug, Clone)]
pub struct ResourceState {
    local: PathBuf,
    remote: RemotePath,
    baseline: Baseline,
    checked_out: bool,
    binding: Binding,
}

fn modified_millis(meta: &fs::Metadata) -> io::Result<i64> {
    Ok(DateTime::<Utc>::from(meta.modified()?).timestamp_millis())
}

impl ResourceState {
    pub fn local(&self) -> &Path {
        &self.local
    }

    pub fn remote_path(&self) -> &RemotePath {
        &self.remote
    }

    pub fn root(&self) -> &Path {
        self.binding.root()
    }

    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    pub fn is_checked_out(&self) -> bool {
        self.checked_out
    }

    /// Whether a baseline was ever established
    pub fn has_baseline(&self) -> bool {
        !self.baseline.is_empty()
    }

    pub fn local_base_timestamp(&self) -> TargetResult<i64> {
        self.baseline
            .local_timestamp
            .ok_or_else(|| TargetError::NoBaseline {
                path: self.local.clone(),
            })
    }

    pub fn remote_base_identifier(&self) -> TargetResult<&str> {
        self.baseline
            .remote_identifier
            .as_deref()
            .ok_or_else(|| TargetError::NoBaseline {
                path: self.local.clone(),
            })
    }

    fn local_io(&self, operation: &'static str, err: io::Error) -> TargetError {
        TargetError::io(&self.local, BackendError::io(operation, err))
    }

    fn remote_io(&self, err: BackendError) -> TargetError {
        TargetError::io(&self.local, err)
    }

    fn transfer_error(&self, operation: &'static str, err: TransferError) -> TargetError {
        match err {
            TransferError::Canceled => TargetError::Canceled,
            TransferError::Io(e) => self.local_io(operation, e),
        }
    }

    /// Metadata of the local resource, `None` if it does not exist
    ///
    /// Symbolic links are not followed: a link is a leaf, whatever it
    /// points at.
    pub fn local_metadata(&self) -> TargetResult<Option<fs::Metadata>> {
        match fs::symlink_metadata(&self.local) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.local_io("stat", e)),
        }
    }

    pub fn local_exists(&self) -> TargetResult<bool> {
        Ok(self.local_metadata()?.is_some())
    }

    pub fn local_is_container(&self) -> TargetResult<bool> {
        Ok(self.local_metadata()?.is_some_and(|m| m.is_dir()))
    }

    /// Names of the local members, sorted; empty unless a container
    pub fn local_children(&self) -> TargetResult<Vec<OsString>> {
        if !self.local_is_container()? {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for dirent in fs::read_dir(&self.local).map_err(|e| self.local_io("list", e))? {
            let dirent = dirent.map_err(|e| self.local_io("list", e))?;
            let name = dirent.file_name();
            if !name.to_str().is_some_and(transfer::is_partial) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn remote_entry(&self) -> TargetResult<Option<RemoteEntry>> {
        self.binding
            .backend
            .stat(&self.remote)
            .map_err(|e| self.remote_io(e))
    }

    pub fn has_remote(&self) -> TargetResult<bool> {
        Ok(self.remote_entry()?.is_some())
    }

    /// Whether the local resource changed since the baseline
    ///
    /// A missing local resource is always dirty. Without a baseline
    /// timestamp an existing resource is never dirty.
    pub fn is_dirty(&self) -> TargetResult<bool> {
        let Some(meta) = self.local_metadata()? else {
            return Ok(true);
        };
        let Some(base) = self.baseline.local_timestamp else {
            return Ok(false);
        };
        let current = modified_millis(&meta).map_err(|e| self.local_io("stat", e))?;
        Ok(current != base)
    }

    /// Whether the remote resource changed since the baseline
    ///
    /// Without a baseline identifier this is always `false`. A remote that
    /// vanished after the baseline was taken is out of date.
    pub fn is_out_of_date(&self) -> TargetResult<bool> {
        let Some(base) = self.baseline.remote_identifier.as_deref() else {
            return Ok(false);
        };
        match self.binding.backend.released_identifier(&self.remote) {
            Ok(current) => Ok(current != base),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(self.remote_io(e)),
        }
    }

    /// Full baseline present and neither side moved away from it
    fn matches_baseline(&self) -> TargetResult<bool> {
        Ok(self.baseline.local_timestamp.is_some()
            && self.baseline.remote_identifier.is_some()
            && !self.is_dirty()?
            && !self.is_out_of_date()?)
    }

    /// Mark the resource editable
    pub fn checkout(&mut self, _progress: &Progress) -> TargetResult<()> {
        if self.is_out_of_date()? {
            return Err(TargetError::Conflict {
                path: self.local.clone(),
            });
        }
        if !self.has_remote()? {
            return Err(TargetError::NoRemoteResource {
                path: self.local.clone(),
            });
        }
        if self.checked_out {
            return Err(TargetError::NotCheckedIn {
                path: self.local.clone(),
            });
        }
        self.binding
            .backend
            .checkout(&self.remote)
            .map_err(|e| self.remote_io(e))?;
        self.checked_out = true;
        Ok(())
    }

    /// Upload local changes and mark the resource synchronized
    ///
    /// The flag only flips once the upload succeeded.
    pub fn checkin(&mut self, progress: &Progress) -> TargetResult<Transfer> {
        if !self.checked_out {
            return Err(TargetError::NotCheckedOut {
                path: self.local.clone(),
            });
        }
        if self.is_out_of_date()? {
            return Err(TargetError::Conflict {
                path: self.local.clone(),
            });
        }
        let transfer = self.upload(progress)?;
        self.checked_out = false;
        Ok(transfer)
    }

    /// Drop the checkout without touching local content
    pub fn uncheckout(&mut self, _progress: &Progress) -> TargetResult<()> {
        if !self.checked_out {
            return Err(TargetError::NotCheckedOut {
                path: self.local.clone(),
            });
        }
        self.checked_out = false;
        Ok(())
    }

    /// Replace the local resource with the remote one
    pub fn download(&mut self, progress: &Progress) -> TargetResult<Transfer> {
        progress.check_canceled()?;
        let entry = self
            .remote_entry()?
            .ok_or_else(|| TargetError::NoRemoteResource {
                path: self.local.clone(),
            })?;

        if entry.is_container() {
            self.create_local_container()?;
            return Ok(Transfer::Container);
        }

        if let Some(meta) = self.local_metadata()? {
            if meta.is_dir() {
                self.delete_local()?;
            } else if self.matches_baseline()? {
                debug!(local = %self.local.display(), "content unchanged, skipping download");
                self.store_state()?;
                return Ok(Transfer::Unchanged);
            }
        }

        let backend = Arc::clone(&self.binding.backend);
        let identifier = backend
            .released_identifier(&self.remote)
            .map_err(|e| self.remote_io(e))?;
        let mut reader = backend.open(&self.remote).map_err(|e| self.remote_io(e))?;
        let bytes = transfer::write_atomically(&self.local, &mut reader, Some(progress))
            .map_err(|e| self.transfer_error("download", e))?;

        let meta = fs::metadata(&self.local).map_err(|e| self.local_io("stat", e))?;
        let timestamp = modified_millis(&meta).map_err(|e| self.local_io("stat", e))?;
        self.baseline = Baseline::new(timestamp, identifier);
        self.store_state()?;

        info!(local = %self.local.display(), remote = %self.remote, bytes, "downloaded");
        Ok(Transfer::Copied(bytes))
    }

    /// Replace the remote resource with the local one
    pub fn upload(&mut self, progress: &Progress) -> TargetResult<Transfer> {
        progress.check_canceled()?;
        let meta = self.local_metadata()?.ok_or_else(|| {
            TargetError::io(
                &self.local,
                BackendError::NotFound(self.local.display().to_string()),
            )
        })?;

        let backend = Arc::clone(&self.binding.backend);
        if meta.is_dir() {
            backend.mkdirs(&self.remote).map_err(|e| self.remote_io(e))?;
            self.baseline = Baseline::default();
            self.store_state()?;
            return Ok(Transfer::Container);
        }

        if self.matches_baseline()? {
            debug!(local = %self.local.display(), "content unchanged, skipping upload");
            self.store_state()?;
            return Ok(Transfer::Unchanged);
        }

        let timestamp = modified_millis(&meta).map_err(|e| self.local_io("stat", e))?;
        let file = File::open(&self.local).map_err(|e| self.local_io("open", e))?;
        let mut reader = CancelableReader::new(file, progress);
        if let Err(e) = backend.write(&self.remote, &mut reader) {
            if progress.is_canceled() {
                return Err(TargetError::Canceled);
            }
            return Err(self.remote_io(e));
        }

        let identifier = backend
            .released_identifier(&self.remote)
            .map_err(|e| self.remote_io(e))?;
        self.baseline = Baseline::new(timestamp, identifier);
        self.store_state()?;

        info!(local = %self.local.display(), remote = %self.remote, bytes = meta.len(), "uploaded");
        Ok(Transfer::Copied(meta.len()))
    }

    /// Delete the remote resource and forget the baselines below it
    pub fn delete(&mut self, progress: &Progress) -> TargetResult<()> {
        progress.check_canceled()?;
        match self.binding.backend.delete(&self.remote) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                return Err(TargetError::NoRemoteResource {
                    path: self.local.clone(),
                })
            }
            Err(e) => return Err(self.remote_io(e)),
        }
        self.baseline = Baseline::default();
        self.binding
            .synchronizer
            .flush(&self.binding.key, &self.local, Depth::Infinite)?;
        info!(remote = %self.remote, "deleted remote resource");
        Ok(())
    }

    /// Delete the local resource and every state record below it
    ///
    /// Returns `false` if there was nothing to delete.
    pub fn delete_local(&mut self) -> TargetResult<bool> {
        let meta = match fs::symlink_metadata(&self.local) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(self.local_io("stat", e)),
        };
        if meta.is_dir() {
            fs::remove_dir_all(&self.local).map_err(|e| self.local_io("delete", e))?;
        } else {
            fs::remove_file(&self.local).map_err(|e| self.local_io("delete", e))?;
        }
        self.baseline = Baseline::default();
        self.binding
            .synchronizer
            .flush(&self.binding.key, &self.local, Depth::Infinite)?;
        debug!(local = %self.local.display(), "deleted local resource");
        Ok(true)
    }

    /// Make the local resource an empty container if it is not one
    ///
    /// Returns `true` if anything was created.
    pub fn create_local_container(&mut self) -> TargetResult<bool> {
        if self.local_is_container()? {
            return Ok(false);
        }
        self.delete_local()?;
        fs::create_dir_all(&self.local).map_err(|e| self.local_io("mkdir", e))?;
        self.baseline = Baseline::default();
        self.store_state()?;
        debug!(local = %self.local.display(), "created local container");
        Ok(true)
    }

    /// Remote members with hydrated states; empty unless a container
    pub fn remote_children(&self) -> TargetResult<Vec<RemoteChild>> {
        match self.remote_entry()? {
            Some(entry) if entry.is_container() => {}
            _ => return Ok(Vec::new()),
        }
        let entries = self
            .binding
            .backend
            .children(&self.remote)
            .map_err(|e| self.remote_io(e))?;
        entries
            .into_iter()
            .map(|entry| {
                let state = self.child(&entry.name)?;
                Ok(RemoteChild { entry, state })
            })
            .collect()
    }

    /// Hydrated state of the member `name`
    pub fn child(&self, name: impl AsRef<OsStr>) -> TargetResult<ResourceState> {
        let name = name.as_ref();
        let mut state = ResourceState {
            local: self.local.join(name),
            remote: self.remote.join(&name.to_string_lossy()),
            baseline: Baseline::default(),
            checked_out: true,
            binding: self.binding.clone(),
        };
        state.load_state()?;
        Ok(state)
    }

    pub fn open_local(&self) -> TargetResult<File> {
        File::open(&self.local).map_err(|e| self.local_io("open", e))
    }

    pub fn open_remote(&self) -> TargetResult<Box<dyn Read + Send>> {
        self.binding
            .backend
            .open(&self.remote)
            .map_err(|e| self.remote_io(e))
    }

    /// Hydrate the baseline from the synchronizer
    pub fn load_state(&mut self) -> TargetResult<()> {
        let record = self
            .binding
            .synchronizer
            .get(&self.binding.key, &self.local)?;
        self.baseline = match record {
            None => Baseline::default(),
            Some(bytes) => Baseline::decode(&bytes).unwrap_or_else(|e| {
                warn!(
                    local = %self.local.display(),
                    error = %e,
                    "ignoring unreadable synchronization record"
                );
                Baseline::default()
            }),
        };
        Ok(())
    }

    /// Persist the baseline; an empty baseline removes the record
    pub fn store_state(&self) -> TargetResult<()> {
        let value = if self.baseline.is_empty() {
            None
        } else {
            Some(self.baseline.encode().map_err(|e| {
                TargetError::io(&self.local, BackendError::Other(e.to_string()))
            })?)
        };
        self.binding
            .synchronizer
            .set(&self.binding.key, &self.local, value.as_deref())
    }

    /// Forget the baseline of this resource
    pub fn remove_state(&mut self) -> TargetResult<()> {
        self.baseline = Baseline::default();
        self.binding
            .synchronizer
            .set(&self.binding.key, &self.local, None)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::error::ErrorKind;
    use crate::synchronizer::MemorySynchronizer;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    pub(crate) struct Fixture {
        pub dir: TempDir,
        pub backend: Arc<MemoryBackend>,
        pub synchronizer: Arc<MemorySynchronizer>,
        pub binding: Binding,
    }

    impl Fixture {
        pub fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let backend = Arc::new(MemoryBackend::new());
            let synchronizer = Arc::new(MemorySynchronizer::new());
            let binding = Binding::new(
                dir.path(),
                backend.clone() as Arc<dyn RemoteBackend>,
                synchronizer.clone() as Arc<dyn Synchronizer>,
            )
            .unwrap();
            Self {
                dir,
                backend,
                synchronizer,
                binding,
            }
        }

        pub fn path(&self, relative: &str) -> PathBuf {
            self.dir.path().join(relative)
        }

        pub fn state(&self, relative: &str) -> ResourceState {
            self.binding.state(&self.path(relative)).unwrap()
        }

        pub fn write_local(&self, relative: &str, content: &str) {
            let path = self.path(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }

        pub fn read_local(&self, relative: &str) -> String {
            fs::read_to_string(self.path(relative)).unwrap()
        }
    }

    /// Move a file's modification time into the future
    pub(crate) fn touch(path: &Path, seconds: u64) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(seconds))
            .unwrap();
    }

    #[test]
    fn test_baseline_record_layout() {
        let empty = Baseline::default().encode().unwrap();
        assert_eq!(empty, vec![1, 0, 0, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(Baseline::decode(&empty).unwrap(), Baseline::default());

        let baseline = Baseline::new(1_700_000_000_000, "rev-7");
        let decoded = Baseline::decode(&baseline.encode().unwrap()).unwrap();
        assert_eq!(decoded, baseline);
    }

    #[test]
    fn test_baseline_rejects_other_versions() {
        let mut bytes = Baseline::new(5, "x").encode().unwrap();
        bytes[0] = 2;
        assert!(matches!(
            Baseline::decode(&bytes),
            Err(CodecError::UnsupportedVersion { found: 2, .. })
        ));
        assert!(Baseline::decode(&bytes[..4]).is_err());
    }

    #[test]
    fn test_corrupt_record_means_no_baseline() {
        let fx = Fixture::new();
        let path = fx.path("a.txt");
        fx.synchronizer
            .set(fx.binding.key(), &path, Some(&[1, 0, 9, b'x']))
            .unwrap();

        let state = fx.binding.state(&path).unwrap();
        assert!(!state.has_baseline());
        assert_eq!(
            state.local_base_timestamp().unwrap_err().kind(),
            ErrorKind::NoBaseline
        );
        assert_eq!(
            state.remote_base_identifier().unwrap_err().kind(),
            ErrorKind::NoBaseline
        );
    }

    #[test]
    fn test_state_outside_root_has_no_remote() {
        let fx = Fixture::new();
        let err = fx.binding.state(Path::new("/elsewhere/a.txt")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoRemoteResource);
    }

    #[test]
    fn test_is_dirty_rules() {
        let fx = Fixture::new();
        fx.backend.insert_file("a.txt", "remote");

        // Missing locally: dirty by definition
        assert!(fx.state("a.txt").is_dirty().unwrap());

        // Present but never synchronized: not dirty
        fx.write_local("a.txt", "local");
        assert!(!fx.state("a.txt").is_dirty().unwrap());

        let mut state = fx.state("a.txt");
        state.download(&Progress::new()).unwrap();
        assert!(!fx.state("a.txt").is_dirty().unwrap());

        touch(&fx.path("a.txt"), 30);
        assert!(fx.state("a.txt").is_dirty().unwrap());
    }

    #[test]
    fn test_is_out_of_date() {
        let fx = Fixture::new();
        fx.backend.insert_file("a.txt", "one");
        assert!(!fx.state("a.txt").is_out_of_date().unwrap());

        fx.state("a.txt").download(&Progress::new()).unwrap();
        assert!(!fx.state("a.txt").is_out_of_date().unwrap());

        fx.backend.insert_file("a.txt", "two");
        assert!(fx.state("a.txt").is_out_of_date().unwrap());

        fx.backend.remove("a.txt");
        assert!(fx.state("a.txt").is_out_of_date().unwrap());
    }

    #[test]
    fn test_out_of_date_failure_propagates() {
        let fx = Fixture::new();
        fx.backend.insert_file("a.txt", "one");
        fx.state("a.txt").download(&Progress::new()).unwrap();

        fx.backend.fail_on("a.txt");
        let err = fx.state("a.txt").is_out_of_date().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailed);
    }

    #[test]
    fn test_checkin_checkout_protocol() {
        let fx = Fixture::new();
        let progress = Progress::new();
        fx.write_local("a.txt", "hello");

        let mut state = fx.state("a.txt");
        assert!(state.is_checked_out());
        assert_eq!(state.checkin(&progress).unwrap(), Transfer::Copied(5));
        assert!(!state.is_checked_out());
        assert_eq!(fx.backend.content("a.txt"), Some(b"hello".to_vec()));

        let err = state.checkin(&progress).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotCheckedOut);

        state.checkout(&progress).unwrap();
        assert!(state.is_checked_out());
        let err = state.checkout(&progress).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotCheckedIn);

        state.uncheckout(&progress).unwrap();
        let err = state.uncheckout(&progress).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotCheckedOut);
        assert_eq!(fx.read_local("a.txt"), "hello");
    }

    #[test]
    fn test_checkin_conflicts_when_remote_moved() {
        let fx = Fixture::new();
        let progress = Progress::new();
        fx.backend.insert_file("a.txt", "one");
        fx.state("a.txt").download(&progress).unwrap();

        fx.backend.insert_file("a.txt", "someone else");
        fx.write_local("a.txt", "mine");

        let mut state = fx.state("a.txt");
        let err = state.checkin(&progress).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(state.is_checked_out());
        assert_eq!(fx.backend.content("a.txt"), Some(b"someone else".to_vec()));
    }

    #[test]
    fn test_failed_upload_keeps_checkout() {
        let fx = Fixture::new();
        fx.write_local("a.txt", "hello");
        fx.backend.fail_on("a.txt");

        let mut state = fx.state("a.txt");
        let err = state.checkin(&Progress::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailed);
        assert!(state.is_checked_out());
        assert!(!state.has_baseline());
    }

    #[test]
    fn test_checkout_without_remote() {
        let fx = Fixture::new();
        fx.write_local("a.txt", "hello");
        let err = fx.state("a.txt").checkout(&Progress::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoRemoteResource);
    }

    #[test]
    fn test_download_skips_identical_content() {
        let fx = Fixture::new();
        let progress = Progress::new();
        fx.backend.insert_file("a.txt", "same");

        assert_eq!(
            fx.state("a.txt").download(&progress).unwrap(),
            Transfer::Copied(4)
        );
        assert_eq!(
            fx.state("a.txt").download(&progress).unwrap(),
            Transfer::Unchanged
        );
        assert_eq!(
            fx.state("a.txt").upload(&progress).unwrap(),
            Transfer::Unchanged
        );
    }

    #[test]
    fn test_download_replaces_local_container() {
        let fx = Fixture::new();
        fx.write_local("a/inner.txt", "x");
        fx.backend.insert_file("a", "now a file");

        fx.state("a").download(&Progress::new()).unwrap();
        assert!(fx.path("a").is_file());
        assert_eq!(fx.read_local("a"), "now a file");
    }

    #[test]
    fn test_canceled_download_keeps_local_content() {
        let fx = Fixture::new();
        fx.backend.insert_file("a.txt", vec![1u8; 64 * 1024]);
        fx.write_local("a.txt", "previous");

        let progress = Progress::new();
        let mut state = fx.state("a.txt");
        progress.cancel();
        let err = state.download(&progress).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Canceled);
        assert_eq!(fx.read_local("a.txt"), "previous");
        assert!(!state.has_baseline());
    }

    #[test]
    fn test_delete_remote_flushes_subtree() {
        let fx = Fixture::new();
        let progress = Progress::new();
        fx.backend.insert_file("d/a.txt", "a");
        fx.state("d").download(&progress).unwrap();
        fx.state("d/a.txt").download(&progress).unwrap();
        assert!(fx.state("d/a.txt").has_baseline());

        fx.state("d").delete(&progress).unwrap();
        assert!(fx.backend.paths().is_empty());
        assert!(!fx.state("d/a.txt").has_baseline());

        let err = fx.state("d").delete(&progress).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoRemoteResource);
    }

    #[test]
    fn test_remote_children() {
        let fx = Fixture::new();
        fx.backend.insert_file("d/a.txt", "a");
        fx.backend.insert_dir("d/sub");

        let children = fx.state("d").remote_children().unwrap();
        let names: Vec<_> = children.iter().map(|c| c.entry.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "sub"]);
        assert_eq!(children[0].state.local(), fx.path("d/a.txt"));
        assert_eq!(children[1].state.remote_path().as_str(), "d/sub");

        assert!(fx.state("d/a.txt").remote_children().unwrap().is_empty());
    }
}
