//! Sites, bindings and backend factories
//!
//! A [`LocationMapping`] binds a local tree root to a remote site. The
//! [`SiteRegistry`] owns the known sites, the active bindings and the
//! factories that turn a site configuration into a [`RemoteBackend`].
//! Changes are announced on a broadcast channel.
//!
//! ## Mapping record
//!
//! ```text
//! [serial id: i64 = 1][type: UTF][url: UTF][path: UTF]
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::backend::{FileSystemBackend, MemoryBackend, RemoteBackend, RemotePath};
use crate::codec::{CodecError, RecordReader, RecordWriter};
use crate::error::{TargetError, TargetResult};
use crate::provider::TargetConfiguration;
use crate::state::relative_remote_path;

/// Serial id leading every mapping record
pub const MAPPING_SERIAL_ID: i64 = 1;

const EVENT_CAPACITY: usize = 64;

/// Binding of a local root to a remote site
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LocationMapping {
    kind: String,
    url: String,
    path: PathBuf,
}

impl LocationMapping {
    pub fn new(kind: impl Into<String>, url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            kind: kind.into(),
            url: url.into(),
            path: path.into(),
        }
    }

    /// Site type
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Local root
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn site(&self) -> Site {
        Site::new(&self.kind, &self.url)
    }

    pub fn contains(&self, local: &Path) -> bool {
        local.starts_with(&self.path)
    }

    pub fn remote_path_for(&self, local: &Path) -> Option<RemotePath> {
        relative_remote_path(&self.path, local)
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut writer = RecordWriter::new();
        writer.put_i64(MAPPING_SERIAL_ID);
        writer.put_utf(&self.kind)?;
        writer.put_utf(&self.url)?;
        writer.put_utf(&self.path.to_string_lossy())?;
        Ok(writer.into_bytes())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = RecordReader::new(bytes);
        let serial = reader.i64()?;
        if serial != MAPPING_SERIAL_ID {
            return Err(CodecError::UnsupportedVersion {
                found: serial,
                expected: MAPPING_SERIAL_ID,
            });
        }
        let kind = reader.utf()?;
        let url = reader.utf()?;
        let path = reader.utf()?;
        reader.finish()?;
        Ok(Self::new(kind, url, path))
    }
}

/// A remote site, identified by type and URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Site {
    pub kind: String,
    pub url: String,
}

impl Site {
    pub fn new(kind: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            url: url.into(),
        }
    }
}

/// Registry change notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteEvent {
    SiteAdded(Site),
    SiteRemoved(Site),
    Bound(LocationMapping),
    Unbound(LocationMapping),
}

/// Creates backends for one site type
pub trait BackendFactory: Send + Sync {
    fn kind(&self) -> &str;

    fn create(
        &self,
        url: &str,
        configuration: &TargetConfiguration,
    ) -> TargetResult<Arc<dyn RemoteBackend>>;
}

/// Factory for `file://` sites
#[derive(Debug, Default)]
pub struct FileBackendFactory;

impl BackendFactory for FileBackendFactory {
    fn kind(&self) -> &str {
        "file"
    }

    fn create(
        &self,
        url: &str,
        _configuration: &TargetConfiguration,
    ) -> TargetResult<Arc<dyn RemoteBackend>> {
        let backend =
            FileSystemBackend::from_url(url).map_err(|e| TargetError::InvalidConfiguration {
                details: e.to_string(),
            })?;
        Ok(Arc::new(backend))
    }
}

/// Factory for in-process `memory://` sites
///
/// Each URL maps to one shared [`MemoryBackend`] for the factory's lifetime.
#[derive(Debug, Default)]
pub struct MemoryBackendFactory {
    backends: Mutex<HashMap<String, Arc<MemoryBackend>>>,
}

impl MemoryBackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The backend serving `url`, created on first use
    pub fn backend(&self, url: &str) -> Arc<MemoryBackend> {
        let mut backends = self.backends.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(backends.entry(url.to_string()).or_default())
    }
}

impl BackendFactory for MemoryBackendFactory {
    fn kind(&self) -> &str {
        "memory"
    }

    fn create(
        &self,
        url: &str,
        _configuration: &TargetConfiguration,
    ) -> TargetResult<Arc<dyn RemoteBackend>> {
        if !url.starts_with("memory://") {
            return Err(TargetError::InvalidConfiguration {
                details: format!("not a memory URL: {}", url),
            });
        }
        Ok(self.backend(url))
    }
}

/// Known sites, bindings and backend factories
pub struct SiteRegistry {
    factories: HashMap<String, Arc<dyn BackendFactory>>,
    sites: Vec<Site>,
    mappings: Vec<LocationMapping>,
    events: broadcast::Sender<SiteEvent>,
}

impl SiteRegistry {
    /// An empty registry without any factories
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            factories: HashMap::new(),
            sites: Vec::new(),
            mappings: Vec::new(),
            events,
        }
    }

    /// A registry that knows `file://` sites
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_factory(Arc::new(FileBackendFactory));
        registry
    }

    pub fn register_factory(&mut self, factory: Arc<dyn BackendFactory>) {
        debug!(kind = factory.kind(), "registered backend factory");
        self.factories.insert(factory.kind().to_string(), factory);
    }

    /// Registered site types, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SiteEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SiteEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    /// Add a site of a registered type; returns `false` if already known
    pub fn add_site(&mut self, site: Site) -> TargetResult<bool> {
        if !self.factories.contains_key(&site.kind) {
            return Err(TargetError::InvalidConfiguration {
                details: format!("unknown site type '{}'", site.kind),
            });
        }
        if self.sites.contains(&site) {
            return Ok(false);
        }
        self.sites.push(site.clone());
        self.emit(SiteEvent::SiteAdded(site));
        Ok(true)
    }

    pub fn remove_site(&mut self, site: &Site) -> bool {
        let before = self.sites.len();
        self.sites.retain(|s| s != site);
        let removed = self.sites.len() != before;
        if removed {
            self.emit(SiteEvent::SiteRemoved(site.clone()));
        }
        removed
    }

    /// Build a backend for a validated provider configuration
    pub fn create_backend(
        &self,
        configuration: &TargetConfiguration,
    ) -> TargetResult<Arc<dyn RemoteBackend>> {
        configuration.validate()?;
        let kind = configuration.kind()?;
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| TargetError::InvalidConfiguration {
                details: format!("unknown site type '{}'", kind),
            })?;
        factory.create(configuration.url()?, configuration)
    }

    /// Bind a local root, replacing any binding of the same root
    pub fn bind(&mut self, mapping: LocationMapping) -> TargetResult<()> {
        self.add_site(mapping.site())?;
        self.mappings.retain(|m| m.path() != mapping.path());
        info!(root = %mapping.path().display(), url = mapping.url(), "bound");
        self.mappings.push(mapping.clone());
        self.emit(SiteEvent::Bound(mapping));
        Ok(())
    }

    pub fn unbind(&mut self, root: &Path) -> Option<LocationMapping> {
        let index = self.mappings.iter().position(|m| m.path() == root)?;
        let mapping = self.mappings.remove(index);
        info!(root = %root.display(), "unbound");
        self.emit(SiteEvent::Unbound(mapping.clone()));
        Some(mapping)
    }

    /// Innermost binding containing `local`
    pub fn mapping_for(&self, local: &Path) -> Option<&LocationMapping> {
        self.mappings
            .iter()
            .filter(|m| m.contains(local))
            .max_by_key(|m| m.path().components().count())
    }

    pub fn mappings(&self) -> &[LocationMapping] {
        &self.mappings
    }
}

impl Default for SiteRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
