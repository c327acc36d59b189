//! Entry point tying configuration, sites and the synchronizer together
//!
//! A [`TargetContext`] binds local roots to sites and hands out
//! [`TargetProvider`]s for resources inside bound roots. Bindings are
//! persisted through the synchronizer against their root, so a later
//! process finds them again by walking up from any resource.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::depth::Depth;
use crate::error::{TargetError, TargetResult};
use crate::location::{LocationMapping, SiteRegistry};
use crate::provider::{
    load_configuration, remove_configuration, save_configuration, TargetConfiguration,
    TargetProvider, KEY_TYPE,
};
use crate::state::state_key;
use crate::synchronizer::{MemorySynchronizer, QualifiedKey, SqliteSynchronizer, Synchronizer};

/// Qualifier of persisted location mappings
pub const MAPPING_QUALIFIER: &str = "tsync.mapping";

pub fn mapping_key() -> QualifiedKey {
    QualifiedKey::new(MAPPING_QUALIFIER, "binding")
}

pub struct TargetContext {
    config: Config,
    registry: SiteRegistry,
    synchronizer: Arc<dyn Synchronizer>,
}

impl TargetContext {
    /// Open the persistent context described by `config`
    pub fn open(config: Config) -> Result<Self> {
        let synchronizer = SqliteSynchronizer::open(&config.database_path())?;
        Ok(Self::new(config, Arc::new(synchronizer)))
    }

    pub fn new(config: Config, synchronizer: Arc<dyn Synchronizer>) -> Self {
        Self {
            config,
            registry: SiteRegistry::with_defaults(),
            synchronizer,
        }
    }

    /// A context that forgets everything when dropped
    pub fn in_memory() -> Self {
        Self::new(Config::default(), Arc::new(MemorySynchronizer::new()))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SiteRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SiteRegistry {
        &mut self.registry
    }

    pub fn synchronizer(&self) -> &Arc<dyn Synchronizer> {
        &self.synchronizer
    }

    /// Bind `root` to the site named by `configuration`
    ///
    /// Rebinding a root to a different site forgets its baselines.
    pub fn configure(
        &mut self,
        root: &Path,
        configuration: TargetConfiguration,
    ) -> TargetResult<TargetProvider> {
        let backend = self.registry.create_backend(&configuration)?;
        let mapping = LocationMapping::new(configuration.kind()?, configuration.url()?, root);

        if let Some(previous) = self.load_mapping(root)? {
            if previous.site() != mapping.site() {
                info!(root = %root.display(), from = previous.url(), to = mapping.url(), "site changed, dropping baselines");
                self.forget_state(&previous)?;
            }
        }

        save_configuration(self.synchronizer.as_ref(), root, &configuration)?;
        self.store_mapping(&mapping)?;
        self.registry.bind(mapping.clone())?;

        TargetProvider::new(
            mapping,
            configuration,
            backend,
            Arc::clone(&self.synchronizer),
        )
    }

    /// Provider for the bound root containing `local`, if any
    pub fn provider(&mut self, local: &Path) -> TargetResult<Option<TargetProvider>> {
        let mapping = match self.registry.mapping_for(local) {
            Some(mapping) => mapping.clone(),
            None => match self.find_persisted(local)? {
                Some(mapping) => {
                    self.registry.bind(mapping.clone())?;
                    mapping
                }
                None => return Ok(None),
            },
        };

        let configuration = load_configuration(self.synchronizer.as_ref(), mapping.path())?
            .ok_or_else(|| TargetError::RequiredConfigurationMissing {
                key: KEY_TYPE.to_string(),
            })?;
        let backend = self.registry.create_backend(&configuration)?;
        TargetProvider::new(
            mapping,
            configuration,
            backend,
            Arc::clone(&self.synchronizer),
        )
        .map(Some)
    }

    /// Remove the binding of `root` along with its configuration and baselines
    pub fn unconfigure(&mut self, root: &Path) -> TargetResult<Option<LocationMapping>> {
        let persisted = self.load_mapping(root)?;
        let bound = self.registry.unbind(root);
        let Some(mapping) = bound.or(persisted) else {
            return Ok(None);
        };

        self.forget_state(&mapping)?;
        remove_configuration(self.synchronizer.as_ref(), root)?;
        let key = mapping_key();
        self.synchronizer.add(&key)?;
        self.synchronizer.set(&key, root, None)?;
        Ok(Some(mapping))
    }

    fn forget_state(&self, mapping: &LocationMapping) -> TargetResult<()> {
        let key = state_key(mapping.kind(), mapping.path());
        self.synchronizer.add(&key)?;
        self.synchronizer.flush(&key, mapping.path(), Depth::Infinite)
    }

    fn store_mapping(&self, mapping: &LocationMapping) -> TargetResult<()> {
        let bytes = mapping
            .encode()
            .map_err(|e| TargetError::InvalidConfiguration {
                details: e.to_string(),
            })?;
        let key = mapping_key();
        self.synchronizer.add(&key)?;
        self.synchronizer.set(&key, mapping.path(), Some(&bytes))
    }

    fn load_mapping(&self, root: &Path) -> TargetResult<Option<LocationMapping>> {
        let key = mapping_key();
        self.synchronizer.add(&key)?;
        let Some(bytes) = self.synchronizer.get(&key, root)? else {
            return Ok(None);
        };
        match LocationMapping::decode(&bytes) {
            Ok(mapping) => Ok(Some(mapping)),
            Err(e) => {
                warn!(root = %root.display(), error = %e, "ignoring unreadable mapping record");
                Ok(None)
            }
        }
    }

    /// Innermost persisted binding at or above `local`
    fn find_persisted(&self, local: &Path) -> TargetResult<Option<LocationMapping>> {
        let mut candidate: Option<PathBuf> = Some(local.to_path_buf());
        while let Some(path) = candidate {
            if let Some(mapping) = self.load_mapping(&path)? {
                debug!(root = %path.display(), "restored binding");
                return Ok(Some(mapping));
            }
            candidate = path.parent().map(Path::to_path_buf);
        }
        Ok(None)
    }
}
