//! Volatile synchronizer

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{unregistered, within, QualifiedKey, Synchronizer};
use crate::depth::Depth;
use crate::error::TargetResult;

#[derive(Debug, Default)]
struct Inner {
    registered: HashSet<QualifiedKey>,
    records: HashMap<QualifiedKey, BTreeMap<PathBuf, Vec<u8>>>,
}

/// Synchronizer that keeps every record in memory
#[derive(Debug, Default)]
pub struct MemorySynchronizer {
    inner: Mutex<Inner>,
}

impl MemorySynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of records held under `key`
    pub fn len(&self, key: &QualifiedKey) -> usize {
        self.lock().records.get(key).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, key: &QualifiedKey) -> bool {
        self.len(key) == 0
    }
}

impl Synchronizer for MemorySynchronizer {
    fn add(&self, key: &QualifiedKey) -> TargetResult<()> {
        self.lock().registered.insert(key.clone());
        Ok(())
    }

    fn get(&self, key: &QualifiedKey, resource: &Path) -> TargetResult<Option<Vec<u8>>> {
        let inner = self.lock();
        if !inner.registered.contains(key) {
            return Err(unregistered(key));
        }
        Ok(inner
            .records
            .get(key)
            .and_then(|records| records.get(resource))
            .cloned())
    }

    fn set(&self, key: &QualifiedKey, resource: &Path, value: Option<&[u8]>) -> TargetResult<()> {
        let mut inner = self.lock();
        if !inner.registered.contains(key) {
            return Err(unregistered(key));
        }
        let records = inner.records.entry(key.clone()).or_default();
        match value {
            Some(bytes) => {
                records.insert(resource.to_path_buf(), bytes.to_vec());
            }
            None => {
                records.remove(resource);
            }
        }
        Ok(())
    }

    fn flush(&self, key: &QualifiedKey, resource: &Path, depth: Depth) -> TargetResult<()> {
        let mut inner = self.lock();
        if !inner.registered.contains(key) {
            return Err(unregistered(key));
        }
        if let Some(records) = inner.records.get_mut(key) {
            records.retain(|path, _| !within(resource, path, depth));
        }
        Ok(())
    }

    fn members(&self, key: &QualifiedKey, resource: &Path) -> TargetResult<Vec<PathBuf>> {
        let inner = self.lock();
        if !inner.registered.contains(key) {
            return Err(unregistered(key));
        }
        Ok(inner
            .records
            .get(key)
            .map(|records| {
                records
                    .keys()
                    .filter(|path| path.parent() == Some(resource))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
