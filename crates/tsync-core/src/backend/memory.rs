//! In-process backend
//!
//! Holds a whole remote tree in memory. Each mutation bumps a global
//! revision counter, and a resource's released identifier is the revision
//! at which it last changed. Paths can be marked as failing to exercise
//! error handling.

use std::collections::{BTreeMap, HashSet};
use std::io::{Cursor, Read};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{BackendError, BackendResult, EntryKind, RemoteBackend, RemoteEntry, RemotePath};

#[derive(Debug, Clone)]
enum Node {
    File { content: Vec<u8> },
    Container,
}

#[derive(Debug, Clone)]
struct Slot {
    node: Node,
    revision: u64,
    modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<String, Slot>,
    revision: u64,
    failing: HashSet<String>,
}

impl Tree {
    fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn put(&mut self, path: &RemotePath, node: Node) {
        if let Some(parent) = path.parent() {
            self.ensure_container(&parent);
        }
        let revision = self.bump();
        self.nodes.insert(
            path.as_str().to_string(),
            Slot {
                node,
                revision,
                modified: Utc::now(),
            },
        );
    }

    fn ensure_container(&mut self, path: &RemotePath) {
        if path.is_root() {
            return;
        }
        if let Some(Slot {
            node: Node::Container,
            ..
        }) = self.nodes.get(path.as_str())
        {
            return;
        }
        self.remove_subtree(path);
        self.put(path, Node::Container);
    }

    fn remove_subtree(&mut self, path: &RemotePath) -> bool {
        let prefix = format!("{}/", path.as_str());
        let before = self.nodes.len();
        self.nodes
            .retain(|k, _| k != path.as_str() && !(path.is_root() || k.starts_with(&prefix)));
        self.nodes.len() != before
    }

    fn check(&self, path: &RemotePath) -> BackendResult<()> {
        if self.failing.contains(path.as_str()) {
            Err(BackendError::Other(format!("injected failure at {}", path)))
        } else {
            Ok(())
        }
    }

    fn entry(path: &RemotePath, slot: &Slot) -> RemoteEntry {
        let (kind, size) = match &slot.node {
            Node::File { content } => (EntryKind::File, content.len() as u64),
            Node::Container => (EntryKind::Container, 0),
        };
        RemoteEntry {
            name: path.name().unwrap_or_default().to_string(),
            kind,
            size,
            last_modified: Some(slot.modified),
        }
    }
}

/// Remote target held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tree: Mutex<Tree>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create or replace a file, creating parent containers
    pub fn insert_file(&self, path: &str, content: impl Into<Vec<u8>>) {
        let path = RemotePath::new(path);
        let mut tree = self.lock();
        tree.remove_subtree(&path);
        tree.put(
            &path,
            Node::File {
                content: content.into(),
            },
        );
    }

    /// Create a container and any missing parents
    pub fn insert_dir(&self, path: &str) {
        self.lock().ensure_container(&RemotePath::new(path));
    }

    /// Remove a resource and everything below it
    pub fn remove(&self, path: &str) -> bool {
        self.lock().remove_subtree(&RemotePath::new(path))
    }

    /// Content of a file, `None` for containers and missing paths
    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        match self.lock().nodes.get(RemotePath::new(path).as_str()) {
            Some(Slot {
                node: Node::File { content },
                ..
            }) => Some(content.clone()),
            _ => None,
        }
    }

    pub fn is_container(&self, path: &str) -> bool {
        let path = RemotePath::new(path);
        path.is_root()
            || matches!(
                self.lock().nodes.get(path.as_str()),
                Some(Slot {
                    node: Node::Container,
                    ..
                })
            )
    }

    /// Every stored path, sorted
    pub fn paths(&self) -> Vec<String> {
        self.lock().nodes.keys().cloned().collect()
    }

    /// Make every operation except `stat` fail at `path`
    pub fn fail_on(&self, path: &str) {
        self.lock()
            .failing
            .insert(RemotePath::new(path).as_str().to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }
}

impl RemoteBackend for MemoryBackend {
    fn kind(&self) -> &str {
        "memory"
    }

    fn stat(&self, path: &RemotePath) -> BackendResult<Option<RemoteEntry>> {
        if path.is_root() {
            return Ok(Some(RemoteEntry {
                name: String::new(),
                kind: EntryKind::Container,
                size: 0,
                last_modified: None,
            }));
        }
        let tree = self.lock();
        Ok(tree.nodes.get(path.as_str()).map(|s| Tree::entry(path, s)))
    }

    fn children(&self, path: &RemotePath) -> BackendResult<Vec<RemoteEntry>> {
        let tree = self.lock();
        tree.check(path)?;
        let entries = tree
            .nodes
            .iter()
            .filter_map(|(key, slot)| {
                let child = RemotePath::new(key);
                (child.parent().as_ref() == Some(path)).then(|| Tree::entry(&child, slot))
            })
            .collect();
        Ok(entries)
    }

    fn mkdirs(&self, path: &RemotePath) -> BackendResult<()> {
        let mut tree = self.lock();
        tree.check(path)?;
        tree.ensure_container(path);
        Ok(())
    }

    fn open(&self, path: &RemotePath) -> BackendResult<Box<dyn Read + Send>> {
        let tree = self.lock();
        tree.check(path)?;
        match tree.nodes.get(path.as_str()) {
            Some(Slot {
                node: Node::File { content },
                ..
            }) => Ok(Box::new(Cursor::new(content.clone()))),
            Some(_) => Err(BackendError::Other(format!("{} is a container", path))),
            None => Err(BackendError::NotFound(path.to_string())),
        }
    }

    fn write(&self, path: &RemotePath, content: &mut dyn Read) -> BackendResult<()> {
        self.lock().check(path)?;
        let mut buf = Vec::new();
        content
            .read_to_end(&mut buf)
            .map_err(|e| BackendError::io("write", e))?;

        let mut tree = self.lock();
        tree.remove_subtree(path);
        tree.put(path, Node::File { content: buf });
        Ok(())
    }

    fn delete(&self, path: &RemotePath) -> BackendResult<()> {
        let mut tree = self.lock();
        tree.check(path)?;
        if tree.remove_subtree(path) {
            Ok(())
        } else {
            Err(BackendError::NotFound(path.to_string()))
        }
    }

    fn released_identifier(&self, path: &RemotePath) -> BackendResult<String> {
        let tree = self.lock();
        tree.check(path)?;
        if path.is_root() {
            return Ok("rev-0".to_string());
        }
        tree.nodes
            .get(path.as_str())
            .map(|s| format!("rev-{}", s.revision))
            .ok_or_else(|| BackendError::NotFound(path.to_string()))
    }
}
