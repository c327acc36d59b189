//! SQLite-backed synchronizer
//!
//! Records live in a single `sync_info` table keyed by
//! `(qualifier, local_name, resource)`. Registered keys are kept in
//! `partners`; unregistering is not needed by the engine.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::schema::{init_schema, needs_init};
use super::{unregistered, QualifiedKey, Synchronizer};
use crate::backend::BackendError;
use crate::depth::Depth;
use crate::error::{TargetError, TargetResult};

/// Synchronizer persisted in a SQLite database
pub struct SqliteSynchronizer {
    conn: Mutex<Connection>,
}

fn store_error(resource: &Path, err: rusqlite::Error) -> TargetError {
    TargetError::io(
        resource,
        BackendError::Other(format!("synchronizer store: {}", err)),
    )
}

fn resource_key(resource: &Path) -> String {
    resource.to_string_lossy().into_owned()
}

impl SqliteSynchronizer {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {:?}", path))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        if needs_init(&conn) {
            init_schema(&conn).context("Failed to initialize synchronizer schema")?;
        }

        debug!(path = %path.display(), "opened synchronizer store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_registered(
        conn: &Connection,
        key: &QualifiedKey,
        resource: &Path,
    ) -> TargetResult<()> {
        let registered = conn
            .prepare_cached("SELECT 1 FROM partners WHERE qualifier = ?1 AND local_name = ?2")
            .and_then(|mut stmt| stmt.exists(params![key.qualifier, key.local_name]))
            .map_err(|e| store_error(resource, e))?;
        if registered {
            Ok(())
        } else {
            Err(unregistered(key))
        }
    }
}

impl Synchronizer for SqliteSynchronizer {
    fn add(&self, key: &QualifiedKey) -> TargetResult<()> {
        self.lock()
            .execute(
                "INSERT OR IGNORE INTO partners (qualifier, local_name) VALUES (?1, ?2)",
                params![key.qualifier, key.local_name],
            )
            .map_err(|e| store_error(Path::new(""), e))?;
        Ok(())
    }

    fn get(&self, key: &QualifiedKey, resource: &Path) -> TargetResult<Option<Vec<u8>>> {
        let conn = self.lock();
        Self::ensure_registered(&conn, key, resource)?;
        conn.query_row(
            "SELECT value FROM sync_info
             WHERE qualifier = ?1 AND local_name = ?2 AND resource = ?3",
            params![key.qualifier, key.local_name, resource_key(resource)],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| store_error(resource, e))
    }

    fn set(&self, key: &QualifiedKey, resource: &Path, value: Option<&[u8]>) -> TargetResult<()> {
        let conn = self.lock();
        Self::ensure_registered(&conn, key, resource)?;
        let result = match value {
            Some(bytes) => conn.execute(
                "INSERT OR REPLACE INTO sync_info (qualifier, local_name, resource, value)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key.qualifier, key.local_name, resource_key(resource), bytes],
            ),
            None => conn.execute(
                "DELETE FROM sync_info
                 WHERE qualifier = ?1 AND local_name = ?2 AND resource = ?3",
                params![key.qualifier, key.local_name, resource_key(resource)],
            ),
        };
        result.map_err(|e| store_error(resource, e))?;
        Ok(())
    }

    fn flush(&self, key: &QualifiedKey, resource: &Path, depth: Depth) -> TargetResult<()> {
        let conn = self.lock();
        Self::ensure_registered(&conn, key, resource)?;

        let exact = resource_key(resource);
        let prefix = format!("{}/", exact.trim_end_matches('/'));
        let members = match depth {
            Depth::Zero => "",
            // Direct members have no separator after the prefix
            Depth::One => {
                "OR (substr(resource, 1, length(?4)) = ?4
                     AND instr(substr(resource, length(?4) + 1), '/') = 0)"
            }
            Depth::Infinite => "OR substr(resource, 1, length(?4)) = ?4",
        };
        let sql = format!(
            "DELETE FROM sync_info
             WHERE qualifier = ?1 AND local_name = ?2 AND (resource = ?3 {})",
            members
        );

        let result = match depth {
            Depth::Zero => conn.execute(&sql, params![key.qualifier, key.local_name, exact]),
            _ => conn.execute(&sql, params![key.qualifier, key.local_name, exact, prefix]),
        };
        let removed = result.map_err(|e| store_error(resource, e))?;

        debug!(key = %key, resource = %resource.display(), %depth, removed, "flushed records");
        Ok(())
    }

    fn members(&self, key: &QualifiedKey, resource: &Path) -> TargetResult<Vec<PathBuf>> {
        let conn = self.lock();
        Self::ensure_registered(&conn, key, resource)?;

        let prefix = format!("{}/", resource_key(resource).trim_end_matches('/'));
        let mut stmt = conn
            .prepare_cached(
                "SELECT resource FROM sync_info
                 WHERE qualifier = ?1 AND local_name = ?2
                   AND substr(resource, 1, length(?3)) = ?3
                   AND length(resource) > length(?3)
                   AND instr(substr(resource, length(?3) + 1), '/') = 0
                 ORDER BY resource",
            )
            .map_err(|e| store_error(resource, e))?;
        let rows = stmt
            .query_map(params![key.qualifier, key.local_name, prefix], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| store_error(resource, e))?;

        rows.map(|row| row.map(PathBuf::from).map_err(|e| store_error(resource, e)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    fn key() -> QualifiedKey {
        QualifiedKey::new("tsync.state", "file:/w")
    }

    fn setup() -> SqliteSynchronizer {
        let sync = SqliteSynchronizer::open_in_memory().unwrap();
        sync.add(&key()).unwrap();
        sync
    }

    fn count(sync: &SqliteSynchronizer) -> i64 {
        sync.lock()
            .query_row("SELECT COUNT(*) FROM sync_info", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_unregistered_key_fails() {
        let sync = SqliteSynchronizer::open_in_memory().unwrap();
        let err = sync
            .set(&key(), Path::new("/w/a"), Some(b"x"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn test_set_get_remove() {
        let sync = setup();
        let path = Path::new("/w/a b.txt");

        assert_eq!(sync.get(&key(), path).unwrap(), None);
        sync.set(&key(), path, Some(&[1, 2, 3])).unwrap();
        sync.set(&key(), path, Some(&[4, 5])).unwrap();
        assert_eq!(sync.get(&key(), path).unwrap(), Some(vec![4, 5]));

        sync.set(&key(), path, None).unwrap();
        assert_eq!(sync.get(&key(), path).unwrap(), None);
    }

    #[test]
    fn test_flush_depths() {
        let sync = setup();
        for p in [
            "/w/d",
            "/w/d/a",
            "/w/d/sub",
            "/w/d/sub/b",
            "/w/d_sibling",
            "/w/other",
        ] {
            sync.set(&key(), Path::new(p), Some(b"x")).unwrap();
        }

        sync.flush(&key(), Path::new("/w/other"), Depth::Zero)
            .unwrap();
        assert_eq!(count(&sync), 5);

        sync.flush(&key(), Path::new("/w/d"), Depth::One).unwrap();
        assert_eq!(count(&sync), 2);
        assert!(sync.get(&key(), Path::new("/w/d/sub/b")).unwrap().is_some());

        sync.flush(&key(), Path::new("/w/d"), Depth::Infinite)
            .unwrap();
        assert_eq!(count(&sync), 1);
        assert!(sync
            .get(&key(), Path::new("/w/d_sibling"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_members() {
        let sync = setup();
        for p in ["/w/d", "/w/d/b", "/w/d/a", "/w/d/a/deep", "/w/dx"] {
            sync.set(&key(), Path::new(p), Some(b"x")).unwrap();
        }

        let members = sync.members(&key(), Path::new("/w/d")).unwrap();
        assert_eq!(members, vec![PathBuf::from("/w/d/a"), PathBuf::from("/w/d/b")]);
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("state").join("sync.db");

        {
            let sync = SqliteSynchronizer::open(&db).unwrap();
            sync.add(&key()).unwrap();
            sync.set(&key(), Path::new("/w/a"), Some(b"kept")).unwrap();
        }

        let sync = SqliteSynchronizer::open(&db).unwrap();
        assert_eq!(
            sync.get(&key(), Path::new("/w/a")).unwrap(),
            Some(b"kept".to_vec())
        );
    }
}
