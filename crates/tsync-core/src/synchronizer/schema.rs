//! SQLite schema for the synchronizer store

use rusqlite::{Connection, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Registered record families
        CREATE TABLE IF NOT EXISTS partners (
            qualifier TEXT NOT NULL,
            local_name TEXT NOT NULL,
            PRIMARY KEY (qualifier, local_name)
        );

        -- One record per (family, local resource)
        CREATE TABLE IF NOT EXISTS sync_info (
            qualifier TEXT NOT NULL,
            local_name TEXT NOT NULL,
            resource TEXT NOT NULL,
            value BLOB NOT NULL,
            PRIMARY KEY (qualifier, local_name, resource),
            FOREIGN KEY (qualifier, local_name)
                REFERENCES partners(qualifier, local_name) ON DELETE CASCADE
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version) => Ok(version.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection) -> bool {
    let table_exists = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if !table_exists {
        return true;
    }

    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}
