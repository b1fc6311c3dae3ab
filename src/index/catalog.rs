//! Catalog - SQLite-backed registry of collections and indexes
//!
//! Records which collections and index declarations exist so that a store
//! reopens with the same layout, and so that repeated initialisation is a
//! no-op. `INSERT OR IGNORE` against the primary keys makes every ensure
//! call idempotent.

use crate::index::IndexSpec;
use crate::storage::{StorageError, StorageResult};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;

/// Persistent collection/index registry
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    /// Create or open the catalog at `path`
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            ",
        )?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS indexes (
                collection TEXT NOT NULL,
                field TEXT NOT NULL,
                is_unique INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (collection, field)
            );
            ",
        )?;

        Ok(Self { conn })
    }

    /// Record a collection. Returns `true` if it was not known before.
    pub fn ensure_collection(&mut self, name: &str) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO collections (name, created_at) VALUES (?, ?)",
            params![name, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(inserted == 1)
    }

    /// Record an index. Returns `true` if it was not known before.
    ///
    /// Redeclaring an index with different uniqueness is an error.
    pub fn ensure_index(&mut self, spec: &IndexSpec) -> StorageResult<bool> {
        if let Some(unique) = self.index_uniqueness(&spec.collection, &spec.field)? {
            if unique != spec.unique {
                return Err(StorageError::Catalog(format!(
                    "index {}.{} already declared with unique={}",
                    spec.collection, spec.field, unique
                )));
            }
            return Ok(false);
        }

        self.conn.execute(
            "INSERT INTO indexes (collection, field, is_unique, created_at) VALUES (?, ?, ?, ?)",
            params![
                spec.collection,
                spec.field,
                spec.unique,
                chrono::Utc::now().timestamp_millis()
            ],
        )?;
        Ok(true)
    }

    fn index_uniqueness(&self, collection: &str, field: &str) -> StorageResult<Option<bool>> {
        let unique = self
            .conn
            .query_row(
                "SELECT is_unique FROM indexes WHERE collection = ? AND field = ?",
                params![collection, field],
                |row| row.get::<_, bool>(0),
            )
            .optional()?;
        Ok(unique)
    }

    /// All known collections, by name
    pub fn collections(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT name FROM collections ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let names = rows.collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Index declarations of a collection, in creation order
    pub fn indexes(&self, collection: &str) -> StorageResult<Vec<IndexSpec>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT collection, field, is_unique FROM indexes
             WHERE collection = ?
             ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![collection], |row| {
            Ok(IndexSpec {
                collection: row.get(0)?,
                field: row.get(1)?,
                unique: row.get(2)?,
            })
        })?;
        let specs = rows.collect::<Result<Vec<IndexSpec>, _>>()?;
        Ok(specs)
    }

    /// Force checkpoint for WAL mode
    pub fn checkpoint(&mut self) -> StorageResult<()> {
        self.conn
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_catalog_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        let mut catalog = Catalog::open(&path).unwrap();

        assert!(catalog.ensure_collection("voyages").unwrap());
        assert!(!catalog.ensure_collection("voyages").unwrap());

        let spec = IndexSpec::unique("voyages", "voyage_id");
        assert!(catalog.ensure_index(&spec).unwrap());
        assert!(!catalog.ensure_index(&spec).unwrap());

        assert_eq!(catalog.collections().unwrap(), vec!["voyages".to_string()]);
        assert_eq!(catalog.indexes("voyages").unwrap(), vec![spec]);
    }

    #[test]
    fn test_conflicting_uniqueness() {
        let dir = tempdir().unwrap();
        let mut catalog = Catalog::open(&dir.path().join("catalog.db")).unwrap();

        catalog
            .ensure_index(&IndexSpec::new("voyages", "ship_id"))
            .unwrap();
        let result = catalog.ensure_index(&IndexSpec::unique("voyages", "ship_id"));
        assert!(matches!(result, Err(StorageError::Catalog(_))));
    }

    #[test]
    fn test_catalog_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.db");

        {
            let mut catalog = Catalog::open(&path).unwrap();
            catalog.ensure_collection("checkpoints").unwrap();
            catalog
                .ensure_index(&IndexSpec::new("checkpoints", "voyage_id"))
                .unwrap();
            catalog
                .ensure_index(&IndexSpec::new("checkpoints", "timestamp"))
                .unwrap();
            catalog.checkpoint().unwrap();
        }

        let catalog = Catalog::open(&path).unwrap();
        let fields: Vec<String> = catalog
            .indexes("checkpoints")
            .unwrap()
            .into_iter()
            .map(|s| s.field)
            .collect();
        assert_eq!(fields, vec!["voyage_id", "timestamp"]);
    }
}
