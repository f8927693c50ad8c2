/**
 * MAPPING STORE - Lien persistant hôte -> ticket
 *
 * RÔLE :
 * Seul état conservé entre deux passes : quel ticket est ouvert pour quel
 * hôte. Le reste (paquets déjà notifiés, statut) est relu dans le tracker.
 *
 * FONCTIONNEMENT :
 * - SQLite, une table `host_issue_link (hostname, issue_id)`
 * - chaque mutation est commitée immédiatement (pas de batch)
 * - `add` vérifie et insère dans la même transaction IMMEDIATE : un hôte
 *   déjà lié donne `StoreError::DuplicateMapping`, la table reste intacte
 * - `delete` est idempotent
 */

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use tracing::debug;

use crate::models::IssueId;

const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("host '{host}' is already linked to issue {existing} (refused issue {requested})")]
    DuplicateMapping {
        host: String,
        existing: IssueId,
        requested: IssueId,
    },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct MappingStore {
    conn: Mutex<Connection>,
}

impl MappingStore {
    /// Ouvre (ou crée) la base à l'emplacement donné
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        initialize_schema(&conn)?;
        debug!(path = %path.display(), "mapping store opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Base éphémère, pour les tests et le devkit
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn add(&self, host: &str, issue_id: IssueId) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = lookup(&tx, host)? {
            // tx abandonnée au drop => rollback
            return Err(StoreError::DuplicateMapping {
                host: host.to_string(),
                existing,
                requested: issue_id,
            });
        }
        tx.execute(
            "INSERT INTO host_issue_link (hostname, issue_id) VALUES (?1, ?2)",
            params![host, issue_id],
        )?;
        tx.commit()?;
        debug!(host, issue_id, "mapping added");
        Ok(())
    }

    pub fn get(&self, host: &str) -> Result<Option<IssueId>, StoreError> {
        let conn = self.conn.lock();
        Ok(lookup(&conn, host)?)
    }

    /// Supprime tous les liens vers ce ticket ; renvoie le nombre de lignes retirées
    pub fn delete(&self, issue_id: IssueId) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM host_issue_link WHERE issue_id = ?1",
            params![issue_id],
        )?;
        debug!(issue_id, removed, "mapping deleted");
        Ok(removed)
    }

    pub fn list(&self) -> Result<Vec<(String, IssueId)>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT hostname, issue_id FROM host_issue_link ORDER BY rowid")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn lookup(conn: &Connection, host: &str) -> rusqlite::Result<Option<IssueId>> {
    conn.query_row(
        "SELECT issue_id FROM host_issue_link WHERE hostname = ?1 ORDER BY rowid LIMIT 1",
        params![host],
        |row| row.get(0),
    )
    .optional()
}

fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = FULL;",
    )?;

    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS host_issue_link (
                hostname TEXT NOT NULL,
                issue_id INTEGER NOT NULL
            );",
        )?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_get() {
        let store = MappingStore::in_memory().unwrap();
        assert_eq!(store.get("db1").unwrap(), None);
        store.add("db1", 42).unwrap();
        assert_eq!(store.get("db1").unwrap(), Some(42));
        assert_eq!(store.get("db2").unwrap(), None);
    }

    #[test]
    fn test_add_twice_is_refused() {
        let store = MappingStore::in_memory().unwrap();
        store.add("db1", 42).unwrap();

        let err = store.add("db1", 43).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DuplicateMapping { ref host, existing: 42, requested: 43 } if host == "db1"
        ));
        assert_eq!(store.list().unwrap(), vec![("db1".to_string(), 42)]);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = MappingStore::in_memory().unwrap();
        store.add("db1", 42).unwrap();
        store.add("web1", 7).unwrap();

        assert_eq!(store.delete(42).unwrap(), 1);
        assert_eq!(store.delete(42).unwrap(), 0);
        assert_eq!(store.delete(1000).unwrap(), 0);
        assert_eq!(store.get("db1").unwrap(), None);
        assert_eq!(store.get("web1").unwrap(), Some(7));
    }

    #[test]
    fn test_reassign_after_delete() {
        let store = MappingStore::in_memory().unwrap();
        store.add("db1", 42).unwrap();
        store.delete(42).unwrap();
        store.add("db1", 43).unwrap();
        assert_eq!(store.get("db1").unwrap(), Some(43));
    }

    #[test]
    fn test_mappings_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("links.sqlite");

        {
            let store = MappingStore::open(&path).unwrap();
            store.add("db1", 42).unwrap();
            store.add("web1", 7).unwrap();
            store.delete(7).unwrap();
        }

        let store = MappingStore::open(&path).unwrap();
        assert_eq!(store.list().unwrap(), vec![("db1".to_string(), 42)]);
        assert!(matches!(
            store.add("db1", 99),
            Err(StoreError::DuplicateMapping { existing: 42, .. })
        ));
    }
}
