//! # Statedb
//!
//! SQLite persistence for declarative resource state.
//!
//! Every recorded attribute is one row keyed by `(resource, name)` with the
//! value stored as JSON text. A batch of writes passed to
//! [`StateStore::commit`] runs inside one SQL transaction, so either all of
//! it lands or none of it does, and the database survives process
//! restarts.
//!
//! ## Example
//!
//! ```no_run
//! use declarative::{StateDict, Lifecycle};
//! use statedb::SqliteStore;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteStore::open(Path::new("/tmp/deployments.db"))?);
//! let subnet = StateDict::new(store, "web-subnet");
//!
//! let mut tx = subnet.transaction();
//! tx.set("zone", serde_json::json!("us-east-1a"));
//! tx.set_lifecycle(Lifecycle::Up)?;
//! tx.commit()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod error;

pub use error::{Error, Result};

use declarative::{Config, StateStore, WriteOp};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA_VERSION: i64 = 1;

/// A state store backed by a SQLite database
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a state database at the given path
    ///
    /// Creates the database file and necessary tables if they don't exist.
    pub fn open(db_path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(Error::SchemaVersion {
                path: db_path.to_path_buf(),
                found: version,
            });
        }

        log::debug!("Opened state database {}", db_path.display());
        Self::init(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS resource_attrs (
                resource TEXT NOT NULL,
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (resource, name)
            );

            PRAGMA user_version = 1;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read_value(&self, resource: &str, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT value FROM resource_attrs WHERE resource = ?1 AND name = ?2",
                params![resource, key],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|text| decode(resource, key, &text)).transpose()
    }

    fn read_all_values(&self, resource: &str) -> Result<Config> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT name, value FROM resource_attrs WHERE resource = ?1")?;
        let rows = stmt.query_map([resource], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut config = Config::new();
        for row in rows {
            let (key, text) = row?;
            let value = decode(resource, &key, &text)?;
            config.insert(key, value);
        }
        Ok(config)
    }

    fn commit_ops(&self, resource: &str, ops: &[WriteOp]) -> Result<()> {
        let mut conn = self.conn();
        // Rolled back on drop if any statement fails
        let tx = conn.transaction()?;

        for op in ops {
            match op {
                WriteOp::Set { key, value } => {
                    tx.execute(
                        "INSERT INTO resource_attrs (resource, name, value) VALUES (?1, ?2, ?3)
                         ON CONFLICT(resource, name) DO UPDATE SET value = excluded.value",
                        params![resource, key, value.to_string()],
                    )?;
                }
                WriteOp::Remove { key } => {
                    tx.execute(
                        "DELETE FROM resource_attrs WHERE resource = ?1 AND name = ?2",
                        params![resource, key],
                    )?;
                }
                WriteOp::Clear => {
                    tx.execute(
                        "DELETE FROM resource_attrs WHERE resource = ?1",
                        [resource],
                    )?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn resource_names(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT DISTINCT resource FROM resource_attrs ORDER BY resource")?;
        let names = stmt.query_map([], |row| row.get(0))?;

        let mut result = Vec::new();
        for name in names {
            result.push(name?);
        }
        Ok(result)
    }
}

impl StateStore for SqliteStore {
    fn read(&self, resource: &str, key: &str) -> declarative::Result<Option<Value>> {
        Ok(self.read_value(resource, key)?)
    }

    fn read_all(&self, resource: &str) -> declarative::Result<Config> {
        Ok(self.read_all_values(resource)?)
    }

    fn commit(&self, resource: &str, ops: &[WriteOp]) -> declarative::Result<()> {
        Ok(self.commit_ops(resource, ops)?)
    }

    fn resources(&self) -> declarative::Result<Vec<String>> {
        Ok(self.resource_names()?)
    }
}

fn decode(resource: &str, key: &str, text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|source| Error::CorruptValue {
        resource: resource.to_string(),
        key: key.to_string(),
        source,
    })
}

// ============================================================================
// Tests
// ============================================================================
