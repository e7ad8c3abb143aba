//! SQLite resource store with a keyed learn-path lock.
//!
//! SQLite has no row-level write locks, so per-resource serialization comes
//! from a map of async mutexes keyed by resource name, acquired before the
//! write transaction. Inference inside the mutate callback runs under the
//! name lock but outside the connection lock, so learners on different
//! resources only contend for the short write at the end.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::errors::{StoreError, StoreResult};
use crate::{LearnOutcome, MutateFn, Resource, ResourceStore, ResourceVersion, ReferencePayload};

pub struct SqliteResourceStore {
    conn: Mutex<Connection>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SqliteResourceStore {
    /// Create or open a store at a file path.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err)?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn init(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS resources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                schema TEXT NOT NULL,
                version INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS reference_payloads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                resource_id INTEGER NOT NULL
                    REFERENCES resources(id) ON DELETE CASCADE,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS resource_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                resource_id INTEGER NOT NULL
                    REFERENCES resources(id) ON DELETE CASCADE,
                version INTEGER NOT NULL,
                old_schema TEXT NOT NULL,
                new_schema TEXT NOT NULL,
                reference_payload_id INTEGER
                    REFERENCES reference_payloads(id) ON DELETE SET NULL,
                created_at TEXT NOT NULL,
                UNIQUE(resource_id, version)
            );
            CREATE INDEX IF NOT EXISTS idx_versions_resource
                ON resource_versions(resource_id, version);
            "#,
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// The serialization point for a resource name.
    fn lock_for(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(name.to_owned()).or_default().clone()
    }

    fn read_resource(&self, name: &str) -> StoreResult<Option<Resource>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, schema, version, created_at, updated_at
             FROM resources WHERE name = ?1",
            params![name],
            resource_from_row,
        )
        .optional()
        .map_err(db_err)
    }
}

#[async_trait]
impl ResourceStore for SqliteResourceStore {
    async fn get_resource(&self, name: &str) -> StoreResult<Option<Resource>> {
        self.read_resource(name)
    }

    async fn get_all_resources(&self) -> StoreResult<Vec<Resource>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, name, schema, version, created_at, updated_at
                 FROM resources ORDER BY name",
            )
            .map_err(db_err)?;
        let rows = stmt.query_map([], resource_from_row).map_err(db_err)?;

        let mut resources = Vec::new();
        for row in rows {
            resources.push(row.map_err(db_err)?);
        }
        Ok(resources)
    }

    async fn get_resource_version(&self, id: i64) -> StoreResult<Option<ResourceVersion>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, resource_id, version, old_schema, new_schema,
                    reference_payload_id, created_at
             FROM resource_versions WHERE id = ?1",
            params![id],
            version_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    async fn get_resource_versions(&self, resource_id: i64) -> StoreResult<Vec<ResourceVersion>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, resource_id, version, old_schema, new_schema,
                        reference_payload_id, created_at
                 FROM resource_versions WHERE resource_id = ?1
                 ORDER BY version ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![resource_id], version_from_row)
            .map_err(db_err)?;

        let mut versions = Vec::new();
        for row in rows {
            versions.push(row.map_err(db_err)?);
        }
        Ok(versions)
    }

    async fn get_reference_payload(&self, id: i64) -> StoreResult<Option<ReferencePayload>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, resource_id, payload, created_at
             FROM reference_payloads WHERE id = ?1",
            params![id],
            |row| {
                Ok(ReferencePayload {
                    id: row.get(0)?,
                    resource_id: row.get(1)?,
                    payload: row.get(2)?,
                    created_at: parse_ts(row.get(3)?),
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    async fn update_resource(&self, name: &str, mutate: MutateFn<'_>) -> StoreResult<LearnOutcome> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let current = self
            .read_resource(name)?
            .unwrap_or_else(|| Resource::skeleton(name));

        let revision = mutate(&current).map_err(StoreError::Other)?;
        let Some(revision) = revision else {
            return Ok(LearnOutcome {
                resource: current,
                version: None,
            });
        };

        let now = Utc::now();
        let next_version = current.version + 1;
        let old_schema = current.schema.clone();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let resource_id = if current.is_new() {
            tx.execute(
                "INSERT INTO resources (name, schema, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    name,
                    revision.schema,
                    next_version,
                    now.to_rfc3339(),
                    now.to_rfc3339()
                ],
            )
            .map_err(db_err)?;
            tx.last_insert_rowid()
        } else {
            tx.execute(
                "UPDATE resources SET schema = ?1, version = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![revision.schema, next_version, now.to_rfc3339(), current.id],
            )
            .map_err(db_err)?;
            current.id
        };

        let reference_payload_id = match &revision.reference_payload {
            Some(payload) => {
                tx.execute(
                    "INSERT INTO reference_payloads (resource_id, payload, created_at)
                     VALUES (?1, ?2, ?3)",
                    params![resource_id, payload, now.to_rfc3339()],
                )
                .map_err(db_err)?;
                Some(tx.last_insert_rowid())
            }
            None => None,
        };

        tx.execute(
            "INSERT INTO resource_versions
                 (resource_id, version, old_schema, new_schema,
                  reference_payload_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                resource_id,
                next_version,
                old_schema,
                revision.schema,
                reference_payload_id,
                now.to_rfc3339()
            ],
        )
        .map_err(db_err)?;
        let version_id = tx.last_insert_rowid();

        tx.commit().map_err(db_err)?;
        debug!(resource = name, version = next_version, "revision committed");

        Ok(LearnOutcome {
            resource: Resource {
                id: resource_id,
                name: name.to_owned(),
                schema: revision.schema.clone(),
                version: next_version,
                created_at: if current.is_new() {
                    now
                } else {
                    current.created_at
                },
                updated_at: now,
            },
            version: Some(ResourceVersion {
                id: version_id,
                resource_id,
                version: next_version,
                old_schema,
                new_schema: revision.schema,
                reference_payload_id,
                created_at: now,
            }),
        })
    }
}

fn db_err(err: rusqlite::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

fn parse_ts(text: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn resource_from_row(row: &Row<'_>) -> rusqlite::Result<Resource> {
    Ok(Resource {
        id: row.get(0)?,
        name: row.get(1)?,
        schema: row.get(2)?,
        version: row.get(3)?,
        created_at: parse_ts(row.get(4)?),
        updated_at: parse_ts(row.get(5)?),
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<ResourceVersion> {
    Ok(ResourceVersion {
        id: row.get(0)?,
        resource_id: row.get(1)?,
        version: row.get(2)?,
        old_schema: row.get(3)?,
        new_schema: row.get(4)?,
        reference_payload_id: row.get(5)?,
        created_at: parse_ts(row.get(6)?),
    })
}
