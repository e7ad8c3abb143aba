//! Versioned schema store.
//!
//! Owns the three persisted entities (resources, their version history, and
//! the reference payloads that triggered each version) and serializes the
//! learn path per resource so concurrent learners on one name see a total
//! order while distinct names proceed in parallel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod errors;
mod sqlite_store;

pub use errors::{StoreError, StoreResult};
pub use sqlite_store::SqliteResourceStore;

/// A named stream of JSON payloads with its current schema and version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: i64,
    pub name: String,
    /// Current schema as JSON text; empty until the first revision.
    pub schema: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    /// Unsaved placeholder handed to the learn path when no row exists yet.
    /// Callers treat `id == 0` as "new".
    pub fn skeleton(name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.to_owned(),
            schema: String::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_new(&self) -> bool {
        self.id == 0
    }
}

/// One step of a resource's schema history. Immutable once written; the first
/// version carries an empty `old_schema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceVersion {
    pub id: i64,
    pub resource_id: i64,
    pub version: i64,
    pub old_schema: String,
    pub new_schema: String,
    /// Null for versions created by explicit schema sets.
    pub reference_payload_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// The exact payload text that forced a schema change. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePayload {
    pub id: i64,
    pub resource_id: i64,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// A revision produced by the learn path or an explicit schema set.
#[derive(Debug, Clone)]
pub struct NewRevision {
    /// Schema text the resource holds after this revision.
    pub schema: String,
    /// Payload that forced the change; `None` for explicit sets.
    pub reference_payload: Option<String>,
}

/// Result of [`ResourceStore::update_resource`].
#[derive(Debug, Clone)]
pub struct LearnOutcome {
    /// The resource as stored after the call.
    pub resource: Resource,
    /// The version row written, when the mutation produced a revision.
    pub version: Option<ResourceVersion>,
}

impl LearnOutcome {
    pub fn changed(&self) -> bool {
        self.version.is_some()
    }
}

/// Read-modify-write callback for [`ResourceStore::update_resource`]. Receives
/// the current row (an `id == 0` skeleton when absent) and returns the
/// revision to persist, or `None` to leave the store untouched.
pub type MutateFn<'a> =
    Box<dyn FnOnce(&Resource) -> Result<Option<NewRevision>, anyhow::Error> + Send + 'a>;

/// Transactional persistence for resources, versions, and reference payloads.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_resource(&self, name: &str) -> StoreResult<Option<Resource>>;

    async fn get_all_resources(&self) -> StoreResult<Vec<Resource>>;

    async fn get_resource_version(&self, id: i64) -> StoreResult<Option<ResourceVersion>>;

    /// All versions of a resource, ordered by version ascending.
    async fn get_resource_versions(&self, resource_id: i64) -> StoreResult<Vec<ResourceVersion>>;

    async fn get_reference_payload(&self, id: i64) -> StoreResult<Option<ReferencePayload>>;

    /// Serialized read-modify-write on one resource row.
    ///
    /// Callers on the same name queue behind each other; different names run
    /// in parallel. When `mutate` returns a revision, the version bump,
    /// resource update, reference payload, and version row are committed as
    /// one atomic unit. An error from `mutate` aborts with nothing written.
    async fn update_resource(&self, name: &str, mutate: MutateFn<'_>) -> StoreResult<LearnOutcome>;
}
