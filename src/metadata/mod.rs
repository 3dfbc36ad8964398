//! Tenant metadata
//!
//! In-memory hierarchy of tenant, project, database branch and collection.
//! The worker resolves index build tasks through this hierarchy and persists
//! updated index lists via the owning tenant.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::queue::Tx;

/// Default branch name used when a task carries an empty branch
pub const MAIN_BRANCH: &str = "main";

/// Lifecycle state of a secondary index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexState {
    /// Index is being backfilled and not yet readable
    Building,
    /// Index is fully built and serving reads
    Active,
}

/// A secondary index over a single document field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryIndex {
    /// Index name
    pub name: String,
    /// Document field the index keys on
    pub field: String,
    /// Current lifecycle state
    pub state: IndexState,
}

impl SecondaryIndex {
    /// Create a new index in the building state
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            state: IndexState::Building,
        }
    }
}

/// A project database identified by project name and branch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabaseName {
    project: String,
    branch: String,
}

impl DatabaseName {
    /// Name a database branch; an empty branch means the main branch
    pub fn with_branch(project: impl Into<String>, branch: impl Into<String>) -> Self {
        let branch = branch.into();
        Self {
            project: project.into(),
            branch: if branch.is_empty() {
                MAIN_BRANCH.to_string()
            } else {
                branch
            },
        }
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.project, self.branch)
    }
}

/// A collection of documents plus its secondary indexes
pub struct Collection {
    name: String,
    documents: RwLock<Vec<serde_json::Value>>,
    secondary_indexes: RwLock<Vec<SecondaryIndex>>,
    /// Built index entries: index name -> field value -> document positions
    index_data: RwLock<HashMap<String, BTreeMap<String, Vec<usize>>>>,
}

impl Collection {
    /// Create a collection with the given secondary indexes
    pub fn new(name: impl Into<String>, indexes: Vec<SecondaryIndex>) -> Self {
        Self {
            name: name.into(),
            documents: RwLock::new(Vec::new()),
            secondary_indexes: RwLock::new(indexes),
            index_data: RwLock::new(HashMap::new()),
        }
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append documents to the collection
    pub async fn insert_documents(&self, docs: Vec<serde_json::Value>) {
        self.documents.write().await.extend(docs);
    }

    /// Snapshot of the collection's documents
    pub async fn documents(&self) -> Vec<serde_json::Value> {
        self.documents.read().await.clone()
    }

    /// Snapshot of the collection's secondary indexes
    pub async fn secondary_indexes(&self) -> Vec<SecondaryIndex> {
        self.secondary_indexes.read().await.clone()
    }

    pub(crate) async fn set_secondary_indexes(&self, indexes: Vec<SecondaryIndex>) {
        *self.secondary_indexes.write().await = indexes;
    }

    /// Merge built entries into the named index
    pub(crate) async fn write_index_entries(
        &self,
        index_name: &str,
        entries: Vec<(String, usize)>,
    ) {
        let mut data = self.index_data.write().await;
        let index = data.entry(index_name.to_string()).or_default();
        for (key, pos) in entries {
            index.entry(key).or_default().push(pos);
        }
    }

    /// Number of distinct keys built for the named index
    pub async fn index_key_count(&self, index_name: &str) -> usize {
        self.index_data
            .read()
            .await
            .get(index_name)
            .map(|index| index.len())
            .unwrap_or(0)
    }
}

/// A database branch holding collections
pub struct Database {
    name: DatabaseName,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl Database {
    fn new(name: DatabaseName) -> Self {
        Self {
            name,
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Database name with branch
    pub fn name(&self) -> &DatabaseName {
        &self.name
    }

    /// Create a collection in this database
    pub async fn create_collection(
        &self,
        name: impl Into<String>,
        indexes: Vec<SecondaryIndex>,
    ) -> Arc<Collection> {
        let name = name.into();
        let coll = Arc::new(Collection::new(name.clone(), indexes));
        self.collections.write().await.insert(name, coll.clone());
        coll
    }

    /// Look up a collection by name
    pub async fn get_collection(&self, name: &str) -> crate::Result<Arc<Collection>> {
        self.collections
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| crate::QueueWorkerError::CollectionNotFound(name.to_string()))
    }
}

/// A project holding database branches
pub struct Project {
    name: String,
    databases: RwLock<HashMap<DatabaseName, Arc<Database>>>,
}

impl Project {
    fn new(name: String) -> Self {
        Self {
            name,
            databases: RwLock::new(HashMap::new()),
        }
    }

    /// Project name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create a database branch in this project
    pub async fn create_database(&self, name: DatabaseName) -> Arc<Database> {
        let db = Arc::new(Database::new(name.clone()));
        self.databases.write().await.insert(name, db.clone());
        db
    }

    /// Look up a database branch
    pub async fn get_database(&self, name: &DatabaseName) -> crate::Result<Arc<Database>> {
        self.databases
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| crate::QueueWorkerError::DatabaseNotFound(name.to_string()))
    }
}

/// A tenant owning projects within one namespace
pub struct Tenant {
    namespace_id: u32,
    projects: RwLock<HashMap<String, Arc<Project>>>,
}

impl Tenant {
    fn new(namespace_id: u32) -> Self {
        Self {
            namespace_id,
            projects: RwLock::new(HashMap::new()),
        }
    }

    /// Namespace this tenant belongs to
    pub fn namespace_id(&self) -> u32 {
        self.namespace_id
    }

    /// Create a project owned by this tenant
    pub async fn create_project(&self, name: impl Into<String>) -> Arc<Project> {
        let name = name.into();
        let project = Arc::new(Project::new(name.clone()));
        self.projects.write().await.insert(name, project.clone());
        project
    }

    /// Look up a project by name
    pub async fn get_project(&self, name: &str) -> crate::Result<Arc<Project>> {
        self.projects
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| crate::QueueWorkerError::ProjectNotFound(name.to_string()))
    }

    /// Persist an updated secondary index list for a collection
    pub async fn update_collection_indexes(
        &self,
        _tx: &mut dyn Tx,
        db: &Database,
        coll_name: &str,
        indexes: Vec<SecondaryIndex>,
    ) -> crate::Result<()> {
        let coll = db.get_collection(coll_name).await?;
        coll.set_secondary_indexes(indexes).await;
        Ok(())
    }
}

/// Registry of tenants keyed by namespace id
pub struct TenantManager {
    tenants: RwLock<HashMap<u32, Arc<Tenant>>>,
}

impl TenantManager {
    /// Create an empty tenant registry
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
        }
    }

    /// Create a tenant for the given namespace
    pub async fn create_tenant(&self, namespace_id: u32) -> Arc<Tenant> {
        let tenant = Arc::new(Tenant::new(namespace_id));
        self.tenants
            .write()
            .await
            .insert(namespace_id, tenant.clone());
        tenant
    }

    /// Look up the tenant for a namespace
    pub async fn get_tenant(&self, namespace_id: u32) -> crate::Result<Arc<Tenant>> {
        self.tenants
            .read()
            .await
            .get(&namespace_id)
            .cloned()
            .ok_or(crate::QueueWorkerError::TenantNotFound(namespace_id))
    }
}

impl Default for TenantManager {
    fn default() -> Self {
        Self::new()
    }
}
