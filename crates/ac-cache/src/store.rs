//! Principal Document Store
//!
//! The cache loads principals through [`PrincipalStore`]. How documents are
//! persisted and how legacy privileges are resolved is up to the store.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::types::{CredentialData, Privilege, PrincipalName, RoleName, SchemaVersion};
use crate::Result;

/// Raw principal document as handed over by a store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalDocument {
    pub name: PrincipalName,

    #[serde(default)]
    pub credentials: CredentialData,

    #[serde(default)]
    pub roles: Vec<RoleName>,

    /// Explicit privileges (fully resolved for v2 documents)
    #[serde(default)]
    pub privileges: Vec<Privilege>,

    #[serde(default)]
    pub schema_version: SchemaVersion,

    /// Privileges implied per database by legacy (v1) documents
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub legacy_privileges: HashMap<String, Vec<Privilege>>,
}

impl PrincipalDocument {
    pub fn new(name: PrincipalName) -> Self {
        Self {
            name,
            credentials: CredentialData::default(),
            roles: Vec::new(),
            privileges: Vec::new(),
            schema_version: SchemaVersion::V2,
            legacy_privileges: HashMap::new(),
        }
    }

    pub fn with_credentials(mut self, credentials: CredentialData) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_role(mut self, role: RoleName) -> Self {
        self.roles.push(role);
        self
    }

    pub fn with_privilege(mut self, privilege: Privilege) -> Self {
        self.privileges.push(privilege);
        self
    }

    /// Mark as a legacy document
    pub fn legacy(mut self) -> Self {
        self.schema_version = SchemaVersion::V1;
        self
    }

    pub fn with_legacy_privilege(
        mut self,
        database: impl Into<String>,
        privilege: Privilege,
    ) -> Self {
        self.legacy_privileges
            .entry(database.into())
            .or_default()
            .push(privilege);
        self
    }
}

/// Source of principal documents
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    /// Fetch the document for `name`, or `None` if the principal does not exist
    async fn find_principal(&self, name: &PrincipalName) -> Result<Option<PrincipalDocument>>;

    /// Privileges a legacy principal implicitly holds on `database`
    async fn legacy_privileges(
        &self,
        name: &PrincipalName,
        database: &str,
    ) -> Result<Vec<Privilege>>;
}

/// Store backed by an in-process map
#[derive(Default)]
pub struct InMemoryPrincipalStore {
    documents: RwLock<HashMap<PrincipalName, PrincipalDocument>>,
}

impl InMemoryPrincipalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_documents(documents: impl IntoIterator<Item = PrincipalDocument>) -> Self {
        let store = Self::new();
        for document in documents {
            store.upsert(document);
        }
        store
    }

    /// Seed from a JSON file holding an array of principal documents
    pub async fn load_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        let documents: Vec<PrincipalDocument> = serde_json::from_str(&content)?;
        info!(path = %path.display(), count = documents.len(), "Loaded principal documents");
        Ok(Self::from_documents(documents))
    }

    /// Insert or replace a document, returning the previous one
    pub fn upsert(&self, document: PrincipalDocument) -> Option<PrincipalDocument> {
        self.documents.write().insert(document.name.clone(), document)
    }

    pub fn remove(&self, name: &PrincipalName) -> Option<PrincipalDocument> {
        self.documents.write().remove(name)
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

#[async_trait]
impl PrincipalStore for InMemoryPrincipalStore {
    async fn find_principal(&self, name: &PrincipalName) -> Result<Option<PrincipalDocument>> {
        Ok(self.documents.read().get(name).cloned())
    }

    async fn legacy_privileges(
        &self,
        name: &PrincipalName,
        database: &str,
    ) -> Result<Vec<Privilege>> {
        let documents = self.documents.read();
        Ok(documents
            .get(name)
            .and_then(|document| document.legacy_privileges.get(database))
            .cloned()
            .unwrap_or_default())
    }
}
