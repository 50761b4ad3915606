use thiserror::Error;

use crate::types::{PrincipalName, SchemaVersion};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Principal not found: {name}")]
    PrincipalNotFound { name: PrincipalName },

    #[error("Unsupported schema version {version} for principal {name}")]
    UnsupportedSchema { name: PrincipalName, version: SchemaVersion },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Document error: {0}")]
    Document(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    pub fn not_found(name: &PrincipalName) -> Self {
        Self::PrincipalNotFound { name: name.clone() }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }
}
