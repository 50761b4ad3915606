//! Principal Access Cache
//!
//! Per-principal snapshots of access-control facts, shared with concurrent
//! consumers without re-querying the store on every request:
//! - PrincipalEntry: credentials, roles and per-resource privileges of one principal
//! - PrincipalCache: loads, publishes, refreshes and invalidates entries
//! - PrincipalHandle: refcounted read-only view handed to consumers
//! - PrincipalStore: seam to the persistent principal documents
//!
//! ```rust,ignore
//! let cache = PrincipalCache::open(&AppConfig::load()?).await?;
//! let alice = cache.acquire(&"alice@admin".parse()?).await?;
//!
//! if alice.is_valid() {
//!     let actions = alice.actions_for_resource(&ResourceKey::new("sales.orders"));
//! }
//! ```

pub mod cache;
pub mod entry;
pub mod error;
pub mod store;
pub mod types;

pub use cache::{PrincipalCache, PrincipalHandle};
pub use entry::{PrincipalEntry, ProbeState};
pub use error::CacheError;
pub use store::{InMemoryPrincipalStore, PrincipalDocument, PrincipalStore};
pub use types::{
    ActionSet, ActionType, CredentialData, ParseActionError, ParseNameError, Privilege,
    PrincipalName, ResourceKey, RoleName, SchemaVersion, UnknownSchemaVersion,
};

pub type Result<T> = std::result::Result<T, CacheError>;
