//! Access-control value types
//!
//! Names, resource keys, action sets and privileges shared by the cache
//! entry, the store seam and consumers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A qualified name could not be parsed from `<name>@<db>` form.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("expected <name>@<db>, got {0:?}")]
pub struct ParseNameError(String);

fn split_qualified(s: &str) -> Result<(&str, &str), ParseNameError> {
    match s.rsplit_once('@') {
        Some((name, db)) if !name.is_empty() && !db.is_empty() => Ok((name, db)),
        _ => Err(ParseNameError(s.to_string())),
    }
}

/// Identity of a principal: user name plus the database that defines it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrincipalName {
    user: String,
    db: String,
}

impl PrincipalName {
    pub fn new(user: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            db: db.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn db(&self) -> &str {
        &self.db
    }
}

impl fmt::Display for PrincipalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.db)
    }
}

impl FromStr for PrincipalName {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user, db) = split_qualified(s)?;
        Ok(Self::new(user, db))
    }
}

/// A role, qualified by the database it is defined on (e.g. `readWrite@sales`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleName {
    role: String,
    db: String,
}

impl RoleName {
    pub fn new(role: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            db: db.into(),
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn db(&self) -> &str {
        &self.db
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.role, self.db)
    }
}

impl FromStr for RoleName {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (role, db) = split_qualified(s)?;
        Ok(Self::new(role, db))
    }
}

/// Exact resource identifier a privilege is recorded against (e.g. `sales.orders`).
///
/// Keys are compared verbatim; hierarchy and pattern semantics are left to
/// the authorization layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ResourceKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Operation that can be granted on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionType {
    Find,
    Insert,
    Update,
    Remove,
    CreateCollection,
    DropCollection,
    CreateIndex,
    DropIndex,
    ListCollections,
    UserAdmin,
    DbAdmin,
    ClusterAdmin,
    AnyAction,
}

impl ActionType {
    pub const ALL: &'static [ActionType] = &[
        Self::Find,
        Self::Insert,
        Self::Update,
        Self::Remove,
        Self::CreateCollection,
        Self::DropCollection,
        Self::CreateIndex,
        Self::DropIndex,
        Self::ListCollections,
        Self::UserAdmin,
        Self::DbAdmin,
        Self::ClusterAdmin,
        Self::AnyAction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Find => "find",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Remove => "remove",
            Self::CreateCollection => "createCollection",
            Self::DropCollection => "dropCollection",
            Self::CreateIndex => "createIndex",
            Self::DropIndex => "dropIndex",
            Self::ListCollections => "listCollections",
            Self::UserAdmin => "userAdmin",
            Self::DbAdmin => "dbAdmin",
            Self::ClusterAdmin => "clusterAdmin",
            Self::AnyAction => "anyAction",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown action name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown action: {0:?}")]
pub struct ParseActionError(String);

impl FromStr for ActionType {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| ParseActionError(s.to_string()))
    }
}

/// Set of actions granted on a single resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionSet {
    actions: BTreeSet<ActionType>,
}

impl ActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_action(&mut self, action: ActionType) {
        self.actions.insert(action);
    }

    /// Union `other` into this set.
    pub fn add_all_from(&mut self, other: &ActionSet) {
        self.actions.extend(other.actions.iter().copied());
    }

    pub fn union(&self, other: &ActionSet) -> ActionSet {
        let mut merged = self.clone();
        merged.add_all_from(other);
        merged
    }

    pub fn contains(&self, action: ActionType) -> bool {
        self.actions.contains(&action)
    }

    pub fn contains_all(&self, other: &ActionSet) -> bool {
        other.actions.is_subset(&self.actions)
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ActionType> + '_ {
        self.actions.iter().copied()
    }
}

impl FromIterator<ActionType> for ActionSet {
    fn from_iter<I: IntoIterator<Item = ActionType>>(iter: I) -> Self {
        Self {
            actions: iter.into_iter().collect(),
        }
    }
}

impl<const N: usize> From<[ActionType; N]> for ActionSet {
    fn from(actions: [ActionType; N]) -> Self {
        actions.into_iter().collect()
    }
}

impl fmt::Display for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, action) in self.actions.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{action}")?;
        }
        f.write_str("}")
    }
}

/// Actions granted on one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Privilege {
    pub resource: ResourceKey,
    pub actions: ActionSet,
}

impl Privilege {
    pub fn new(resource: impl Into<ResourceKey>, actions: impl Into<ActionSet>) -> Self {
        Self {
            resource: resource.into(),
            actions: actions.into(),
        }
    }
}

/// Authentication material attached to a principal.
///
/// When `is_external` is set the password is not locally verifiable and
/// authentication is delegated to an external authenticator.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialData {
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub is_external: bool,
}

impl CredentialData {
    pub fn local(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            is_external: false,
        }
    }

    pub fn external() -> Self {
        Self {
            password: String::new(),
            is_external: true,
        }
    }

    /// Secret usable for local verification, if any.
    pub fn local_secret(&self) -> Option<&str> {
        if self.is_external || self.password.is_empty() {
            None
        } else {
            Some(&self.password)
        }
    }
}

impl fmt::Debug for CredentialData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialData")
            .field("password", &"<redacted>")
            .field("is_external", &self.is_external)
            .finish()
    }
}

/// Schema of the principal documents an entry was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SchemaVersion {
    /// Legacy documents; privileges are resolved per database on demand
    V1,
    /// Fully resolved documents
    #[default]
    V2,
}

impl SchemaVersion {
    pub fn number(&self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown schema version: {0}")]
pub struct UnknownSchemaVersion(u8);

impl TryFrom<u8> for SchemaVersion {
    type Error = UnknownSchemaVersion;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            other => Err(UnknownSchemaVersion(other)),
        }
    }
}

impl From<SchemaVersion> for u8 {
    fn from(version: SchemaVersion) -> Self {
        version.number()
    }
}
