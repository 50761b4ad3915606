//! Principal Access Snapshot
//!
//! A `PrincipalEntry` holds everything needed to authorize operations for
//! one principal: credentials, role memberships and per-resource privileges.
//!
//! Entries are built and mutated only by the [`PrincipalCache`] that owns
//! them. Mutators take `&mut self`, so once an entry is shared behind an
//! `Arc` (through a [`PrincipalHandle`]) its content is frozen. The validity
//! flag is the one field the cache still flips after publication, and the
//! reference count is crate-private. Consumers must check [`is_valid`](PrincipalEntry::is_valid)
//! before starting new work and re-acquire from the cache if it is false.
//!
//! [`PrincipalCache`]: crate::PrincipalCache
//! [`PrincipalHandle`]: crate::PrincipalHandle

use indexmap::IndexSet;
use std::collections::{hash_map, hash_set, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::types::{
    ActionSet, CredentialData, Privilege, PrincipalName, ResourceKey, RoleName, SchemaVersion,
};

/// Legacy probe state of a single database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Unprobed,
    Probed,
}

pub struct PrincipalEntry {
    name: PrincipalName,

    // Resource key -> privilege on that resource
    privileges: HashMap<ResourceKey, Privilege>,

    roles: HashSet<RoleName>,

    // Databases already probed for legacy privileges. Only meaningful under V1.
    probed_databases: IndexSet<String>,

    credentials: CredentialData,

    schema_version: SchemaVersion,

    // Changed only by the owning cache while it holds its table lock.
    ref_count: AtomicU32,

    valid: AtomicBool,
}

impl PrincipalEntry {
    pub fn new(name: PrincipalName) -> Self {
        Self {
            name,
            privileges: HashMap::new(),
            roles: HashSet::new(),
            probed_databases: IndexSet::new(),
            credentials: CredentialData::default(),
            schema_version: SchemaVersion::V2,
            ref_count: AtomicU32::new(0),
            valid: AtomicBool::new(true),
        }
    }

    // ------------------------------------------------------------------
    // Read surface
    // ------------------------------------------------------------------

    pub fn name(&self) -> &PrincipalName {
        &self.name
    }

    /// Roles this principal belongs to. Call again to restart the iteration.
    pub fn roles(&self) -> hash_set::Iter<'_, RoleName> {
        self.roles.iter()
    }

    pub fn has_role(&self, role: &RoleName) -> bool {
        self.roles.contains(role)
    }

    /// Actions recorded for exactly `resource`; empty when none were granted.
    pub fn actions_for_resource(&self, resource: &ResourceKey) -> ActionSet {
        self.privileges
            .get(resource)
            .map(|privilege| privilege.actions.clone())
            .unwrap_or_default()
    }

    pub fn privileges(&self) -> hash_map::Values<'_, ResourceKey, Privilege> {
        self.privileges.values()
    }

    pub fn credentials(&self) -> &CredentialData {
        &self.credentials
    }

    pub fn schema_version(&self) -> SchemaVersion {
        self.schema_version
    }

    /// Whether legacy privileges for `database` were already resolved.
    /// Always false for entries built from current-schema documents.
    pub fn has_probed_legacy(&self, database: &str) -> bool {
        self.probe_state(database) == ProbeState::Probed
    }

    pub fn probe_state(&self, database: &str) -> ProbeState {
        if self.schema_version == SchemaVersion::V1 && self.probed_databases.contains(database) {
            ProbeState::Probed
        } else {
            ProbeState::Unprobed
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub(crate) fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Mutators, cache only
    // ------------------------------------------------------------------

    /// Replace content with `other`'s. Reference count and validity are
    /// properties of this instance and are left untouched.
    ///
    /// The schema version is content too: copying a current-schema entry
    /// onto a legacy one makes it current again. This is the only way back
    /// from [`SchemaVersion::V1`]; [`set_schema_version_1`] stays one-way.
    ///
    /// [`set_schema_version_1`]: Self::set_schema_version_1
    pub fn copy_from(&mut self, other: &PrincipalEntry) {
        self.debug_assert_mutable();
        debug_assert_eq!(self.name, other.name, "copy_from across principals");

        self.privileges = other.privileges.clone();
        self.roles = other.roles.clone();
        self.probed_databases = other.probed_databases.clone();
        self.credentials = other.credentials.clone();
        self.schema_version = other.schema_version;
    }

    pub fn set_credentials(&mut self, credentials: CredentialData) {
        self.debug_assert_mutable();
        self.credentials = credentials;
    }

    pub fn add_role(&mut self, role: RoleName) {
        self.debug_assert_mutable();
        self.roles.insert(role);
    }

    pub fn add_roles(&mut self, roles: impl IntoIterator<Item = RoleName>) {
        for role in roles {
            self.add_role(role);
        }
    }

    /// Record `privilege`, unioning with any actions already held on its resource.
    pub fn add_privilege(&mut self, privilege: Privilege) {
        self.debug_assert_mutable();
        match self.privileges.entry(privilege.resource.clone()) {
            hash_map::Entry::Occupied(mut existing) => {
                existing.get_mut().actions.add_all_from(&privilege.actions);
            }
            hash_map::Entry::Vacant(slot) => {
                slot.insert(privilege);
            }
        }
    }

    pub fn add_privileges(&mut self, privileges: impl IntoIterator<Item = Privilege>) {
        for privilege in privileges {
            self.add_privilege(privilege);
        }
    }

    /// Mark this entry as built from legacy documents. There is no way back.
    pub fn set_schema_version_1(&mut self) {
        self.debug_assert_mutable();
        self.schema_version = SchemaVersion::V1;
    }

    /// No-op unless the entry uses the legacy schema.
    pub fn mark_probed_legacy(&mut self, database: &str) {
        self.debug_assert_mutable();
        if self.schema_version == SchemaVersion::V1 && !self.probed_databases.contains(database) {
            self.probed_databases.insert(database.to_string());
        }
    }

    /// Mark this entry stale. Irreversible; allowed at any reference count.
    pub(crate) fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    pub(crate) fn increment_ref_count(&self) {
        self.ref_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decrement_ref_count(&self) {
        let previous = self.ref_count.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(previous > 0, "ref count underflow for {}", self.name);
    }

    #[cfg(test)]
    pub(crate) fn probed_databases(&self) -> impl Iterator<Item = &str> {
        self.probed_databases.iter().map(String::as_str)
    }

    fn debug_assert_mutable(&self) {
        debug_assert!(self.is_valid(), "mutating invalidated entry {}", self.name);
        debug_assert_eq!(self.ref_count(), 0, "mutating referenced entry {}", self.name);
    }
}

impl fmt::Debug for PrincipalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrincipalEntry")
            .field("name", &self.name)
            .field("roles", &self.roles)
            .field("privileges", &self.privileges)
            .field("probed_databases", &self.probed_databases)
            .field("credentials", &self.credentials)
            .field("schema_version", &self.schema_version)
            .field("ref_count", &self.ref_count())
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl Drop for PrincipalEntry {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert_eq!(
                *self.ref_count.get_mut(),
                0,
                "reclaiming referenced entry {}",
                self.name
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActionType::*;

    fn alice() -> PrincipalEntry {
        PrincipalEntry::new(PrincipalName::new("alice", "admin"))
    }

    fn orders() -> ResourceKey {
        ResourceKey::new("sales.orders")
    }

    #[test]
    fn test_new_entry_defaults() {
        let entry = alice();
        assert_eq!(entry.name(), &PrincipalName::new("alice", "admin"));
        assert_eq!(entry.roles().count(), 0);
        assert_eq!(entry.privileges().count(), 0);
        assert_eq!(entry.schema_version(), SchemaVersion::V2);
        assert_eq!(entry.ref_count(), 0);
        assert!(entry.is_valid());
        assert_eq!(entry.credentials(), &CredentialData::default());
    }

    #[test]
    fn test_alice_scenario() {
        let mut entry = alice();
        entry.add_role("readWrite@sales".parse().unwrap());
        entry.add_privilege(Privilege::new("sales.orders", [Find, Insert]));
        entry.add_privilege(Privilege::new("sales.orders", [Update]));

        assert_eq!(
            entry.actions_for_resource(&orders()),
            ActionSet::from([Find, Insert, Update])
        );
        let roles: Vec<_> = entry.roles().cloned().collect();
        assert_eq!(roles, vec![RoleName::new("readWrite", "sales")]);
    }

    #[test]
    fn test_privilege_union_is_order_independent() {
        let grants = [
            ActionSet::from([Find]),
            ActionSet::from([Insert, Update]),
            ActionSet::from([Find, Remove]),
            ActionSet::from([CreateIndex]),
        ];
        let expected = grants.iter().fold(ActionSet::new(), |acc, set| acc.union(set));

        let orders_of_application: [[usize; 4]; 4] =
            [[0, 1, 2, 3], [3, 2, 1, 0], [1, 3, 0, 2], [2, 0, 3, 1]];
        for order in orders_of_application {
            let mut entry = alice();
            for i in order {
                entry.add_privilege(Privilege::new("sales.orders", grants[i].clone()));
            }
            assert_eq!(entry.actions_for_resource(&orders()), expected);
        }
    }

    #[test]
    fn test_add_privileges_keys_stay_unique() {
        let mut entry = alice();
        entry.add_privileges(vec![
            Privilege::new("sales.orders", [Find]),
            Privilege::new("sales.invoices", [Find]),
            Privilege::new("sales.orders", [Insert]),
        ]);

        assert_eq!(entry.privileges().count(), 2);
        assert_eq!(
            entry.actions_for_resource(&orders()),
            ActionSet::from([Find, Insert])
        );
    }

    #[test]
    fn test_add_role_is_idempotent() {
        let mut entry = alice();
        let role = RoleName::new("read", "hr");
        entry.add_role(role.clone());
        entry.add_role(role.clone());
        entry.add_roles(vec![role.clone(), RoleName::new("read", "sales")]);

        assert_eq!(entry.roles().filter(|r| **r == role).count(), 1);
        assert_eq!(entry.roles().count(), 2);
        assert!(entry.has_role(&role));
    }

    #[test]
    fn test_roles_iteration_restarts() {
        let mut entry = alice();
        entry.add_roles(vec![RoleName::new("read", "hr"), RoleName::new("dbAdmin", "hr")]);

        let first: HashSet<_> = entry.roles().collect();
        let second: HashSet<_> = entry.roles().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_missing_resource_is_empty() {
        let mut entry = alice();
        entry.add_privilege(Privilege::new("sales.orders", [Find]));

        assert!(entry.actions_for_resource(&ResourceKey::new("sales")).is_empty());
        assert!(entry.actions_for_resource(&ResourceKey::new("sales.orders.archive")).is_empty());
        assert!(entry.actions_for_resource(&ResourceKey::new("")).is_empty());
    }

    #[test]
    fn test_invalidate_is_irreversible() {
        let entry = alice();
        entry.invalidate();
        assert!(!entry.is_valid());
        for _ in 0..3 {
            entry.invalidate();
            assert!(!entry.is_valid());
        }
    }

    #[test]
    fn test_invalidate_allowed_while_referenced() {
        let entry = alice();
        entry.increment_ref_count();
        entry.invalidate();
        assert!(!entry.is_valid());
        entry.decrement_ref_count();
    }

    #[test]
    fn test_schema_version_one_way() {
        let mut entry = alice();
        entry.set_schema_version_1();
        assert_eq!(entry.schema_version(), SchemaVersion::V1);

        entry.add_role(RoleName::new("read", "sales"));
        entry.add_privilege(Privilege::new("sales.orders", [Find]));
        entry.mark_probed_legacy("sales");
        entry.set_credentials(CredentialData::local("pw"));
        entry.set_schema_version_1();
        assert_eq!(entry.schema_version(), SchemaVersion::V1);
    }

    #[test]
    fn test_legacy_probe_scenario() {
        let mut entry = alice();
        entry.set_schema_version_1();
        entry.mark_probed_legacy("sales");

        assert!(entry.has_probed_legacy("sales"));
        assert!(!entry.has_probed_legacy("hr"));
        assert_eq!(entry.probe_state("sales"), ProbeState::Probed);
        assert_eq!(entry.probe_state("hr"), ProbeState::Unprobed);
    }

    #[test]
    fn test_mark_probed_twice_does_not_duplicate() {
        let mut entry = alice();
        entry.set_schema_version_1();
        entry.mark_probed_legacy("db1");
        entry.mark_probed_legacy("db2");
        entry.mark_probed_legacy("db1");

        let probed: Vec<_> = entry.probed_databases().collect();
        assert_eq!(probed, vec!["db1", "db2"]);
    }

    #[test]
    fn test_probing_inert_under_current_schema() {
        let mut entry = alice();
        entry.mark_probed_legacy("sales");

        assert!(!entry.has_probed_legacy("sales"));
        assert_eq!(entry.probed_databases().count(), 0);
    }

    #[test]
    fn test_copy_from_keeps_instance_state() {
        let mut source = alice();
        source.set_schema_version_1();
        source.add_role(RoleName::new("readWrite", "sales"));
        source.add_privilege(Privilege::new("sales.orders", [Find, Update]));
        source.mark_probed_legacy("sales");
        source.set_credentials(CredentialData::local("pw"));

        let mut target = alice();
        target.add_role(RoleName::new("read", "hr"));
        target.add_privilege(Privilege::new("hr.people", [Find]));
        target.copy_from(&source);

        assert!(target.is_valid());
        assert_eq!(target.ref_count(), 0);
        assert_eq!(target.schema_version(), SchemaVersion::V1);
        let roles: Vec<_> = target.roles().cloned().collect();
        assert_eq!(roles, vec![RoleName::new("readWrite", "sales")]);
        assert_eq!(
            target.actions_for_resource(&orders()),
            ActionSet::from([Find, Update])
        );
        assert!(target.actions_for_resource(&ResourceKey::new("hr.people")).is_empty());
        assert!(target.has_probed_legacy("sales"));
        assert_eq!(target.credentials(), &CredentialData::local("pw"));
    }

    #[test]
    fn test_copy_from_replaces_legacy_schema() {
        let mut target = alice();
        target.set_schema_version_1();
        target.mark_probed_legacy("sales");

        target.copy_from(&alice());

        assert_eq!(target.schema_version(), SchemaVersion::V2);
        assert!(!target.has_probed_legacy("sales"));
        assert_eq!(target.probe_state("sales"), ProbeState::Unprobed);
        assert_eq!(target.probed_databases().count(), 0);
    }

    #[test]
    fn test_copy_from_does_not_copy_validity() {
        let source = alice();
        source.invalidate();

        let mut target = alice();
        target.copy_from(&source);
        assert!(target.is_valid());
    }

    #[test]
    fn test_ref_count() {
        let entry = alice();
        entry.increment_ref_count();
        entry.increment_ref_count();
        assert_eq!(entry.ref_count(), 2);
        entry.decrement_ref_count();
        entry.decrement_ref_count();
        assert_eq!(entry.ref_count(), 0);
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let mut entry = alice();
        entry.set_credentials(CredentialData::local("hunter2"));
        let debug = format!("{entry:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }
}
