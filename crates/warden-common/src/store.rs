//! Policy Store Adapter
//!
//! The primary data store is an external collaborator. The gateway core only
//! needs keyed reads, full listings and single-record updates, so the
//! contract is a plain synchronous trait. Each call is transactional on its
//! own; nothing here spans several records.
//!
//! `MemoryStore` is the in-process implementation used by tests and by the
//! binary when it runs from a JSON snapshot.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::model::{
    Endpoint, EndpointGroup, EndpointGroupId, EndpointId, Registry, RegistryId, Role, RoleId,
    Stack, StackId, Team, TeamId, TeamMembership, User, UserId,
};
use crate::{Error, Result};

/// Keyed access to users, teams, memberships, roles, environments and registries
#[cfg_attr(test, mockall::automock)]
pub trait PolicyStore: Send + Sync {
    /// Get a user
    fn user(&self, id: UserId) -> Result<User>;
    /// List all users
    fn users(&self) -> Result<Vec<User>>;
    /// Replace a stored user
    fn update_user(&self, user: &User) -> Result<()>;

    /// Get a team
    fn team(&self, id: TeamId) -> Result<Team>;
    /// List all teams
    fn teams(&self) -> Result<Vec<Team>>;

    /// List the memberships of one user
    fn memberships_by_user(&self, user_id: UserId) -> Result<Vec<TeamMembership>>;
    /// List all memberships
    fn memberships(&self) -> Result<Vec<TeamMembership>>;

    /// Get a role
    fn role(&self, id: RoleId) -> Result<Role>;
    /// List all roles
    fn roles(&self) -> Result<Vec<Role>>;
    /// Store a new role
    fn create_role(&self, role: &Role) -> Result<()>;
    /// Replace a stored role
    fn update_role(&self, role: &Role) -> Result<()>;

    /// Get an environment
    fn endpoint(&self, id: EndpointId) -> Result<Endpoint>;
    /// List all environments
    fn endpoints(&self) -> Result<Vec<Endpoint>>;
    /// Replace a stored environment
    fn update_endpoint(&self, endpoint: &Endpoint) -> Result<()>;

    /// Get an environment group
    fn endpoint_group(&self, id: EndpointGroupId) -> Result<EndpointGroup>;
    /// List all environment groups
    fn endpoint_groups(&self) -> Result<Vec<EndpointGroup>>;
    /// Replace a stored environment group
    fn update_endpoint_group(&self, group: &EndpointGroup) -> Result<()>;

    /// List all registries
    fn registries(&self) -> Result<Vec<Registry>>;
    /// Replace a stored registry
    fn update_registry(&self, registry: &Registry) -> Result<()>;

    /// List all stacks
    fn stacks(&self) -> Result<Vec<Stack>>;
    /// Delete a stack
    fn delete_stack(&self, id: StackId) -> Result<()>;
}

/// Serializable content of a [`MemoryStore`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Users
    #[serde(default)]
    pub users: Vec<User>,
    /// Teams
    #[serde(default)]
    pub teams: Vec<Team>,
    /// Team memberships
    #[serde(default)]
    pub memberships: Vec<TeamMembership>,
    /// Roles
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Environments
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    /// Environment groups
    #[serde(default)]
    pub endpoint_groups: Vec<EndpointGroup>,
    /// Registries
    #[serde(default)]
    pub registries: Vec<Registry>,
    /// Stacks
    #[serde(default)]
    pub stacks: Vec<Stack>,
}

#[derive(Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    teams: BTreeMap<TeamId, Team>,
    memberships: Vec<TeamMembership>,
    roles: BTreeMap<RoleId, Role>,
    endpoints: BTreeMap<EndpointId, Endpoint>,
    endpoint_groups: BTreeMap<EndpointGroupId, EndpointGroup>,
    registries: BTreeMap<RegistryId, Registry>,
    stacks: BTreeMap<StackId, Stack>,
}

/// In-memory [`PolicyStore`]
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from a snapshot
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let store = Self::new();
        {
            let mut t = store.tables.write();
            t.users = snapshot.users.into_iter().map(|u| (u.id, u)).collect();
            t.teams = snapshot.teams.into_iter().map(|x| (x.id, x)).collect();
            t.memberships = snapshot.memberships;
            t.roles = snapshot.roles.into_iter().map(|r| (r.id, r)).collect();
            t.endpoints = snapshot.endpoints.into_iter().map(|e| (e.id, e)).collect();
            t.endpoint_groups = snapshot
                .endpoint_groups
                .into_iter()
                .map(|g| (g.id, g))
                .collect();
            t.registries = snapshot.registries.into_iter().map(|r| (r.id, r)).collect();
            t.stacks = snapshot.stacks.into_iter().map(|s| (s.id, s)).collect();
        }
        store
    }

    /// Export the current content
    pub fn snapshot(&self) -> StoreSnapshot {
        let t = self.tables.read();
        StoreSnapshot {
            users: t.users.values().cloned().collect(),
            teams: t.teams.values().cloned().collect(),
            memberships: t.memberships.clone(),
            roles: t.roles.values().cloned().collect(),
            endpoints: t.endpoints.values().cloned().collect(),
            endpoint_groups: t.endpoint_groups.values().cloned().collect(),
            registries: t.registries.values().cloned().collect(),
            stacks: t.stacks.values().cloned().collect(),
        }
    }

    /// Insert or replace a user
    pub fn put_user(&self, user: User) {
        self.tables.write().users.insert(user.id, user);
    }

    /// Insert or replace a team
    pub fn put_team(&self, team: Team) {
        self.tables.write().teams.insert(team.id, team);
    }

    /// Add a membership edge
    pub fn put_membership(&self, membership: TeamMembership) {
        self.tables.write().memberships.push(membership);
    }

    /// Insert or replace an environment
    pub fn put_endpoint(&self, endpoint: Endpoint) {
        self.tables.write().endpoints.insert(endpoint.id, endpoint);
    }

    /// Insert or replace an environment group
    pub fn put_endpoint_group(&self, group: EndpointGroup) {
        self.tables.write().endpoint_groups.insert(group.id, group);
    }

    /// Insert or replace a registry
    pub fn put_registry(&self, registry: Registry) {
        self.tables.write().registries.insert(registry.id, registry);
    }

    /// Insert or replace a stack
    pub fn put_stack(&self, stack: Stack) {
        self.tables.write().stacks.insert(stack.id, stack);
    }
}

fn replace<K: Ord + Copy + ToString, V: Clone>(
    table: &mut BTreeMap<K, V>,
    kind: &'static str,
    key: K,
    value: &V,
) -> Result<()> {
    match table.get_mut(&key) {
        Some(slot) => {
            *slot = value.clone();
            Ok(())
        }
        None => Err(Error::not_found(kind, key)),
    }
}

impl PolicyStore for MemoryStore {
    fn user(&self, id: UserId) -> Result<User> {
        self.tables
            .read()
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("user", id))
    }

    fn users(&self) -> Result<Vec<User>> {
        Ok(self.tables.read().users.values().cloned().collect())
    }

    fn update_user(&self, user: &User) -> Result<()> {
        replace(&mut self.tables.write().users, "user", user.id, user)
    }

    fn team(&self, id: TeamId) -> Result<Team> {
        self.tables
            .read()
            .teams
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("team", id))
    }

    fn teams(&self) -> Result<Vec<Team>> {
        Ok(self.tables.read().teams.values().cloned().collect())
    }

    fn memberships_by_user(&self, user_id: UserId) -> Result<Vec<TeamMembership>> {
        Ok(self
            .tables
            .read()
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id)
            .copied()
            .collect())
    }

    fn memberships(&self) -> Result<Vec<TeamMembership>> {
        Ok(self.tables.read().memberships.clone())
    }

    fn role(&self, id: RoleId) -> Result<Role> {
        self.tables
            .read()
            .roles
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("role", id))
    }

    fn roles(&self) -> Result<Vec<Role>> {
        Ok(self.tables.read().roles.values().cloned().collect())
    }

    fn create_role(&self, role: &Role) -> Result<()> {
        let mut t = self.tables.write();
        if t.roles.contains_key(&role.id) {
            return Err(Error::store(format!("role {} already exists", role.id)));
        }
        t.roles.insert(role.id, role.clone());
        Ok(())
    }

    fn update_role(&self, role: &Role) -> Result<()> {
        replace(&mut self.tables.write().roles, "role", role.id, role)
    }

    fn endpoint(&self, id: EndpointId) -> Result<Endpoint> {
        self.tables
            .read()
            .endpoints
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("endpoint", id))
    }

    fn endpoints(&self) -> Result<Vec<Endpoint>> {
        Ok(self.tables.read().endpoints.values().cloned().collect())
    }

    fn update_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        replace(
            &mut self.tables.write().endpoints,
            "endpoint",
            endpoint.id,
            endpoint,
        )
    }

    fn endpoint_group(&self, id: EndpointGroupId) -> Result<EndpointGroup> {
        self.tables
            .read()
            .endpoint_groups
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("endpoint group", id))
    }

    fn endpoint_groups(&self) -> Result<Vec<EndpointGroup>> {
        Ok(self.tables.read().endpoint_groups.values().cloned().collect())
    }

    fn update_endpoint_group(&self, group: &EndpointGroup) -> Result<()> {
        replace(
            &mut self.tables.write().endpoint_groups,
            "endpoint group",
            group.id,
            group,
        )
    }

    fn registries(&self) -> Result<Vec<Registry>> {
        Ok(self.tables.read().registries.values().cloned().collect())
    }

    fn update_registry(&self, registry: &Registry) -> Result<()> {
        replace(
            &mut self.tables.write().registries,
            "registry",
            registry.id,
            registry,
        )
    }

    fn stacks(&self) -> Result<Vec<Stack>> {
        Ok(self.tables.read().stacks.values().cloned().collect())
    }

    fn delete_stack(&self, id: StackId) -> Result<()> {
        self.tables
            .write()
            .stacks
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("stack", id))
    }
}
