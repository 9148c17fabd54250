//! The policy store: base role grants, the role inheritance graph and the
//! resource catalog.
//!
//! A [`PolicyStore`] is built once at startup from a TOML [`PolicyDocument`]
//! and never changes afterwards. Every reference in the document is checked
//! at load time, and a cycle in the inheritance graph is a fatal error, so
//! the engine never has to guard against either while deciding.
//!
//! ```toml
//! version = 1
//! superuser_role = "ADMIN"
//!
//! [resources]
//! patients = ["read", "create", "update", "delete"]
//!
//! [roles.ASSISTENT.grants]
//! patients = ["read", "create"]
//!
//! [roles.ARZT]
//! inherits = ["ASSISTENT"]
//!
//! [roles.ARZT.grants]
//! patients = ["update"]
//!
//! [roles.ADMIN]
//! inherits = ["ARZT"]
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use carelock_core::{Action, ResourceType, RoleName};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PolicyError, Result};

static NO_ACTIONS: BTreeSet<Action> = BTreeSet::new();

/// The on-disk form of a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// Monotonic policy version, recorded for operators.
    pub version: u64,

    /// Role whose holders bypass every grant check.
    pub superuser_role: RoleName,

    /// Known resource types and the actions each supports.
    #[serde(default)]
    pub resources: BTreeMap<ResourceType, BTreeSet<Action>>,

    #[serde(default)]
    pub roles: BTreeMap<RoleName, RoleDocument>,
}

/// One role of a [`PolicyDocument`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDocument {
    /// Roles this role inherits from, in lookup order.
    #[serde(default)]
    pub inherits: Vec<RoleName>,

    /// Base grants: resource type to allowed actions.
    #[serde(default)]
    pub grants: BTreeMap<ResourceType, BTreeSet<Action>>,
}

/// A loaded role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub name: RoleName,
    pub inherits: Vec<RoleName>,
    grants: BTreeMap<ResourceType, BTreeSet<Action>>,
}

/// Immutable, validated policy.
#[derive(Debug, Clone)]
pub struct PolicyStore {
    version: u64,
    superuser_role: RoleName,
    catalog: BTreeMap<ResourceType, BTreeSet<Action>>,
    roles: BTreeMap<RoleName, Role>,
    /// Precomputed inheritance closure per role.
    inherited: BTreeMap<RoleName, Vec<RoleName>>,
}

impl PolicyStore {
    /// Parse and validate a TOML policy.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let document: PolicyDocument =
            toml::from_str(source).map_err(|e| PolicyError::Parse(e.to_string()))?;
        Self::from_document(document)
    }

    /// Read, parse and validate a TOML policy file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    /// Validate a parsed document.
    pub fn from_document(document: PolicyDocument) -> Result<Self> {
        let PolicyDocument {
            version,
            superuser_role,
            resources: catalog,
            roles: role_docs,
        } = document;

        if !role_docs.contains_key(&superuser_role) {
            return Err(PolicyError::UnknownRole(superuser_role));
        }

        for doc in role_docs.values() {
            if let Some(parent) = doc.inherits.iter().find(|p| !role_docs.contains_key(*p)) {
                return Err(PolicyError::UnknownRole(parent.clone()));
            }
            for (resource_type, actions) in &doc.grants {
                let known = catalog
                    .get(resource_type)
                    .ok_or_else(|| PolicyError::UnknownResourceType(resource_type.clone()))?;
                if let Some(action) = actions.iter().find(|a| !known.contains(*a)) {
                    return Err(PolicyError::UnknownAction {
                        resource_type: resource_type.clone(),
                        action: action.to_string(),
                    });
                }
            }
        }

        detect_cycle(&role_docs)?;

        let inherited = role_docs
            .keys()
            .map(|name| (name.clone(), closure(name, &role_docs)))
            .collect();

        let roles = role_docs
            .into_iter()
            .map(|(name, doc)| {
                let role = Role {
                    name: name.clone(),
                    inherits: doc.inherits,
                    grants: doc.grants,
                };
                (name, role)
            })
            .collect::<BTreeMap<_, _>>();

        info!(
            version,
            roles = roles.len(),
            resource_types = catalog.len(),
            superuser = %superuser_role,
            "policy loaded"
        );

        Ok(Self {
            version,
            superuser_role,
            catalog,
            roles,
            inherited,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn superuser_role(&self) -> &RoleName {
        &self.superuser_role
    }

    /// Actions `role` is granted on `resource_type` by its own base grants.
    ///
    /// Inherited grants are not included; unknown roles have none.
    pub fn base_permissions(&self, role: &RoleName, resource_type: &ResourceType) -> &BTreeSet<Action> {
        self.roles
            .get(role)
            .and_then(|r| r.grants.get(resource_type))
            .unwrap_or(&NO_ACTIONS)
    }

    /// Whether `role`'s own base grants include the action.
    pub fn grants(&self, role: &RoleName, resource_type: &ResourceType, action: &Action) -> bool {
        self.base_permissions(role, resource_type).contains(action)
    }

    /// Every role reachable from `role`, depth-first in declared order,
    /// without duplicates and without `role` itself.
    pub fn inherited_roles(&self, role: &RoleName) -> &[RoleName] {
        self.inherited.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn role(&self, name: &RoleName) -> Option<&Role> {
        self.roles.get(name)
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    pub fn is_known_role(&self, role: &RoleName) -> bool {
        self.roles.contains_key(role)
    }

    pub fn is_known_resource_type(&self, resource_type: &ResourceType) -> bool {
        self.catalog.contains_key(resource_type)
    }

    pub fn is_known_action(&self, resource_type: &ResourceType, action: &Action) -> bool {
        self.catalog
            .get(resource_type)
            .is_some_and(|actions| actions.contains(action))
    }

    /// Known resource types and their actions.
    pub fn catalog(&self) -> &BTreeMap<ResourceType, BTreeSet<Action>> {
        &self.catalog
    }
}

/// Reject any cycle in the inheritance graph, reporting the offending path.
fn detect_cycle(roles: &BTreeMap<RoleName, RoleDocument>) -> Result<()> {
    let mut done: HashSet<&RoleName> = HashSet::new();

    for start in roles.keys() {
        let mut path = Vec::new();
        visit(start, roles, &mut path, &mut done)?;
    }
    Ok(())
}

fn visit<'a>(
    role: &'a RoleName,
    roles: &'a BTreeMap<RoleName, RoleDocument>,
    path: &mut Vec<&'a RoleName>,
    done: &mut HashSet<&'a RoleName>,
) -> Result<()> {
    if done.contains(role) {
        return Ok(());
    }
    if let Some(pos) = path.iter().position(|r| *r == role) {
        let mut cycle: Vec<RoleName> = path[pos..].iter().map(|r| (*r).clone()).collect();
        cycle.push(role.clone());
        return Err(PolicyError::CycleDetected { path: cycle });
    }

    path.push(role);
    if let Some(doc) = roles.get(role) {
        for parent in &doc.inherits {
            visit(parent, roles, path, done)?;
        }
    }
    path.pop();
    done.insert(role);
    Ok(())
}

/// Depth-first preorder closure of an acyclic graph.
fn closure(role: &RoleName, roles: &BTreeMap<RoleName, RoleDocument>) -> Vec<RoleName> {
    fn walk(role: &RoleName, roles: &BTreeMap<RoleName, RoleDocument>, out: &mut Vec<RoleName>) {
        let Some(doc) = roles.get(role) else {
            return;
        };
        for parent in &doc.inherits {
            if !out.contains(parent) {
                out.push(parent.clone());
                walk(parent, roles, out);
            }
        }
    }

    let mut out = Vec::new();
    walk(role, roles, &mut out);
    out
}
