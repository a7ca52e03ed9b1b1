use std::collections::{BTreeMap, BTreeSet};

use axum::http::Method;
use serde::{Deserialize, Serialize};

/// One level of the resource containment hierarchy. Declaration order is the
/// containment order; chains are evaluated root to leaf.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    Project,
    Cluster,
    Registry,
    Infra,
    Namespace,
    Application,
}

impl PermissionScope {
    pub const ALL: [PermissionScope; 6] = [
        PermissionScope::Project,
        PermissionScope::Cluster,
        PermissionScope::Registry,
        PermissionScope::Infra,
        PermissionScope::Namespace,
        PermissionScope::Application,
    ];

    /// URL path parameter the scope resolves from.
    pub const fn url_param(self) -> &'static str {
        match self {
            PermissionScope::Project => "project_id",
            PermissionScope::Cluster => "cluster_id",
            PermissionScope::Registry => "registry_id",
            PermissionScope::Infra => "infra_id",
            PermissionScope::Namespace => "namespace",
            PermissionScope::Application => "application",
        }
    }

    /// Numeric scopes parse their parameter as an unsigned integer; name
    /// scopes take it verbatim.
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            PermissionScope::Project
                | PermissionScope::Cluster
                | PermissionScope::Registry
                | PermissionScope::Infra
        )
    }
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    Delete,
}

/// Identity of one resource at one scope: a numeric id or a name, never both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceIdentifier {
    Id(u64),
    Name(String),
}

/// What is being attempted at one scope level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAction {
    pub verb: Verb,
    pub resource: ResourceIdentifier,
}

/// Static per-endpoint descriptor, authored once at route registration.
#[derive(Clone, Debug)]
pub struct EndpointMetadata {
    pub verb: Verb,
    pub method: Method,
    pub scopes: Vec<PermissionScope>,
    pub is_websocket: bool,
}

impl EndpointMetadata {
    pub fn new(verb: Verb, method: Method, scopes: Vec<PermissionScope>) -> Self {
        Self {
            verb,
            method,
            scopes,
            is_websocket: false,
        }
    }

    pub fn websocket(mut self) -> Self {
        self.is_websocket = true;
        self
    }
}

/// The resolved action chain of one request, keyed in containment order.
///
/// On Allow the middleware inserts this into the request extensions; that
/// extension slot is the contract through which downstream handlers read
/// resource identity instead of re-parsing the path. The value is constructed
/// once and never mutated afterwards.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedScopes(pub BTreeMap<PermissionScope, RequestAction>);

impl ResolvedScopes {
    pub fn get(&self, scope: PermissionScope) -> Option<&RequestAction> {
        self.0.get(&scope)
    }

    /// Numeric id resolved at the given scope, if any.
    pub fn id_at(&self, scope: PermissionScope) -> Option<u64> {
        match self.get(scope)?.resource {
            ResourceIdentifier::Id(id) => Some(id),
            ResourceIdentifier::Name(_) => None,
        }
    }

    /// Name resolved at the given scope, if any.
    pub fn name_at(&self, scope: PermissionScope) -> Option<&str> {
        match &self.get(scope)?.resource {
            ResourceIdentifier::Name(name) => Some(name),
            ResourceIdentifier::Id(_) => None,
        }
    }

    pub fn project_id(&self) -> Option<u64> {
        self.id_at(PermissionScope::Project)
    }
}

/// Verbs a rule grants: the wildcard (serialized `"*"`) or a concrete set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerbSet {
    #[serde(rename = "*")]
    Wildcard,
    #[serde(untagged)]
    Verbs(BTreeSet<Verb>),
}

impl VerbSet {
    pub fn permits(&self, verb: Verb) -> bool {
        match self {
            VerbSet::Wildcard => true,
            VerbSet::Verbs(set) => set.contains(&verb),
        }
    }
}

/// Resources a rule applies to: the wildcard or one concrete identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceMatcher {
    #[serde(rename = "*")]
    Wildcard,
    #[serde(untagged)]
    Exact(ResourceIdentifier),
}

impl ResourceMatcher {
    /// Strict type-and-value equality, wildcard excepted. A name-based rule
    /// never matches an id-resolved resource.
    pub fn matches(&self, resource: &ResourceIdentifier) -> bool {
        match self {
            ResourceMatcher::Wildcard => true,
            ResourceMatcher::Exact(want) => want == resource,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub scope: PermissionScope,
    pub verbs: VerbSet,
    pub resource: ResourceMatcher,
}

/// A named, storable rule set granting verbs on resources at given scopes,
/// associated with a role assignment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub name: String,
    pub rules: Vec<PolicyRule>,
}

/// Read-only built-in: Get/List on any resource at every scope.
pub fn viewer_policy() -> PolicyDocument {
    PolicyDocument {
        name: "viewer".to_string(),
        rules: PermissionScope::ALL
            .iter()
            .map(|&scope| PolicyRule {
                scope,
                verbs: VerbSet::Verbs(BTreeSet::from([Verb::Get, Verb::List])),
                resource: ResourceMatcher::Wildcard,
            })
            .collect(),
    }
}

/// Built-in: every verb on any resource at every scope.
pub fn admin_policy() -> PolicyDocument {
    PolicyDocument {
        name: "admin".to_string(),
        rules: PermissionScope::ALL
            .iter()
            .map(|&scope| PolicyRule {
                scope,
                verbs: VerbSet::Wildcard,
                resource: ResourceMatcher::Wildcard,
            })
            .collect(),
    }
}

/// Built-in: full access below project level; the project itself cannot be
/// deleted.
pub fn developer_policy() -> PolicyDocument {
    PolicyDocument {
        name: "developer".to_string(),
        rules: PermissionScope::ALL
            .iter()
            .map(|&scope| PolicyRule {
                scope,
                verbs: if scope == PermissionScope::Project {
                    VerbSet::Verbs(BTreeSet::from([
                        Verb::Get,
                        Verb::List,
                        Verb::Create,
                        Verb::Update,
                    ]))
                } else {
                    VerbSet::Wildcard
                },
                resource: ResourceMatcher::Wildcard,
            })
            .collect(),
    }
}
