//! Hierarchical, scope-based authorization for the control-plane API.
//!
//! Every gated route carries an [`EndpointMetadata`] describing the verb and
//! the ordered chain of permission scopes its path names. Per request, the
//! [`PolicyLayer`] middleware resolves the chain from URL parameters, loads
//! the caller's policy documents, evaluates the chain against them, and only
//! on Allow invokes the wrapped handler with the resolved chain attached as a
//! [`ResolvedScopes`] request extension.

pub mod evaluator;
pub mod loader;
pub mod middleware;
pub mod resolver;
pub mod types;

pub use evaluator::{Decision, evaluate};
pub use loader::{LoaderError, PolicyDocumentLoader, RepoPolicyDocumentLoader, ViewerPolicyLoader};
pub use middleware::{Authenticated, PolicyLayer};
pub use resolver::{ParamError, resolve_scopes};
pub use types::{
    EndpointMetadata, PermissionScope, PolicyDocument, PolicyRule, RequestAction,
    ResolvedScopes, ResourceIdentifier, ResourceMatcher, Verb, VerbSet, admin_policy,
    developer_policy, viewer_policy,
};
