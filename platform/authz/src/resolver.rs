use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::types::{
    EndpointMetadata, PermissionScope, RequestAction, ResolvedScopes, ResourceIdentifier,
};

/// Malformed URL parameter. Caller-induced; the middleware maps it to a 400
/// without touching policy storage.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("could not convert url parameter {param} to uint, got {value}")]
pub struct ParamError {
    pub param: &'static str,
    pub value: String,
}

/// Build the ordered action chain for an endpoint from its URL parameters.
///
/// Parameters are read in the exact order the endpoint declares its scopes;
/// resolution is all-or-nothing, so the first unparsable numeric parameter
/// fails the whole request. A missing parameter resolves to the empty string,
/// which numeric scopes reject through the same parse path.
pub fn resolve_scopes(
    endpoint: &EndpointMetadata,
    params: &HashMap<String, String>,
) -> Result<ResolvedScopes, ParamError> {
    let mut chain = BTreeMap::new();
    for &scope in &endpoint.scopes {
        let param = scope.url_param();
        let raw = params.get(param).map(String::as_str).unwrap_or("");
        let resource = if scope.is_numeric() {
            let id = raw.parse::<u64>().map_err(|_| ParamError {
                param,
                value: raw.to_string(),
            })?;
            ResourceIdentifier::Id(id)
        } else {
            ResourceIdentifier::Name(raw.to_string())
        };
        chain.insert(
            scope,
            RequestAction {
                verb: endpoint.verb,
                resource,
            },
        );
    }
    Ok(ResolvedScopes(chain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Verb;
    use axum::http::Method;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn resolves_numeric_and_name_scopes_in_order() {
        let endpoint = EndpointMetadata::new(
            Verb::Create,
            Method::POST,
            vec![
                PermissionScope::Project,
                PermissionScope::Cluster,
                PermissionScope::Namespace,
                PermissionScope::Application,
            ],
        );
        let resolved = resolve_scopes(
            &endpoint,
            &params(&[
                ("project_id", "1"),
                ("cluster_id", "42"),
                ("namespace", "default"),
                ("application", "app-1"),
            ]),
        )
        .unwrap();

        let scopes: Vec<_> = resolved.0.keys().copied().collect();
        assert_eq!(
            scopes,
            vec![
                PermissionScope::Project,
                PermissionScope::Cluster,
                PermissionScope::Namespace,
                PermissionScope::Application,
            ]
        );
        assert_eq!(
            resolved.get(PermissionScope::Cluster).unwrap().resource,
            ResourceIdentifier::Id(42)
        );
        assert_eq!(
            resolved.get(PermissionScope::Application).unwrap().resource,
            ResourceIdentifier::Name("app-1".to_string())
        );
        assert!(
            resolved
                .0
                .values()
                .all(|action| action.verb == Verb::Create)
        );
    }

    #[test]
    fn bad_numeric_parameter_carries_name_and_raw_value() {
        let endpoint = EndpointMetadata::new(
            Verb::Create,
            Method::POST,
            vec![PermissionScope::Project, PermissionScope::Cluster],
        );
        let err = resolve_scopes(
            &endpoint,
            &params(&[("project_id", "notuint"), ("cluster_id", "1")]),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not convert url parameter project_id to uint, got notuint"
        );
    }

    #[test]
    fn missing_numeric_parameter_fails_resolution() {
        let endpoint =
            EndpointMetadata::new(Verb::Get, Method::GET, vec![PermissionScope::Project]);
        let err = resolve_scopes(&endpoint, &params(&[])).unwrap_err();
        assert_eq!(err.param, "project_id");
        assert_eq!(err.value, "");
    }

    #[test]
    fn negative_numbers_are_not_uints() {
        let endpoint =
            EndpointMetadata::new(Verb::Get, Method::GET, vec![PermissionScope::Project]);
        let err = resolve_scopes(&endpoint, &params(&[("project_id", "-1")])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not convert url parameter project_id to uint, got -1"
        );
    }
}
