//! End-to-end tests of the policy middleware: a real axum router, a gated
//! route, and interchangeable document loaders.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use axum::{
    Extension, Router,
    body::Body,
    handler::Handler,
    http::{Method, Request, StatusCode},
    routing::{get, post},
};
use http_body_util::BodyExt;
use platform_authz::{
    Authenticated, EndpointMetadata, LoaderError, PermissionScope, PolicyDocument,
    PolicyDocumentLoader, PolicyLayer, PolicyRule, RequestAction, ResolvedScopes,
    ResourceIdentifier, ResourceMatcher, Verb, VerbSet, ViewerPolicyLoader, admin_policy,
};
use tower::ServiceExt;

/// Loader returning a fixed document set, counting invocations.
#[derive(Clone)]
struct StaticLoader {
    documents: Vec<PolicyDocument>,
    calls: Arc<AtomicUsize>,
}

impl StaticLoader {
    fn new(documents: Vec<PolicyDocument>) -> Self {
        Self {
            documents,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl PolicyDocumentLoader for StaticLoader {
    async fn load_policy_documents(
        &self,
        _user_id: u64,
        _project_id: u64,
    ) -> Result<Vec<PolicyDocument>, LoaderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.documents.clone())
    }
}

struct FailingLoader;

#[async_trait]
impl PolicyDocumentLoader for FailingLoader {
    async fn load_policy_documents(
        &self,
        _user_id: u64,
        _project_id: u64,
    ) -> Result<Vec<PolicyDocument>, LoaderError> {
        Err(LoaderError::Storage(sea_orm::DbErr::Custom(
            "connection reset".to_string(),
        )))
    }
}

/// What the wrapped handler observed, if it ran at all.
type Seen = Arc<Mutex<Option<ResolvedScopes>>>;

fn gated_router(
    path: &str,
    method: Method,
    endpoint: EndpointMetadata,
    loader: Arc<dyn PolicyDocumentLoader>,
) -> (Router, Seen) {
    let seen: Seen = Arc::new(Mutex::new(None));
    let recorded = seen.clone();
    let handler = move |Extension(scopes): Extension<ResolvedScopes>| {
        let recorded = recorded.clone();
        async move {
            *recorded.lock().unwrap() = Some(scopes);
            StatusCode::OK
        }
    };
    let layered = handler.layer(PolicyLayer::new(endpoint, loader));
    let method_router = if method == Method::POST {
        post(layered)
    } else {
        get(layered)
    };
    (Router::new().route(path, method_router), seen)
}

fn authed_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .extension(Authenticated { user_id: 1 })
        .body(Body::empty())
        .expect("request")
}

async fn error_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn create_rule(scope: PermissionScope) -> PolicyRule {
    PolicyRule {
        scope,
        verbs: VerbSet::Verbs(BTreeSet::from([Verb::Create])),
        resource: ResourceMatcher::Wildcard,
    }
}

fn project_cluster_endpoint() -> EndpointMetadata {
    EndpointMetadata::new(
        Verb::Create,
        Method::POST,
        vec![PermissionScope::Project, PermissionScope::Cluster],
    )
}

#[tokio::test]
async fn allows_and_attaches_the_resolved_chain() {
    let loader = StaticLoader::new(vec![PolicyDocument {
        name: "cluster-creator".to_string(),
        rules: vec![
            create_rule(PermissionScope::Project),
            create_rule(PermissionScope::Cluster),
        ],
    }]);
    let (router, seen) = gated_router(
        "/api/projects/{project_id}/clusters/{cluster_id}",
        Method::POST,
        project_cluster_endpoint(),
        Arc::new(loader.clone()),
    );

    let response = router
        .oneshot(authed_request(Method::POST, "/api/projects/1/clusters/1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(loader.calls.load(Ordering::SeqCst), 1);

    let expected = ResolvedScopes(BTreeMap::from([
        (
            PermissionScope::Project,
            RequestAction {
                verb: Verb::Create,
                resource: ResourceIdentifier::Id(1),
            },
        ),
        (
            PermissionScope::Cluster,
            RequestAction {
                verb: Verb::Create,
                resource: ResourceIdentifier::Id(1),
            },
        ),
    ]));
    assert_eq!(seen.lock().unwrap().as_ref(), Some(&expected));
}

#[tokio::test]
async fn allows_the_full_application_chain() {
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
    let (router, seen) = gated_router(
        "/api/projects/{project_id}/clusters/{cluster_id}/namespaces/{namespace}/applications/{application}",
        Method::POST,
        endpoint,
        Arc::new(StaticLoader::new(vec![admin_policy()])),
    );

    let response = router
        .oneshot(authed_request(
            Method::POST,
            "/api/projects/1/clusters/1/namespaces/default/applications/app-1",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let seen = seen.lock().unwrap();
    let scopes = seen.as_ref().expect("handler ran");
    assert_eq!(
        scopes.get(PermissionScope::Namespace).unwrap().resource,
        ResourceIdentifier::Name("default".to_string())
    );
    assert_eq!(
        scopes.get(PermissionScope::Application).unwrap().resource,
        ResourceIdentifier::Name("app-1".to_string())
    );
}

#[tokio::test]
async fn denies_when_one_scope_lacks_a_rule() {
    // Create permitted at project scope only; the cluster level must fail the
    // whole chain.
    let loader = StaticLoader::new(vec![PolicyDocument {
        name: "project-only".to_string(),
        rules: vec![create_rule(PermissionScope::Project)],
    }]);
    let (router, seen) = gated_router(
        "/api/projects/{project_id}/clusters/{cluster_id}",
        Method::POST,
        project_cluster_endpoint(),
        Arc::new(loader),
    );

    let response = router
        .oneshot(authed_request(Method::POST, "/api/projects/1/clusters/1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        error_body(response).await,
        serde_json::json!({ "error": "Forbidden" })
    );
    assert!(seen.lock().unwrap().is_none(), "handler must not run");
}

#[tokio::test]
async fn loader_failure_is_an_opaque_internal_error() {
    let (router, seen) = gated_router(
        "/api/projects/{project_id}/clusters/{cluster_id}",
        Method::POST,
        project_cluster_endpoint(),
        Arc::new(FailingLoader),
    );

    let response = router
        .oneshot(authed_request(Method::POST, "/api/projects/1/clusters/1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        error_body(response).await,
        serde_json::json!({ "error": "An internal error occurred." })
    );
    assert!(seen.lock().unwrap().is_none(), "handler must not run");
}

#[tokio::test]
async fn bad_parameter_fails_before_the_loader_runs() {
    let loader = StaticLoader::new(vec![admin_policy()]);
    let (router, seen) = gated_router(
        "/api/projects/{project_id}/clusters/{cluster_id}",
        Method::POST,
        project_cluster_endpoint(),
        Arc::new(loader.clone()),
    );

    let response = router
        .oneshot(authed_request(
            Method::POST,
            "/api/projects/notuint/clusters/1",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        error_body(response).await,
        serde_json::json!({
            "error": "could not convert url parameter project_id to uint, got notuint"
        })
    );
    assert_eq!(loader.calls.load(Ordering::SeqCst), 0, "loader must not run");
    assert!(seen.lock().unwrap().is_none(), "handler must not run");
}

#[tokio::test]
async fn viewer_documents_allow_reads_and_deny_writes() {
    let read_endpoint = EndpointMetadata::new(
        Verb::Get,
        Method::GET,
        vec![PermissionScope::Project, PermissionScope::Cluster],
    );
    let (read_router, read_seen) = gated_router(
        "/api/projects/{project_id}/clusters/{cluster_id}",
        Method::GET,
        read_endpoint,
        Arc::new(ViewerPolicyLoader),
    );
    let response = read_router
        .oneshot(authed_request(Method::GET, "/api/projects/1/clusters/9"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(read_seen.lock().unwrap().is_some());

    let (write_router, write_seen) = gated_router(
        "/api/projects/{project_id}/clusters/{cluster_id}",
        Method::POST,
        project_cluster_endpoint(),
        Arc::new(ViewerPolicyLoader),
    );
    let response = write_router
        .oneshot(authed_request(Method::POST, "/api/projects/1/clusters/9"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(write_seen.lock().unwrap().is_none());
}

#[tokio::test]
async fn requests_without_identity_are_forbidden() {
    let (router, seen) = gated_router(
        "/api/projects/{project_id}/clusters/{cluster_id}",
        Method::POST,
        project_cluster_endpoint(),
        Arc::new(StaticLoader::new(vec![admin_policy()])),
    );

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/projects/1/clusters/1")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(seen.lock().unwrap().is_none(), "handler must not run");
}

#[tokio::test]
async fn identical_requests_get_identical_decisions() {
    let loader = Arc::new(StaticLoader::new(vec![PolicyDocument {
        name: "exact".to_string(),
        rules: vec![
            PolicyRule {
                scope: PermissionScope::Project,
                verbs: VerbSet::Wildcard,
                resource: ResourceMatcher::Exact(ResourceIdentifier::Id(1)),
            },
            PolicyRule {
                scope: PermissionScope::Cluster,
                verbs: VerbSet::Wildcard,
                resource: ResourceMatcher::Exact(ResourceIdentifier::Id(2)),
            },
        ],
    }]));
    let (router, _seen) = gated_router(
        "/api/projects/{project_id}/clusters/{cluster_id}",
        Method::POST,
        project_cluster_endpoint(),
        loader,
    );

    for _ in 0..2 {
        let allowed = router
            .clone()
            .oneshot(authed_request(Method::POST, "/api/projects/1/clusters/2"))
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);

        let denied = router
            .clone()
            .oneshot(authed_request(Method::POST, "/api/projects/1/clusters/3"))
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    }
}
