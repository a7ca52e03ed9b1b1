use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::Context as _;
use axum::{
    Json, Router,
    extract::{Request, State},
    handler::Handler,
    http::{self, HeaderName, HeaderValue, Method, StatusCode, header::AUTHORIZATION},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use platform_authz::{
    Authenticated, EndpointMetadata, PermissionScope, PolicyDocumentLoader, PolicyLayer,
    RepoPolicyDocumentLoader, Verb,
};
use platform_db::DbPool;
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

use crate::{config::AppConfig, handlers};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<AppConfig>,
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    addr: SocketAddr,
}

impl ServeConfig {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::from((host, port)),
        }
    }
}

pub async fn serve(config: ServeConfig, state: AppState) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;

    info!(%config.addr, "fleetdeck server listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    let allow_origin = if allowed.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed)
    };
    CorsLayer::new()
        .allow_credentials(true)
        .allow_headers([http::header::CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_origin(allow_origin)
}

pub fn build_router(state: AppState) -> Router {
    let request_id = MakeRequestUuid;
    let header_name = HeaderName::from_static("x-request-id");
    let loader: Arc<dyn PolicyDocumentLoader> =
        Arc::new(RepoPolicyDocumentLoader::new(state.pool.clone()));
    Router::new()
        .route("/health", get(health_handler))
        .merge(api_routes(&loader, state.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(header_name.clone(), request_id))
                .layer(PropagateRequestIdLayer::new(header_name))
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.cors_allowed_origins)),
        )
        .with_state(state)
}

/// The project-scoped API surface. Every route is gated by a [`PolicyLayer`]
/// carrying that endpoint's metadata; the authentication middleware wraps the
/// whole group so identity is attached before any policy check runs.
pub fn api_routes(loader: &Arc<dyn PolicyDocumentLoader>, state: AppState) -> Router<AppState> {
    use PermissionScope::{Application, Cluster, Namespace, Project};

    let project_scoped = |verb, method| EndpointMetadata::new(verb, method, vec![Project]);
    let cluster_scoped = |verb, method| EndpointMetadata::new(verb, method, vec![Project, Cluster]);
    let application_scoped = |verb, method| {
        EndpointMetadata::new(verb, method, vec![Project, Cluster, Namespace, Application])
    };

    Router::new()
        .route(
            "/api/projects/{project_id}",
            get(handlers::get_project
                .layer(PolicyLayer::new(project_scoped(Verb::Get, Method::GET), loader.clone()))),
        )
        .route(
            "/api/projects/{project_id}/roles",
            get(handlers::list_roles
                .layer(PolicyLayer::new(project_scoped(Verb::Get, Method::GET), loader.clone())))
            .post(handlers::upsert_role.layer(PolicyLayer::new(
                project_scoped(Verb::Update, Method::POST),
                loader.clone(),
            ))),
        )
        .route(
            "/api/projects/{project_id}/clusters",
            get(handlers::list_clusters
                .layer(PolicyLayer::new(project_scoped(Verb::List, Method::GET), loader.clone())))
            .post(handlers::create_cluster.layer(PolicyLayer::new(
                project_scoped(Verb::Create, Method::POST),
                loader.clone(),
            ))),
        )
        .route(
            "/api/projects/{project_id}/clusters/{cluster_id}",
            get(handlers::get_cluster
                .layer(PolicyLayer::new(cluster_scoped(Verb::Get, Method::GET), loader.clone())))
            .delete(handlers::delete_cluster.layer(PolicyLayer::new(
                cluster_scoped(Verb::Delete, Method::DELETE),
                loader.clone(),
            ))),
        )
        .route(
            "/api/projects/{project_id}/clusters/{cluster_id}/namespaces/{namespace}/applications/{application}",
            get(handlers::get_application.layer(PolicyLayer::new(
                application_scoped(Verb::Get, Method::GET),
                loader.clone(),
            ))),
        )
        .route_layer(middleware::from_fn_with_state(state, authenticate))
}

/// Resolve `Authorization: Bearer <session>` to a user and attach the
/// identity the policy gate reads. Expired sessions are rejected here.
async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, platform_api::ApiError> {
    use platform_api::ApiError;

    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;
    let session_id = Uuid::parse_str(token.trim()).map_err(|_| ApiError::Unauthorized)?;
    let session = platform_db::find_session(&state.pool, session_id)
        .await
        .map_err(|err| ApiError::internal(err.into()))?
        .ok_or(ApiError::Unauthorized)?;
    if session.expires_at.with_timezone(&Utc) < Utc::now() {
        return Err(ApiError::Unauthorized);
    }

    req.extensions_mut().insert(Authenticated {
        user_id: session.user_id as u64,
    });
    Ok(next.run(req).await)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state
        .pool
        .execute(Statement::from_string(
            DatabaseBackend::Postgres,
            "SELECT 1".to_string(),
        ))
        .await
        .is_ok();
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            ok: db_ok,
            db_ok,
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    db_ok: bool,
    version: &'static str,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        signal(SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    ctrl_c.await;

    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn auth_router() -> Router {
        let state = AppState {
            pool: DbPool::default(),
            config: Arc::new(AppConfig {
                cors_allowed_origins: Vec::new(),
            }),
        };
        Router::new()
            .route("/ping", get(|| async { StatusCode::NO_CONTENT }))
            .layer(middleware::from_fn_with_state(state, authenticate))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let response = auth_router()
            .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "error": "no authenticated user" })
        );
    }

    #[tokio::test]
    async fn non_bearer_scheme_is_unauthorized() {
        let response = auth_router()
            .oneshot(
                Request::get("/ping")
                    .header(AUTHORIZATION, "Basic dXNlcjpwdw==")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn garbled_session_token_is_unauthorized() {
        let response = auth_router()
            .oneshot(
                Request::get("/ping")
                    .header(AUTHORIZATION, "Bearer not-a-session")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn session_lookup_failure_is_masked() {
        // Well-formed token against a disconnected pool: the storage error
        // must surface as the generic internal message.
        let response = auth_router()
            .oneshot(
                Request::get("/ping")
                    .header(
                        AUTHORIZATION,
                        format!("Bearer {}", Uuid::nil()),
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "error": "An internal error occurred." })
        );
    }
}
