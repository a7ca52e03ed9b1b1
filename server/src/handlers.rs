//! Business handlers behind the policy gate. Resource identity comes from
//! the [`ResolvedScopes`] extension the gate attached; handlers never
//! re-parse the path.

use anyhow::anyhow;
use axum::{Extension, Json, extract::State, http::StatusCode};
use entity::policies::RoleKind;
use platform_api::{ApiError, ApiResult};
use platform_authz::{PermissionScope, PolicyDocument, ResolvedScopes};
use serde::{Deserialize, Serialize};

use crate::http::AppState;

fn required_id(scopes: &ResolvedScopes, scope: PermissionScope) -> Result<i64, ApiError> {
    scopes
        .id_at(scope)
        .map(|id| id as i64)
        .ok_or_else(|| ApiError::internal(anyhow!("resolved chain missing {scope:?} id")))
}

fn required_name<'a>(
    scopes: &'a ResolvedScopes,
    scope: PermissionScope,
) -> Result<&'a str, ApiError> {
    scopes
        .name_at(scope)
        .ok_or_else(|| ApiError::internal(anyhow!("resolved chain missing {scope:?} name")))
}

#[derive(Serialize)]
pub struct ProjectResponse {
    pub id: i64,
    pub name: String,
}

pub async fn get_project(
    State(state): State<AppState>,
    Extension(scopes): Extension<ResolvedScopes>,
) -> ApiResult<Json<ProjectResponse>> {
    let project_id = required_id(&scopes, PermissionScope::Project)?;
    let project = platform_db::find_project(&state.pool, project_id)
        .await
        .map_err(|err| ApiError::internal(err.into()))?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(ProjectResponse {
        id: project.id,
        name: project.name,
    }))
}

#[derive(Serialize)]
pub struct ClusterResponse {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub server: String,
    pub status: String,
}

impl From<entity::clusters::Model> for ClusterResponse {
    fn from(model: entity::clusters::Model) -> Self {
        Self {
            id: model.id,
            project_id: model.project_id,
            name: model.name,
            server: model.server,
            status: model.status,
        }
    }
}

pub async fn list_clusters(
    State(state): State<AppState>,
    Extension(scopes): Extension<ResolvedScopes>,
) -> ApiResult<Json<Vec<ClusterResponse>>> {
    let project_id = required_id(&scopes, PermissionScope::Project)?;
    let clusters = platform_db::clusters_for_project(&state.pool, project_id)
        .await
        .map_err(|err| ApiError::internal(err.into()))?;
    Ok(Json(clusters.into_iter().map(Into::into).collect()))
}

#[derive(Deserialize)]
pub struct CreateClusterRequest {
    pub name: String,
    pub server: String,
}

pub async fn create_cluster(
    State(state): State<AppState>,
    Extension(scopes): Extension<ResolvedScopes>,
    Json(body): Json<CreateClusterRequest>,
) -> ApiResult<(StatusCode, Json<ClusterResponse>)> {
    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("cluster name must not be empty".into()));
    }
    let project_id = required_id(&scopes, PermissionScope::Project)?;
    let cluster = platform_db::insert_cluster(&state.pool, project_id, body.name, body.server)
        .await
        .map_err(|err| ApiError::internal(err.into()))?;
    Ok((StatusCode::CREATED, Json(cluster.into())))
}

pub async fn get_cluster(
    State(state): State<AppState>,
    Extension(scopes): Extension<ResolvedScopes>,
) -> ApiResult<Json<ClusterResponse>> {
    let project_id = required_id(&scopes, PermissionScope::Project)?;
    let cluster_id = required_id(&scopes, PermissionScope::Cluster)?;
    let cluster = platform_db::find_cluster(&state.pool, project_id, cluster_id)
        .await
        .map_err(|err| ApiError::internal(err.into()))?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(cluster.into()))
}

pub async fn delete_cluster(
    State(state): State<AppState>,
    Extension(scopes): Extension<ResolvedScopes>,
) -> ApiResult<StatusCode> {
    let project_id = required_id(&scopes, PermissionScope::Project)?;
    let cluster_id = required_id(&scopes, PermissionScope::Cluster)?;
    let removed = platform_db::delete_cluster(&state.pool, project_id, cluster_id)
        .await
        .map_err(|err| ApiError::internal(err.into()))?;
    if !removed {
        return Err(ApiError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct ApplicationResponse {
    pub project_id: i64,
    pub cluster: ClusterResponse,
    pub namespace: String,
    pub name: String,
}

pub async fn get_application(
    State(state): State<AppState>,
    Extension(scopes): Extension<ResolvedScopes>,
) -> ApiResult<Json<ApplicationResponse>> {
    let project_id = required_id(&scopes, PermissionScope::Project)?;
    let cluster_id = required_id(&scopes, PermissionScope::Cluster)?;
    let namespace = required_name(&scopes, PermissionScope::Namespace)?;
    let application = required_name(&scopes, PermissionScope::Application)?;
    let cluster = platform_db::find_cluster(&state.pool, project_id, cluster_id)
        .await
        .map_err(|err| ApiError::internal(err.into()))?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(ApplicationResponse {
        project_id,
        cluster: cluster.into(),
        namespace: namespace.to_string(),
        name: application.to_string(),
    }))
}

#[derive(Serialize)]
pub struct RoleResponse {
    pub user_id: i64,
    pub kind: RoleKind,
}

pub async fn list_roles(
    State(state): State<AppState>,
    Extension(scopes): Extension<ResolvedScopes>,
) -> ApiResult<Json<Vec<RoleResponse>>> {
    let project_id = required_id(&scopes, PermissionScope::Project)?;
    let roles = platform_db::roles_for_project(&state.pool, project_id)
        .await
        .map_err(|err| ApiError::internal(err.into()))?;
    Ok(Json(
        roles
            .into_iter()
            .map(|role| RoleResponse {
                user_id: role.user_id,
                kind: role.kind,
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
pub struct UpsertRoleRequest {
    pub user_id: i64,
    pub kind: RoleKind,
    pub document: Option<serde_json::Value>,
}

/// Create or replace a user's role assignment for the project. The next
/// request the assignee makes is evaluated against the new document.
pub async fn upsert_role(
    State(state): State<AppState>,
    Extension(scopes): Extension<ResolvedScopes>,
    Json(body): Json<UpsertRoleRequest>,
) -> ApiResult<Json<RoleResponse>> {
    let project_id = required_id(&scopes, PermissionScope::Project)?;
    match body.kind {
        RoleKind::Custom => {
            let Some(document) = &body.document else {
                return Err(ApiError::BadRequest(
                    "custom roles require a policy document".into(),
                ));
            };
            serde_json::from_value::<PolicyDocument>(document.clone()).map_err(|err| {
                ApiError::BadRequest(format!("invalid policy document: {err}"))
            })?;
        }
        _ if body.document.is_some() => {
            return Err(ApiError::BadRequest(
                "only custom roles accept a policy document".into(),
            ));
        }
        _ => {}
    }
    platform_db::upsert_role(
        &state.pool,
        project_id,
        body.user_id,
        body.kind,
        body.document,
    )
    .await
    .map_err(|err| ApiError::internal(err.into()))?;
    Ok(Json(RoleResponse {
        user_id: body.user_id,
        kind: body.kind,
    }))
}
