//! Database pool wiring and the repository functions the API layers read
//! through.

use entity::{clusters, policies, projects, sessions};
use sea_orm::{
    ActiveModelTrait,
    ActiveValue::Set,
    ColumnTrait, Database, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    sea_query::OnConflict,
};
use thiserror::Error;
use uuid::Uuid;

/// Shared connection pool alias.
pub type DbPool = DatabaseConnection;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("DATABASE_URL missing")]
    MissingUrl,
    #[error(transparent)]
    Db(#[from] DbErr),
}

pub type DbResult<T> = Result<T, DbError>;

/// Environment-driven connection settings.
#[derive(Clone, Debug)]
pub struct DatabaseSettings {
    pub url: Option<String>,
}

impl DatabaseSettings {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("DATABASE_URL").ok(),
        }
    }
}

pub async fn connect(settings: &DatabaseSettings) -> DbResult<DbPool> {
    let url = settings.url.as_deref().ok_or(DbError::MissingUrl)?;
    Ok(Database::connect(url).await?)
}

pub async fn find_session(pool: &DbPool, id: Uuid) -> Result<Option<sessions::Model>, DbErr> {
    sessions::Entity::find_by_id(id).one(pool).await
}

/// Role/policy assignments for one caller in one project. The policy loader
/// reads this fresh on every request so revocation is immediate.
pub async fn policies_for_user_and_project(
    pool: &DbPool,
    user_id: i64,
    project_id: i64,
) -> Result<Vec<policies::Model>, DbErr> {
    policies::Entity::find()
        .filter(policies::Column::ProjectId.eq(project_id))
        .filter(policies::Column::UserId.eq(user_id))
        .all(pool)
        .await
}

pub async fn roles_for_project(
    pool: &DbPool,
    project_id: i64,
) -> Result<Vec<policies::Model>, DbErr> {
    policies::Entity::find()
        .filter(policies::Column::ProjectId.eq(project_id))
        .order_by_asc(policies::Column::UserId)
        .all(pool)
        .await
}

/// Create or replace the role assignment for (project, user).
pub async fn upsert_role(
    pool: &DbPool,
    project_id: i64,
    user_id: i64,
    kind: policies::RoleKind,
    document: Option<serde_json::Value>,
) -> Result<(), DbErr> {
    let model = policies::ActiveModel {
        project_id: Set(project_id),
        user_id: Set(user_id),
        kind: Set(kind),
        document: Set(document),
        ..Default::default()
    };
    policies::Entity::insert(model)
        .on_conflict(
            OnConflict::columns([policies::Column::ProjectId, policies::Column::UserId])
                .update_columns([policies::Column::Kind, policies::Column::Document])
                .to_owned(),
        )
        .exec(pool)
        .await?;
    Ok(())
}

pub async fn find_project(pool: &DbPool, id: i64) -> Result<Option<projects::Model>, DbErr> {
    projects::Entity::find_by_id(id).one(pool).await
}

pub async fn clusters_for_project(
    pool: &DbPool,
    project_id: i64,
) -> Result<Vec<clusters::Model>, DbErr> {
    clusters::Entity::find()
        .filter(clusters::Column::ProjectId.eq(project_id))
        .order_by_asc(clusters::Column::Id)
        .all(pool)
        .await
}

pub async fn find_cluster(
    pool: &DbPool,
    project_id: i64,
    cluster_id: i64,
) -> Result<Option<clusters::Model>, DbErr> {
    clusters::Entity::find_by_id(cluster_id)
        .filter(clusters::Column::ProjectId.eq(project_id))
        .one(pool)
        .await
}

pub async fn insert_cluster(
    pool: &DbPool,
    project_id: i64,
    name: String,
    server: String,
) -> Result<clusters::Model, DbErr> {
    let model = clusters::ActiveModel {
        project_id: Set(project_id),
        name: Set(name),
        server: Set(server),
        status: Set("created".to_string()),
        ..Default::default()
    };
    model.insert(pool).await
}

/// Returns whether a row was removed.
pub async fn delete_cluster(
    pool: &DbPool,
    project_id: i64,
    cluster_id: i64,
) -> Result<bool, DbErr> {
    let res = clusters::Entity::delete_many()
        .filter(clusters::Column::Id.eq(cluster_id))
        .filter(clusters::Column::ProjectId.eq(project_id))
        .exec(pool)
        .await?;
    Ok(res.rows_affected > 0)
}
