use async_trait::async_trait;
use entity::policies::{self, RoleKind};
use platform_db::DbPool;
use thiserror::Error;

use crate::types::{PolicyDocument, admin_policy, developer_policy, viewer_policy};

/// Failure while fetching applicable policy documents. Opaque to the caller
/// (the middleware responds with a generic 500); the cause is logged
/// server-side in full.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to read policy assignments: {0}")]
    Storage(#[from] sea_orm::DbErr),
    #[error("stored policy document is malformed: {0}")]
    Document(#[from] serde_json::Error),
}

/// Capability interface: fetch the policy documents that apply to one caller
/// in one project. Invoked exactly once per request, after scope resolution
/// and before evaluation; implementations must be safe for concurrent use.
#[async_trait]
pub trait PolicyDocumentLoader: Send + Sync {
    async fn load_policy_documents(
        &self,
        user_id: u64,
        project_id: u64,
    ) -> Result<Vec<PolicyDocument>, LoaderError>;
}

/// Production loader: reads the caller's role assignments for the project and
/// maps each to its document. Documents are loaded fresh per request, so a
/// revoked role takes effect on the next request.
#[derive(Clone)]
pub struct RepoPolicyDocumentLoader {
    pool: DbPool,
}

impl RepoPolicyDocumentLoader {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyDocumentLoader for RepoPolicyDocumentLoader {
    async fn load_policy_documents(
        &self,
        user_id: u64,
        project_id: u64,
    ) -> Result<Vec<PolicyDocument>, LoaderError> {
        let rows =
            platform_db::policies_for_user_and_project(&self.pool, user_id as i64, project_id as i64)
                .await?;
        rows.into_iter().map(document_for_role).collect()
    }
}

fn document_for_role(row: policies::Model) -> Result<PolicyDocument, LoaderError> {
    match row.kind {
        RoleKind::Admin => Ok(admin_policy()),
        RoleKind::Developer => Ok(developer_policy()),
        RoleKind::Viewer => Ok(viewer_policy()),
        RoleKind::Custom => {
            let document = row.document.unwrap_or(serde_json::Value::Null);
            Ok(serde_json::from_value(document)?)
        }
    }
}

/// Fixed read-only document source, independent of storage. Used for
/// viewer-role shortcuts and as a test double.
#[derive(Copy, Clone, Debug, Default)]
pub struct ViewerPolicyLoader;

#[async_trait]
impl PolicyDocumentLoader for ViewerPolicyLoader {
    async fn load_policy_documents(
        &self,
        _user_id: u64,
        _project_id: u64,
    ) -> Result<Vec<PolicyDocument>, LoaderError> {
        Ok(vec![viewer_policy()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::prelude::DateTimeWithTimeZone;

    fn row(kind: RoleKind, document: Option<serde_json::Value>) -> policies::Model {
        let epoch: DateTimeWithTimeZone = chrono::DateTime::from_timestamp(0, 0)
            .expect("valid timestamp")
            .into();
        policies::Model {
            id: 1,
            project_id: 1,
            user_id: 1,
            kind,
            document,
            created_at: epoch,
        }
    }

    #[test]
    fn builtin_kinds_map_to_builtin_documents() {
        assert_eq!(
            document_for_role(row(RoleKind::Viewer, None)).unwrap().name,
            "viewer"
        );
        assert_eq!(
            document_for_role(row(RoleKind::Admin, None)).unwrap().name,
            "admin"
        );
        assert_eq!(
            document_for_role(row(RoleKind::Developer, None))
                .unwrap()
                .name,
            "developer"
        );
    }

    #[test]
    fn custom_kind_decodes_stored_document() {
        let stored = serde_json::json!({
            "name": "release-bot",
            "rules": [
                { "scope": "project", "verbs": ["get"], "resource": "*" }
            ]
        });
        let doc = document_for_role(row(RoleKind::Custom, Some(stored))).unwrap();
        assert_eq!(doc.name, "release-bot");
        assert_eq!(doc.rules.len(), 1);
    }

    #[test]
    fn custom_kind_without_document_is_a_loader_error() {
        let err = document_for_role(row(RoleKind::Custom, None)).unwrap_err();
        assert!(matches!(err, LoaderError::Document(_)));
    }

    #[tokio::test]
    async fn viewer_loader_ignores_its_inputs() {
        let docs = ViewerPolicyLoader
            .load_policy_documents(7, 99)
            .await
            .unwrap();
        assert_eq!(docs, vec![viewer_policy()]);
    }
}
