use std::{
    collections::HashMap,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{
    body::Body,
    extract::{FromRequestParts, RawPathParams},
    http::Request,
    response::{IntoResponse, Response},
};
use platform_api::ApiError;
use tower::{Layer, Service};

use crate::{
    evaluator::{Decision, evaluate},
    loader::PolicyDocumentLoader,
    resolver::resolve_scopes,
    types::EndpointMetadata,
};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Caller identity attached to the request by the upstream authentication
/// middleware. The policy gate refuses requests that arrive without it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Authenticated {
    pub user_id: u64,
}

/// Per-route authorization gate.
///
/// For each request: resolve the endpoint's scope chain from URL parameters,
/// load the caller's policy documents, evaluate, and on Allow attach the
/// resolved [`ResolvedScopes`](crate::types::ResolvedScopes) extension and
/// call the inner service exactly once. Every failure short-circuits with a
/// JSON error response and the inner service never runs:
/// bad parameter → 400, loader failure → 500, denied chain → 403.
#[derive(Clone)]
pub struct PolicyLayer {
    endpoint: Arc<EndpointMetadata>,
    loader: Arc<dyn PolicyDocumentLoader>,
}

impl PolicyLayer {
    pub fn new(endpoint: EndpointMetadata, loader: Arc<dyn PolicyDocumentLoader>) -> Self {
        Self {
            endpoint: Arc::new(endpoint),
            loader,
        }
    }
}

impl<S> Layer<S> for PolicyLayer {
    type Service = PolicyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PolicyService {
            inner,
            endpoint: self.endpoint.clone(),
            loader: self.loader.clone(),
        }
    }
}

#[derive(Clone)]
pub struct PolicyService<S> {
    inner: S,
    endpoint: Arc<EndpointMetadata>,
    loader: Arc<dyn PolicyDocumentLoader>,
}

impl<S> Service<Request<Body>> for PolicyService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // Take the ready service, leave a clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let endpoint = self.endpoint.clone();
        let loader = self.loader.clone();

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();

            let mut params = HashMap::new();
            if let Ok(raw) = RawPathParams::from_request_parts(&mut parts, &()).await {
                for (name, value) in raw.iter() {
                    params.insert(name.to_string(), value.to_string());
                }
            }

            let scopes = match resolve_scopes(&endpoint, &params) {
                Ok(scopes) => scopes,
                Err(err) => {
                    return Ok(ApiError::BadRequest(err.to_string()).into_response());
                }
            };

            let Some(Authenticated { user_id }) = parts.extensions.get::<Authenticated>().copied()
            else {
                tracing::warn!("request reached the policy gate without an identity");
                return Ok(ApiError::Forbidden.into_response());
            };
            let Some(project_id) = scopes.project_id() else {
                tracing::warn!("endpoint metadata declares no project scope");
                return Ok(ApiError::Forbidden.into_response());
            };

            let documents = match loader.load_policy_documents(user_id, project_id).await {
                Ok(documents) => documents,
                Err(err) => {
                    return Ok(ApiError::internal(err.into()).into_response());
                }
            };

            if evaluate(&scopes, &documents) == Decision::Deny {
                return Ok(ApiError::Forbidden.into_response());
            }

            parts.extensions.insert(scopes);
            inner.call(Request::from_parts(parts, body)).await
        })
    }
}
