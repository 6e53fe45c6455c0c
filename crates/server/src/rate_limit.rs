//! Rate limiting middleware for gated requests.
//!
//! Classifies the request as a tool call or a resource read, checks every
//! quota dimension of the caller, and either forwards the request with quota
//! headers or answers with 429 (quota exceeded) or 503 (fail-closed storage
//! failure).

use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{
    Json,
    body::Body,
    extract::{FromRequestParts, Path, rejection::PathRejection},
    response::{IntoResponse, Response},
};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, header::RETRY_AFTER, request::Parts};
use rate_limit::{QuotaExceeded, RateLimitError, RateLimitManager, RateLimitRequest, RateLimitStatus};
use tower::Layer;

use crate::client_identification::CallerIdentity;

pub(crate) const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub(crate) const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub(crate) const X_RATELIMIT_WINDOW: HeaderName = HeaderName::from_static("x-ratelimit-window");

#[derive(Clone)]
pub(crate) struct RateLimitLayer(Arc<RateLimitManager>);

impl RateLimitLayer {
    pub fn new(manager: Arc<RateLimitManager>) -> Self {
        Self(manager)
    }
}

impl<Service> Layer<Service> for RateLimitLayer
where
    Service: Send + Clone,
{
    type Service = RateLimitService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        RateLimitService {
            next,
            manager: self.0.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct RateLimitService<Service> {
    next: Service,
    manager: Arc<RateLimitManager>,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for RateLimitService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();
        let manager = self.manager.clone();

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();

            let Some(identity) = parts.extensions.get::<CallerIdentity>().cloned() else {
                log::error!("Gated request reached the rate limiter without a caller identity");
                return Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response());
            };

            let tool = match tool_name(&mut parts).await {
                Ok(tool) => tool,
                Err(rejection) => return Ok(rejection.into_response()),
            };

            let rate_limit_request = classify(&parts.method, parts.uri.path(), tool, identity);
            let req = Request::from_parts(parts, body);

            match manager.check_request(&rate_limit_request).await {
                Ok(status) => {
                    let mut response = next.call(req).await?;

                    if let Some(status) = status {
                        insert_quota_headers(response.headers_mut(), &status);
                    }

                    Ok(response)
                }
                Err(RateLimitError::QuotaExceeded(exceeded)) => {
                    log::debug!("Request by '{}' rejected: {exceeded}", rate_limit_request.user_id);
                    Ok(too_many_requests(&exceeded))
                }
                Err(error @ RateLimitError::StoreUnavailable { .. }) => Ok(service_unavailable(&error)),
            }
        })
    }
}

/// The `{name}` of a matched `POST /tools/{name}` route, percent-decoded
/// exactly as the proxy handler receives it.
///
/// Requires the layer to be installed with `route_layer`, so the route is
/// matched before the quota check.
async fn tool_name(parts: &mut Parts) -> Result<Option<String>, PathRejection> {
    if parts.method != Method::POST || !parts.uri.path().starts_with("/tools/") {
        return Ok(None);
    }

    let Path(name) = Path::<String>::from_request_parts(parts, &()).await?;

    Ok(Some(name))
}

/// Builds the rate limit request for a gated route.
///
/// A request with a tool name is a call of that tool; `GET /resources/...` is
/// a resource read. Anything else only counts against the global and user quotas.
fn classify(method: &Method, path: &str, tool: Option<String>, identity: CallerIdentity) -> RateLimitRequest {
    let builder = RateLimitRequest::builder(identity.user_id).role(identity.role);

    if let Some(tool) = tool.filter(|tool| !tool.is_empty()) {
        return builder.tool(tool).build();
    }

    if *method == Method::GET && path.starts_with("/resources/") {
        return builder.resource_read().build();
    }

    builder.build()
}

fn insert_quota_headers(headers: &mut HeaderMap, status: &RateLimitStatus) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(status.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(status.remaining));
    headers.insert(X_RATELIMIT_WINDOW, HeaderValue::from(status.window_secs()));
}

fn too_many_requests(exceeded: &QuotaExceeded) -> Response<Body> {
    let retry_after = exceeded.retry_after_secs();

    let body = serde_json::json!({
        "error": "rate_limit_exceeded",
        "message": exceeded.to_string(),
        "status": StatusCode::TOO_MANY_REQUESTS.as_u16(),
        "limit": exceeded.limit,
        "window": exceeded.window_secs(),
        "retry_after": retry_after,
        "dimension_key": exceeded.dimension,
    });

    (
        StatusCode::TOO_MANY_REQUESTS,
        [(RETRY_AFTER, HeaderValue::from(retry_after))],
        Json(body),
    )
        .into_response()
}

fn service_unavailable(error: &RateLimitError) -> Response<Body> {
    let dimension = match error {
        RateLimitError::StoreUnavailable { dimension, .. } => Some(dimension.as_str()),
        RateLimitError::QuotaExceeded(_) => None,
    };

    let body = serde_json::json!({
        "error": "rate_limit_unavailable",
        "message": "Rate limits cannot be verified right now",
        "status": StatusCode::SERVICE_UNAVAILABLE.as_u16(),
        "dimension_key": dimension,
    });

    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{Router, routing::post};
    use config::{RateLimitConfig, RateLimitQuota, UserRole};
    use rate_limit::{Operation, StorageError};
    use tower::ServiceExt;

    use super::*;

    fn caller() -> CallerIdentity {
        CallerIdentity {
            user_id: "u1".to_string(),
            role: UserRole::Analyst,
        }
    }

    #[test]
    fn tool_calls_are_classified_by_name() {
        let tool = Some("extract_invoice_data".to_string());
        let request = classify(&Method::POST, "/tools/extract_invoice_data", tool, caller());

        assert_eq!(request.operation, Some(Operation::Tool("extract_invoice_data".to_string())));
        assert_eq!(request.user_id, "u1");
        assert_eq!(request.role, UserRole::Analyst);
    }

    #[test]
    fn resource_reads_are_classified() {
        let request = classify(&Method::GET, "/resources/invoices/2024/07.pdf", None, caller());
        assert_eq!(request.operation, Some(Operation::ResourceRead));
    }

    #[test]
    fn other_requests_have_no_operation() {
        assert_eq!(classify(&Method::GET, "/tools/analyze_document", None, caller()).operation, None);
        assert_eq!(classify(&Method::POST, "/tools/", Some(String::new()), caller()).operation, None);
        assert_eq!(classify(&Method::DELETE, "/resources/a", None, caller()).operation, None);
    }

    async fn gated_tools(config: &RateLimitConfig) -> Router {
        let manager = Arc::new(RateLimitManager::new(config).await);

        Router::new()
            .route("/tools/{name}", post(|Path(name): Path<String>| async move { name }))
            .route_layer(RateLimitLayer::new(manager))
    }

    fn tool_call(uri: &str) -> Request<Body> {
        let mut request = Request::post(uri).body(Body::empty()).unwrap();
        request.extensions_mut().insert(caller());
        request
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn percent_encoded_tool_names_count_against_the_decoded_tool() {
        let mut config = RateLimitConfig::default();
        config.tools = [("create_fine_tuning_job".to_string(), RateLimitQuota::new(1))].into();

        let router = gated_tools(&config).await;

        let response = router.clone().oneshot(tool_call("/tools/create_fine_tuning_job")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "create_fine_tuning_job");

        let response = router.oneshot(tool_call("/tools/create%5Ffine%5Ftuning%5Fjob")).await.unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["dimension_key"], "tool:create_fine_tuning_job");
    }

    #[tokio::test]
    async fn requests_without_identity_are_refused() {
        let router = gated_tools(&RateLimitConfig::default()).await;
        let request = Request::post("/tools/ocr").body(Body::empty()).unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn rejection_body_and_retry_after() {
        let exceeded = QuotaExceeded {
            dimension: "tool:extract_invoice_data".to_string(),
            limit: 50,
            window: Duration::from_secs(60),
            retry_after: Duration::from_millis(41_200),
        };

        let response = too_many_requests(&exceeded);

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "42");

        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();

        insta::assert_json_snapshot!(body, @r#"
        {
          "dimension_key": "tool:extract_invoice_data",
          "error": "rate_limit_exceeded",
          "limit": 50,
          "message": "Rate limit exceeded for 'tool:extract_invoice_data': 50 requests per 60s",
          "retry_after": 42,
          "status": 429,
          "window": 60
        }
        "#);
    }

    #[tokio::test]
    async fn fail_closed_store_failure_is_unavailable() {
        let error = RateLimitError::StoreUnavailable {
            dimension: "tool:create_fine_tuning_job".to_string(),
            source: StorageError::Timeout(Duration::from_millis(250)),
        };

        let response = service_unavailable(&error);

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get(RETRY_AFTER).is_none());

        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();

        insta::assert_json_snapshot!(body, @r#"
        {
          "dimension_key": "tool:create_fine_tuning_job",
          "error": "rate_limit_unavailable",
          "message": "Rate limits cannot be verified right now",
          "status": 503
        }
        "#);
    }

    #[test]
    fn quota_headers() {
        let mut headers = HeaderMap::new();

        insert_quota_headers(
            &mut headers,
            &RateLimitStatus {
                limit: 100,
                remaining: 97,
                window: Duration::from_secs(60),
            },
        );

        assert_eq!(headers[X_RATELIMIT_LIMIT], "100");
        assert_eq!(headers[X_RATELIMIT_REMAINING], "97");
        assert_eq!(headers[X_RATELIMIT_WINDOW], "60");
    }

    #[test]
    fn sub_second_window_header_rounds_up() {
        let mut headers = HeaderMap::new();

        insert_quota_headers(
            &mut headers,
            &RateLimitStatus {
                limit: 2,
                remaining: 1,
                window: Duration::from_millis(500),
            },
        );

        assert_eq!(headers[X_RATELIMIT_WINDOW], "1");
    }
}
