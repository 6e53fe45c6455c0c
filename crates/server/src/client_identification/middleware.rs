//! Caller identification middleware.
//!
//! Reads the caller identity from request headers and stores it in the request
//! extensions for the rate limiter and the introspection endpoint. Requests
//! without a usable user id are rejected before any quota is consumed.

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
    response::{IntoResponse, Response},
};
use config::ClientIdentificationConfig;
use http::{Request, StatusCode};
use tower::Layer;

use crate::client_identification::extract_caller_identity;

#[derive(Clone)]
pub(crate) struct ClientIdentificationLayer(Arc<ClientIdentificationConfig>);

impl ClientIdentificationLayer {
    pub fn new(config: ClientIdentificationConfig) -> Self {
        Self(Arc::new(config))
    }
}

impl<Service> Layer<Service> for ClientIdentificationLayer
where
    Service: Send + Clone,
{
    type Service = ClientIdentificationService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        ClientIdentificationService {
            next,
            config: self.0.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct ClientIdentificationService<Service> {
    next: Service,
    config: Arc<ClientIdentificationConfig>,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for ClientIdentificationService<Service>
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
        let config = self.config.clone();

        Box::pin(async move {
            match extract_caller_identity(&req, &config) {
                Ok(identity) => {
                    let (mut parts, body) = req.into_parts();
                    parts.extensions.insert(identity);

                    next.call(Request::from_parts(parts, body)).await
                }
                Err(error) => {
                    log::debug!("Rejecting unidentified request to {}: {error}", req.uri().path());

                    let body = serde_json::json!({
                        "error": "bad_request",
                        "error_description": error.to_string(),
                    });

                    Ok((StatusCode::BAD_REQUEST, Json(body)).into_response())
                }
            }
        })
    }
}
