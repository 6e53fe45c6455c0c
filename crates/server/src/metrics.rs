//! HTTP metrics middleware
//!
//! Records `http.server.request.duration` for every request reaching the gate,
//! tagged with the route template, method, status code and whether the
//! request was turned away by a quota.

use axum::{body::Body, extract::MatchedPath};
use http::{Request, Response, StatusCode};
use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use telemetry::metrics::{HTTP_SERVER_REQUEST_DURATION, Recorder};
use tower::Layer;

/// Layer for HTTP metrics tracking
#[derive(Clone, Default)]
pub(crate) struct MetricsLayer;

impl<Service> Layer<Service> for MetricsLayer
where
    Service: Send + Clone,
{
    type Service = MetricsService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        MetricsService { next }
    }
}

/// Service that tracks HTTP metrics
#[derive(Clone)]
pub(crate) struct MetricsService<Service> {
    next: Service,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for MetricsService<Service>
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
        // Route templates keep user ids and resource paths out of the attributes.
        let route = req
            .extensions()
            .get::<MatchedPath>()
            .map(|matched_path| matched_path.as_str().to_owned())
            .unwrap_or_else(|| "unknown".to_string());

        let mut next = self.next.clone();

        Box::pin(async move {
            let mut recorder = Recorder::new(HTTP_SERVER_REQUEST_DURATION);
            recorder.push_attribute("http.request.method", req.method().to_string());
            recorder.push_attribute("http.route", route);

            let response = next.call(req).await?;
            let status = response.status();

            recorder.push_attribute("http.response.status_code", i64::from(status.as_u16()));
            recorder.push_attribute("docgate.rate_limited", status == StatusCode::TOO_MANY_REQUESTS);
            recorder.record();

            Ok(response)
        })
    }
}
