//! Forwarding of admitted tool calls and resource reads to the upstream tool server.

use std::time::Duration;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use config::ClientIdentificationConfig;
use http::{HeaderMap, HeaderName, StatusCode, header};
use url::Url;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub(crate) enum ProxyError {
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        log::warn!("{self}");

        let body = serde_json::json!({
            "error": "bad_gateway",
            "error_description": "The upstream tool server could not be reached",
        });

        (StatusCode::BAD_GATEWAY, Json(body)).into_response()
    }
}

/// The tool server behind the gate.
#[derive(Clone)]
pub(crate) struct Upstream {
    client: reqwest::Client,
    base: Url,
    forwarded_headers: Vec<HeaderName>,
}

impl Upstream {
    pub fn new(base: Url, identification: &ClientIdentificationConfig) -> anyhow::Result<Self> {
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            anyhow::bail!("server.upstream_url must be an http or https URL, got '{base}'");
        }

        let client = reqwest::Client::builder().timeout(UPSTREAM_TIMEOUT).build()?;

        let mut forwarded_headers = vec![header::CONTENT_TYPE, header::ACCEPT];

        for name in [&identification.user_id_header, &identification.role_header] {
            forwarded_headers.push(HeaderName::try_from(name.as_str())?);
        }

        Ok(Self {
            client,
            base,
            forwarded_headers,
        })
    }

    /// The upstream URL for the given path segments, each percent-encoded as one segment.
    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base.clone();

        // Cannot-be-a-base URLs are rejected in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }

        url
    }

    fn forwarded(&self, headers: &HeaderMap) -> HeaderMap {
        let mut forwarded = HeaderMap::new();

        for name in &self.forwarded_headers {
            if let Some(value) = headers.get(name) {
                forwarded.insert(name.clone(), value.clone());
            }
        }

        forwarded
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, ProxyError> {
        let upstream = request.send().await?;
        let status = upstream.status();
        let content_type = upstream.headers().get(header::CONTENT_TYPE).cloned();
        let body = upstream.bytes().await?;

        let mut response = (status, body).into_response();

        if let Some(content_type) = content_type {
            response.headers_mut().insert(header::CONTENT_TYPE, content_type);
        }

        Ok(response)
    }
}

pub(crate) async fn invoke_tool(
    State(upstream): State<Upstream>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let url = upstream.url(["tools", name.as_str()]);
    log::debug!("Forwarding call of tool '{name}' to {url}");

    let request = upstream.client.post(url).headers(upstream.forwarded(&headers)).body(body);

    upstream.send(request).await
}

pub(crate) async fn read_resource(
    State(upstream): State<Upstream>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ProxyError> {
    let url = upstream.url(std::iter::once("resources").chain(path.split('/').filter(|s| !s.is_empty())));
    log::debug!("Forwarding resource read to {url}");

    let request = upstream.client.get(url).headers(upstream.forwarded(&headers));

    upstream.send(request).await
}
