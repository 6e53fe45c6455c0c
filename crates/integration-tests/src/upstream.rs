use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// A tool server that echoes what it receives and counts the calls.
#[derive(Clone)]
pub struct MockUpstream {
    address: SocketAddr,
    calls: Arc<AtomicUsize>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let calls = Arc::new(AtomicUsize::new(0));

        let app = Router::new()
            .route("/tools/{name}", post(invoke_tool))
            .route("/resources/{*path}", get(read_resource))
            .with_state(calls.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { address, calls }
    }

    pub fn url(&self) -> url::Url {
        format!("http://{}/", self.address).parse().unwrap()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn user(headers: &HeaderMap) -> Option<&str> {
    headers.get("x-user-id").and_then(|v| v.to_str().ok())
}

async fn invoke_tool(
    State(calls): State<Arc<AtomicUsize>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(arguments): Json<Value>,
) -> Json<Value> {
    calls.fetch_add(1, Ordering::SeqCst);

    Json(json!({
        "tool": name,
        "user": user(&headers),
        "arguments": arguments,
    }))
}

async fn read_resource(
    State(calls): State<Arc<AtomicUsize>>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Json<Value> {
    calls.fetch_add(1, Ordering::SeqCst);

    Json(json!({
        "resource": path,
        "user": user(&headers),
    }))
}
