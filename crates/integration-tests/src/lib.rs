//! Harness for end-to-end tests of the gate: a real server on a random port,
//! an HTTP client for it, and a mock tool server behind it.

mod upstream;

use std::{net::SocketAddr, sync::Once, time::Duration};

use config::Config;
use server::ServeConfig;
use tokio::{net::TcpListener, time::timeout};

pub use upstream::MockUpstream;

static INIT: Once = Once::new();

fn init_crypto_provider() {
    INIT.call_once(|| {
        rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .expect("Failed to install default crypto provider");
    });
}

/// Test client for making HTTP requests to the test server
pub struct TestClient {
    base_url: String,
    client: reqwest::Client,
}

impl TestClient {
    /// Create a new test client for the given base URL
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Start a request to the given path
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client.request(method, format!("{}{}", self.base_url, path))
    }

    /// Send a GET request to the given path
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.request(reqwest::Method::GET, path).send().await.unwrap()
    }

    /// Call a tool as the given user
    pub async fn call_tool(&self, user_id: &str, role: &str, tool: &str) -> reqwest::Response {
        self.request(reqwest::Method::POST, &format!("/tools/{tool}"))
            .header("X-User-Id", user_id)
            .header("X-User-Role", role)
            .json(&serde_json::json!({ "document_id": "doc-1" }))
            .send()
            .await
            .unwrap()
    }

    /// Read a resource as the given user
    pub async fn read_resource(&self, user_id: &str, path: &str) -> reqwest::Response {
        self.request(reqwest::Method::GET, &format!("/resources/{path}"))
            .header("X-User-Id", user_id)
            .send()
            .await
            .unwrap()
    }

    /// Fetch the quota snapshot of the given user
    pub async fn rate_limit_snapshot(&self, user_id: &str, role: &str) -> serde_json::Value {
        self.request(reqwest::Method::GET, "/rate-limit")
            .header("X-User-Id", user_id)
            .header("X-User-Role", role)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

/// Builder for a [`TestServer`].
#[derive(Default)]
pub struct TestServerBuilder {
    upstream: Option<MockUpstream>,
}

impl TestServerBuilder {
    /// Put a mock tool server behind the gate.
    pub fn upstream(mut self, upstream: MockUpstream) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Start the gate with the given TOML configuration
    pub async fn build(self, config_toml: &str) -> TestServer {
        init_crypto_provider();

        let mut config: Config = toml::from_str(config_toml).unwrap();
        config.validate().unwrap();

        if let Some(upstream) = &self.upstream {
            config.server.upstream_url = Some(upstream.url());
        }

        TestServer::start(config, self.upstream).await
    }
}

/// Test server that manages the lifecycle of a server instance
pub struct TestServer {
    pub client: TestClient,
    pub address: SocketAddr,
    pub upstream: Option<MockUpstream>,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Create a builder for a test server
    pub fn builder() -> TestServerBuilder {
        TestServerBuilder::default()
    }

    async fn start(config: Config, upstream: Option<MockUpstream>) -> Self {
        // Find an available port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let serve_config = ServeConfig {
            listen_address: address,
            config,
        };

        let (tx, mut rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            // Drop the listener so the server can bind to the address
            drop(listener);

            let _ = tx.send(server::serve(serve_config).await);
        });

        tokio::time::sleep(Duration::from_millis(100)).await;

        if let Ok(Err(e)) = rx.try_recv() {
            eprintln!("Server failed to start: {e}");
            std::process::exit(1);
        }

        let client = TestClient::new(format!("http://{address}"));

        // Verify the server is actually running by making a simple request
        for _ in 0..10 {
            if timeout(Duration::from_millis(100), client.request(reqwest::Method::GET, "/").send())
                .await
                .is_ok_and(|response| response.is_ok())
            {
                break;
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestServer {
            client,
            address,
            upstream,
            _handle: handle,
        }
    }

    /// Calls that reached the mock tool server.
    pub fn forwarded_calls(&self) -> usize {
        self.upstream.as_ref().map_or(0, MockUpstream::calls)
    }
}
