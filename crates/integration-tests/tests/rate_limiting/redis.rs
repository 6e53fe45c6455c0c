//! Gates sharing one Redis server. Run with `REDIS_URL` set and `--ignored`.

use integration_tests::{MockUpstream, TestServer};

use super::rejection_body;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/0".to_string())
}

fn shared_config(key_prefix: &str, extra: &str) -> String {
    format!(
        r#"
        [server.rate_limits.storage]
        type = "redis"
        url = "{url}"
        key_prefix = "{key_prefix}"

        {extra}
        "#,
        url = redis_url(),
    )
}

async fn gate(config: &str) -> TestServer {
    let upstream = MockUpstream::start().await;
    TestServer::builder().upstream(upstream).build(config).await
}

#[tokio::test]
#[ignore = "needs a Redis server"]
async fn user_quota_is_shared_between_instances() {
    let prefix = format!("docgate-test:{}:", uuid::Uuid::new_v4().simple());
    let config = shared_config(
        &prefix,
        r#"
        [server.rate_limits.users]
        default = { limit = 4 }
        "#,
    );

    let first = gate(&config).await;
    let second = gate(&config).await;

    let health: serde_json::Value = first.client.get("/health").await.json().await.unwrap();
    assert_eq!(health["rate_limit_storage"]["backend"], "redis");
    assert_eq!(health["rate_limit_storage"]["shared"], true);

    for server in [&first, &second, &first, &second] {
        let response = server.client.call_tool("u1", "viewer", "analyze_document").await;
        assert_eq!(response.status(), 200);
    }

    let response = second.client.call_tool("u1", "viewer", "analyze_document").await;
    assert_eq!(response.status(), 429);
    assert_eq!(rejection_body(response).await["dimension_key"], "user:u1");

    let snapshot = first.client.rate_limit_snapshot("u1", "viewer").await;
    assert_eq!(snapshot["limit"], 4);
    assert_eq!(snapshot["remaining"], 0);
}

#[tokio::test]
#[ignore = "needs a Redis server"]
async fn concurrent_calls_across_instances_never_exceed_the_tool_quota() {
    let prefix = format!("docgate-test:{}:", uuid::Uuid::new_v4().simple());
    let config = shared_config(
        &prefix,
        r#"
        [server.rate_limits.tools]
        extract_invoice_data = { limit = 6 }
        "#,
    );

    let first = gate(&config).await;
    let second = gate(&config).await;

    let mut tasks = tokio::task::JoinSet::new();

    for i in 0..30 {
        let address = if i % 2 == 0 { first.address } else { second.address };
        let client = integration_tests::TestClient::new(format!("http://{address}"));
        let user = format!("user-{i}");

        tasks.spawn(async move {
            client
                .call_tool(&user, "analyst", "extract_invoice_data")
                .await
                .status()
                .as_u16()
        });
    }

    let mut accepted = 0;

    while let Some(status) = tasks.join_next().await {
        if status.unwrap() == 200 {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 6);
    assert_eq!(first.forwarded_calls() + second.forwarded_calls(), 6);
}
