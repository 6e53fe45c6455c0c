use indoc::indoc;
use integration_tests::{MockUpstream, TestServer};

use super::rejection_body;

async fn gate(config: &str) -> TestServer {
    let upstream = MockUpstream::start().await;
    TestServer::builder().upstream(upstream).build(config).await
}

#[tokio::test]
async fn user_quota_exhaustion_returns_429() {
    let config = indoc! {r#"
        [server.rate_limits.users]
        default = { limit = 3 }
    "#};

    let server = gate(config).await;

    for remaining in ["2", "1", "0"] {
        let response = server.client.call_tool("u1", "viewer", "analyze_document").await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["x-ratelimit-remaining"], remaining);
    }

    let response = server.client.call_tool("u1", "viewer", "analyze_document").await;
    assert_eq!(response.status(), 429);

    let retry_after: u64 = response.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));

    insta::assert_json_snapshot!(rejection_body(response).await, @r#"
    {
      "dimension_key": "user:u1",
      "error": "rate_limit_exceeded",
      "limit": 3,
      "message": "Rate limit exceeded for 'user:u1': 3 requests per 60s",
      "status": 429,
      "window": 60
    }
    "#);

    assert_eq!(server.forwarded_calls(), 3);

    // Other users keep their own quota.
    let response = server.client.call_tool("u2", "viewer", "analyze_document").await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn role_tiers_select_the_user_quota() {
    let config = indoc! {r#"
        [server.rate_limits.users]
        default = { limit = 1 }
        admin = { limit = 3 }
    "#};

    let server = gate(config).await;

    let statuses = call_statuses(&server, "boss", "admin", "classify_document", 4).await;
    assert_eq!(statuses, [200, 200, 200, 429]);

    // Unknown roles are treated as the default role.
    let statuses = call_statuses(&server, "guest", "superuser", "classify_document", 2).await;
    assert_eq!(statuses, [200, 429]);
}

async fn call_statuses(server: &TestServer, user: &str, role: &str, tool: &str, count: usize) -> Vec<u16> {
    let mut statuses = Vec::with_capacity(count);

    for _ in 0..count {
        let response = server.client.call_tool(user, role, tool).await;
        statuses.push(response.status().as_u16());
    }

    statuses
}

#[tokio::test]
async fn tool_quota_is_shared_between_users() {
    let config = indoc! {r#"
        [server.rate_limits.tools]
        extract_invoice_data = { limit = 2 }
    "#};

    let server = gate(config).await;

    let alice = server.client.call_tool("alice", "analyst", "extract_invoice_data").await;
    let bob = server.client.call_tool("bob", "analyst", "extract_invoice_data").await;
    assert_eq!(alice.status(), 200);
    assert_eq!(bob.status(), 200);

    let carol = server.client.call_tool("carol", "analyst", "extract_invoice_data").await;
    assert_eq!(carol.status(), 429);

    let body = rejection_body(carol).await;
    assert_eq!(body["dimension_key"], "tool:extract_invoice_data");
    assert_eq!(body["limit"], 2);

    // The tool quota does not block other tools.
    let response = server.client.call_tool("carol", "analyst", "summarize_document").await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn percent_encoded_tool_names_share_the_tool_quota() {
    let config = indoc! {r#"
        [server.rate_limits.tools]
        create_fine_tuning_job = { limit = 1 }
    "#};

    let server = gate(config).await;

    let statuses = call_statuses(&server, "u1", "developer", "create_fine_tuning_job", 2).await;
    assert_eq!(statuses, [200, 429]);

    let statuses = call_statuses(&server, "u1", "developer", "create%5Ffine%5Ftuning%5Fjob", 3).await;
    assert_eq!(statuses, [429, 429, 429]);

    let response = server.client.call_tool("u2", "developer", "create_fine%5Ftuning_job").await;
    assert_eq!(rejection_body(response).await["dimension_key"], "tool:create_fine_tuning_job");

    assert_eq!(server.forwarded_calls(), 1);
}

#[tokio::test]
async fn unconfigured_tools_only_count_against_user_and_global() {
    let config = indoc! {r#"
        [server.rate_limits.users]
        default = { limit = 5 }

        [server.rate_limits.tools]
        ocr = { limit = 1 }
    "#};

    let server = gate(config).await;

    for _ in 0..3 {
        let response = server.client.call_tool("u1", "viewer", "translate_document").await;
        assert_eq!(response.status(), 200);
    }

    assert_eq!(server.client.call_tool("u1", "viewer", "ocr").await.status(), 200);
    assert_eq!(server.client.call_tool("u1", "viewer", "ocr").await.status(), 429);
}

#[tokio::test]
async fn global_quota_spans_all_users() {
    let config = indoc! {r#"
        [server.rate_limits.global]
        limit = 3
    "#};

    let server = gate(config).await;

    for user in ["a", "b", "c"] {
        assert_eq!(server.client.call_tool(user, "admin", "analyze_document").await.status(), 200);
    }

    let response = server.client.call_tool("d", "admin", "analyze_document").await;
    assert_eq!(response.status(), 429);
    assert_eq!(rejection_body(response).await["dimension_key"], "global");
}

#[tokio::test]
async fn resource_reads_have_their_own_quota() {
    let config = indoc! {r#"
        [server.rate_limits.resources.read]
        limit = 2
    "#};

    let server = gate(config).await;

    assert_eq!(server.client.read_resource("u1", "a.pdf").await.status(), 200);
    assert_eq!(server.client.read_resource("u2", "b.pdf").await.status(), 200);

    let response = server.client.read_resource("u3", "c.pdf").await;
    assert_eq!(response.status(), 429);
    assert_eq!(rejection_body(response).await["dimension_key"], "resource:read");

    // Tool calls are unaffected by the resource quota.
    assert_eq!(server.client.call_tool("u3", "viewer", "analyze_document").await.status(), 200);
}

#[tokio::test]
async fn short_window_frees_up() {
    let config = indoc! {r#"
        [server.rate_limits.users]
        default = { limit = 1, interval = "1s" }
    "#};

    let server = gate(config).await;

    assert_eq!(server.client.call_tool("u1", "viewer", "analyze_document").await.status(), 200);

    let response = server.client.call_tool("u1", "viewer", "analyze_document").await;
    assert_eq!(response.status(), 429);
    assert_eq!(response.headers()["retry-after"], "1");

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    assert_eq!(server.client.call_tool("u1", "viewer", "analyze_document").await.status(), 200);
}

#[tokio::test]
async fn disabled_rate_limits_forward_everything() {
    let config = indoc! {r#"
        [server.rate_limits]
        enabled = false

        [server.rate_limits.users]
        default = { limit = 1 }
    "#};

    let server = gate(config).await;

    for _ in 0..3 {
        let response = server.client.call_tool("u1", "viewer", "analyze_document").await;
        assert_eq!(response.status(), 200);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }

    assert_eq!(server.forwarded_calls(), 3);
}

#[tokio::test]
async fn concurrent_calls_never_exceed_the_quota() {
    let config = indoc! {r#"
        [server.rate_limits.users]
        default = { limit = 10 }
    "#};

    let server = gate(config).await;

    let mut tasks = tokio::task::JoinSet::new();

    for _ in 0..40 {
        let client = integration_tests::TestClient::new(format!("http://{}", server.address));

        tasks.spawn(async move { client.call_tool("u1", "viewer", "analyze_document").await.status().as_u16() });
    }

    let mut accepted = 0;

    while let Some(status) = tasks.join_next().await {
        if status.unwrap() == 200 {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 10);
    assert_eq!(server.forwarded_calls(), 10);
}
