mod memory;
mod redis;

/// The 429 body without `retry_after`, which depends on timing.
async fn rejection_body(response: reqwest::Response) -> serde_json::Value {
    let mut body: serde_json::Value = response.json().await.unwrap();

    let retry_after = body
        .as_object_mut()
        .and_then(|body| body.remove("retry_after"))
        .and_then(|value| value.as_u64())
        .unwrap();

    assert!((1..=60).contains(&retry_after), "retry_after out of range: {retry_after}");

    body
}
