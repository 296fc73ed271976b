use reqwest::StatusCode;
use serde_json::{json, Value};

use super::helpers::TestServer;

#[tokio::test]
async fn test_health_from_loopback() {
    let server = TestServer::with_allow_list("127.0.0.1").await;

    let response = server.client.get(server.url("/health")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_caller_outside_allow_list_is_denied() {
    let server = TestServer::with_allow_list("10.0.0.0/8").await;

    let response = server.client.get(server.url("/health")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "error": "Access denied" }));
}

#[cfg(unix)]
#[tokio::test]
async fn test_denied_caller_never_runs_script() {
    let server = TestServer::with_allow_list("10.0.0.0/8").await;
    let marker = server.scripts.path().join("ran.marker");
    server.script("touch", &format!("touch '{}'", marker.display()));

    let response = server
        .client
        .get(server.url("/backup-validator/touch"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_forwarded_header_ignored_without_trust() {
    let server = TestServer::with_allow_list("10.0.0.0/8").await;

    let response = server
        .client
        .get(server.url("/health"))
        .header("X-Forwarded-For", "10.0.0.5")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
