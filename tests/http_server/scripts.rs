use std::time::Duration;

use backup_validator::bridge::RunnerConfig;
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::helpers::TestServer;

#[tokio::test]
async fn test_missing_script() {
    let server = TestServer::with_allow_list("127.0.0.1").await;

    let response = server
        .client
        .get(server.url("/backup-validator/ghost"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "error": "Script ghost not found" }));
}

#[tokio::test]
async fn test_traversal_name_rejected() {
    let server = TestServer::with_allow_list("127.0.0.1").await;

    let response = server
        .client
        .get(server.url("/backup-validator/..%2F..%2Fbin%2Fsh"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "error": "Invalid script name" }));
}

#[cfg(unix)]
#[tokio::test]
async fn test_get_success() {
    let server = TestServer::with_allow_list("127.0.0.1").await;
    server.script(
        "check",
        r#"[ "$1" = "--target=db1" ] || { echo "bad args: $*" >&2; exit 1; }
echo done"#,
    );

    let response = server
        .client
        .get(server.url("/backup-validator/check?target=db1"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "status": "success", "message": "done" }));
}

#[cfg(unix)]
#[tokio::test]
async fn test_post_success() {
    let server = TestServer::with_allow_list("127.0.0.1").await;
    server.script("echoargs", r#"echo "$@""#);

    let response = server
        .client
        .post(server.url("/backup-validator/echoargs"))
        .json(&json!({ "target": "db1", "full": true }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({ "status": "success", "message": "--target=db1 --full=true" })
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_password_never_echoed() {
    let server = TestServer::with_allow_list("127.0.0.1").await;
    server.script(
        "login",
        r#"echo "connecting with $1"
echo "password: hunter2""#,
    );

    let response = server
        .client
        .get(server.url("/backup-validator/login?password=hunter2"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let message = body["message"].as_str().unwrap();
    assert!(!message.contains("hunter2"), "leaked: {}", message);
    assert!(message.contains("--password=********"));
    assert!(message.contains("password: ********"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_failure_reports_stderr() {
    let server = TestServer::with_allow_list("127.0.0.1").await;
    server.script("broken", "echo partial; echo 'archive corrupt' >&2; exit 2");

    let response = server
        .client
        .get(server.url("/backup-validator/broken"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({ "status": "error", "message": "archive corrupt" })
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_timeout_is_reported() {
    let runner = RunnerConfig {
        timeout: Some(Duration::from_secs(1)),
        ..Default::default()
    };
    let server = TestServer::with_runner("127.0.0.1", runner).await;
    server.script("slow", "sleep 5");

    let response = server
        .client
        .get(server.url("/backup-validator/slow"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({ "status": "error", "message": "Script slow timed out after 1s" })
    );
}

#[tokio::test]
async fn test_post_requires_json() {
    let server = TestServer::with_allow_list("127.0.0.1").await;

    let response = server
        .client
        .post(server.url("/backup-validator/check"))
        .header("Content-Type", "text/plain")
        .body("target=db1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let response = server
        .client
        .post(server.url("/backup-validator/check"))
        .header("Content-Type", "application/json")
        .body("[1, 2, 3]")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
