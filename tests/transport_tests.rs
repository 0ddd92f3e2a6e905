//! Integration tests for the retrying HTTP transport
//!
//! Each test runs against a local wiremock server; retry delays are 1ms.

use std::time::Duration;

use reqwest::Method;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sandbox_chat::transport::{RetryPolicy, TransportClient, TransportError};

fn client(base_url: &str) -> TransportClient {
    TransportClient::new(reqwest::Client::new(), base_url, "test")
        .with_retry(RetryPolicy::new(3, Duration::from_millis(1)))
        .with_timeout(Duration::from_secs(5))
}

/// Two server errors followed by a success take three attempts
#[tokio::test]
async fn test_server_errors_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/system/info"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/system/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hostname": "box"})))
        .expect(1)
        .mount(&server)
        .await;

    let value = client(&server.uri())
        .request(Method::GET, "/api/v1/system/info", None, None, None)
        .await
        .unwrap();

    assert_eq!(value, json!({"hostname": "box"}));
}

/// Server errors on every attempt surface the last status
#[tokio::test]
async fn test_retries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/exec"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server.uri())
        .request(Method::POST, "/api/v1/exec", Some(&json!({"command": "ls"})), None, None)
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(503));
    assert_eq!(err.attempts(), 3);
    assert!(err.to_string().contains("overloaded"));
}

/// Client errors are terminal on the first attempt
#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": {"message": "bad schema"}})))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server.uri())
        .request(Method::POST, "/chat/completions", Some(&json!({})), None, None)
        .await
        .unwrap_err();

    match err {
        TransportError::Status { status, attempts, body } => {
            assert_eq!(status, 400);
            assert_eq!(attempts, 1);
            assert!(body.contains("bad schema"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

/// A non-JSON body is wrapped as `{"content": ...}`
#[tokio::test]
async fn test_plain_text_body_is_wrapped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let value = client(&server.uri())
        .request(Method::GET, "/health", None, None, None)
        .await
        .unwrap();

    assert_eq!(value, json!({"content": "ok"}));
}

/// Refused connections are retried and reported as connection errors
#[tokio::test]
async fn test_unreachable_host_reports_connection_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let uri = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let err = client(&uri)
        .request(Method::GET, "/health", None, None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Connection { attempts: 3, .. }), "{err:?}");
}

/// A 2xx JSON body that does not parse is retried like a server error
#[tokio::test]
async fn test_undecodable_body_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/file/read"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{not json", "application/json"))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server.uri())
        .request(Method::POST, "/api/v1/file/read", Some(&json!({"path": "/a"})), None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Decode { attempts: 3, .. }), "{err:?}");
    assert_eq!(err.attempts(), 3);
    assert_eq!(err.status(), None);
}

/// A truncated body followed by a valid one succeeds on the retry
#[tokio::test]
async fn test_decode_failure_recovers_on_next_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/system/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{\"cpu\": 4", "application/json"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/system/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"cpu": 4})))
        .expect(1)
        .mount(&server)
        .await;

    let value = client(&server.uri())
        .request(Method::GET, "/api/v1/system/metrics", None, None, None)
        .await
        .unwrap();

    assert_eq!(value, json!({"cpu": 4}));
}
