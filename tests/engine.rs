//! Full-stack tests through `QerrorsEngine`: captured error in, structured
//! log + HTTP response + background analysis out.

use qerrors::config::Config;
use qerrors::engine::QerrorsEngine;
use qerrors::middleware::{CapturedError, HttpErrorContext};
use qerrors::severity::Severity;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(dir: &std::path::Path, endpoint: String) -> Config {
    let mut config = Config::default();
    config.log_dir = dir.to_str().unwrap().to_string();
    config.concurrency_limit = 2;
    config.model_endpoint = endpoint;
    config.model_api_key = Some("test-key".to_string());
    config.shutdown_grace = Duration::from_secs(2);
    config.analysis_item_timeout = Duration::from_secs(2);
    config
}

fn scratch_dir(label: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("qerrors-engine-it-{label}-{:?}", std::thread::current().id()))
}

#[tokio::test]
async fn http_error_gets_json_response_and_is_logged() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "{\"diagnosis\":\"d\",\"remediation\":\"r\"}"}}]
        })))
        .mount(&server)
        .await;

    let dir = scratch_dir("json");
    let engine = QerrorsEngine::new(test_config(&dir, server.uri())).unwrap();

    let error = CapturedError::new("DBError", "connection refused").with_severity(Severity::Critical);
    let response = engine
        .handle_error(error, Some(HttpErrorContext::default()))
        .await
        .expect("HTTP context present means a response is shaped");

    assert_eq!(response.content_type, "application/json");
    assert_eq!(response.status, 500);
    assert!(response.body.contains("connection refused"));

    engine.shutdown().await;
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn queued_error_is_analysed_and_reflected_in_metrics() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "{\"diagnosis\":\"leak\",\"remediation\":\"close it\"}"}}]
        })))
        .mount(&server)
        .await;

    let dir = scratch_dir("metrics");
    let engine = QerrorsEngine::new(test_config(&dir, server.uri())).unwrap();
    let metrics = engine.metrics();

    engine.handle_error(CapturedError::new("LeakError", "fd leak"), None).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let snapshot = metrics.snapshot(qerrors::circuit_breaker::CircuitState::Closed);
        if snapshot.counters.advice_cache_miss >= 1 {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("analysis did not complete within the deadline");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    engine.shutdown().await;
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn html_accept_header_gets_escaped_html_response() {
    let dir = scratch_dir("html");
    let engine = QerrorsEngine::new(test_config(&dir, "http://127.0.0.1:0".to_string())).unwrap();

    let error = CapturedError::new("ValidationError", "<script>bad</script>");
    let ctx = HttpErrorContext {
        accept: Some("text/html".to_string()),
        ..Default::default()
    };
    let response = engine.handle_error(error, Some(ctx)).await.unwrap();

    assert_eq!(response.content_type, "text/html; charset=utf-8");
    assert_eq!(response.status, 400);
    assert!(!response.body.contains("<script>"));
    assert!(response.body.contains("&lt;script&gt;"));

    engine.shutdown().await;
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn health_is_200_for_a_freshly_started_engine() {
    let dir = scratch_dir("health");
    let engine = QerrorsEngine::new(test_config(&dir, "http://127.0.0.1:0".to_string())).unwrap();

    let response = engine.http_surface().health().await;
    assert_eq!(response.status, 200);

    engine.shutdown().await;
    let _ = std::fs::remove_dir_all(&dir);
}
