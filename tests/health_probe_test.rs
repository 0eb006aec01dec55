//! Health prober against a mock service
//!
//! The mock answers the way the FindMyRepo API does: `{"status": "healthy", "services": {...}}`.

use findmyrepo_boot::{HealthCheckPolicy, HealthProber, HealthStatus};
use mockito::Server;
use std::time::Duration;

fn fast_policy() -> HealthCheckPolicy {
    HealthCheckPolicy {
        interval: Duration::from_millis(20),
        timeout: Duration::from_secs(2),
        start_period: Duration::ZERO,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_healthy_service() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/health")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"healthy","services":{"gemini":"connected","weaviate":"connected"}}"#)
        .create_async()
        .await;

    let prober = HealthProber::new(fast_policy()).unwrap();
    let outcome = prober.probe(&format!("{}/health", server.url())).await;

    mock.assert_async().await;
    assert!(outcome.healthy);
    assert_eq!(outcome.status_code, Some(200));
    assert_eq!(outcome.reported_status.as_deref(), Some("healthy"));
    assert_eq!(
        outcome.services.get("weaviate").map(String::as_str),
        Some("connected")
    );
    assert!(outcome.error.is_none());
}

#[tokio::test]
async fn test_reported_unhealthy_status() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/health")
        .with_status(200)
        .with_body(r#"{"status":"degraded","services":{"weaviate":"disconnected"}}"#)
        .create_async()
        .await;

    let prober = HealthProber::new(fast_policy()).unwrap();
    let outcome = prober.probe(&format!("{}/health", server.url())).await;

    assert!(!outcome.healthy);
    assert_eq!(outcome.error.as_deref(), Some("service reported status 'degraded'"));
}

#[tokio::test]
async fn test_non_json_success_is_healthy() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/health")
        .with_status(204)
        .create_async()
        .await;

    let prober = HealthProber::new(fast_policy()).unwrap();
    let outcome = prober.probe(&format!("{}/health", server.url())).await;
    assert!(outcome.healthy);
}

#[tokio::test]
async fn test_server_error() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/health")
        .with_status(503)
        .create_async()
        .await;

    let prober = HealthProber::new(fast_policy()).unwrap();
    let outcome = prober.probe(&format!("{}/health", server.url())).await;

    assert!(!outcome.healthy);
    assert_eq!(outcome.status_code, Some(503));
    assert!(outcome.error.unwrap().contains("503"));
}

#[tokio::test]
async fn test_watch_marks_unhealthy_after_retries() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/health")
        .with_status(500)
        .expect(3)
        .create_async()
        .await;

    let prober = HealthProber::new(fast_policy()).unwrap();
    let status = prober
        .watch(&format!("{}/health", server.url()), Some(10))
        .await;

    assert_eq!(status, HealthStatus::Unhealthy);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_watch_stops_after_max_probes() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/health")
        .with_status(200)
        .with_body(r#"{"status":"healthy"}"#)
        .expect(2)
        .create_async()
        .await;

    let prober = HealthProber::new(fast_policy()).unwrap();
    let status = prober
        .watch(&format!("{}/health", server.url()), Some(2))
        .await;
    assert_eq!(status, HealthStatus::Healthy);
}

#[test]
fn test_probe_command_exit_codes() {
    let mut server = Server::new();
    server
        .mock("GET", "/health")
        .with_status(200)
        .with_body(r#"{"status":"healthy"}"#)
        .create();
    server
        .mock("GET", "/down")
        .with_status(503)
        .create();

    let run = |path: &str| {
        std::process::Command::new(env!("CARGO_BIN_EXE_findmyrepo-boot"))
            .env_remove("BOOT_PROFILE")
            .current_dir(std::env::temp_dir())
            .args(["probe", "--url", &format!("{}{}", server.url(), path)])
            .output()
            .expect("Failed to execute findmyrepo-boot")
    };

    assert_eq!(run("/health").status.code(), Some(0));
    assert_eq!(run("/down").status.code(), Some(1));
}

#[test]
fn test_health_command_uses_resolved_port() {
    let mut server = Server::new();
    let mock = server
        .mock("GET", "/health")
        .with_status(200)
        .with_body(r#"{"status":"healthy"}"#)
        .create();
    let host = server.host_with_port();
    let port = host.rsplit(':').next().unwrap();

    let output = std::process::Command::new(env!("CARGO_BIN_EXE_findmyrepo-boot"))
        .env_remove("BOOT_PROFILE")
        .env_remove("BOOT_DEFAULT_PORT")
        .env("PORT", port)
        .current_dir(std::env::temp_dir())
        .arg("probe")
        .output()
        .expect("Failed to execute findmyrepo-boot");

    assert_eq!(output.status.code(), Some(0), "{:?}", output);
    mock.assert();
}
