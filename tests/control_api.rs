//! HTTP control API driven through the client crate.

#![cfg(unix)]

mod common;

use hls_relay::http_server;
use hls_relay::state::AppState;
use hls_relay_client::{Client, StartOptions};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

async fn spawn_api(state: AppState) -> (Client, JoinHandle<std::io::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(http_server::serve(listener, state));
    (Client::new(&format!("http://{}", addr)).unwrap(), server)
}

#[tokio::test]
async fn start_status_stop_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(common::settings(dir.path(), common::healthy()));
    let (client, _server) = spawn_api(state.clone()).await;

    assert!(client.health().await.unwrap());
    assert_eq!(client.status().await.unwrap().state, "idle");

    let started = client
        .start(&StartOptions::new("rtsp://cam/live").transport("udp"))
        .await
        .unwrap();
    assert!(started.success, "{:?}", started);
    let stream_url = started.stream_url.unwrap();

    let status = client.status().await.unwrap();
    assert_eq!(status.state, "running");
    assert_eq!(status.stream_url.as_deref(), Some(stream_url.as_str()));

    let port = status.port.unwrap();
    let resp = reqwest::get(format!("http://127.0.0.1:{}/stream.m3u8", port)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");

    assert!(client.stop().await.unwrap());
    assert!(client.stop().await.unwrap());
    assert_eq!(client.status().await.unwrap().state, "idle");
    assert!(!common::port_open(port).await);

    state.quit.cancel();
}

#[tokio::test]
async fn failed_start_reports_cause_and_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(common::settings(dir.path(), common::refused()));
    let (client, _server) = spawn_api(state.clone()).await;

    let result = client.start(&StartOptions::new("rtsp://cam/private")).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.cause.as_deref(), Some("process-died"));
    assert!(result.error.is_some());
    assert!(result.diagnostics.iter().any(|l| l.contains("401")));
    assert_eq!(client.status().await.unwrap().state, "idle");

    state.quit.cancel();
}

#[tokio::test]
async fn missing_transcoder_is_not_installed() {
    let dir = tempfile::tempdir().unwrap();
    let missing = vec!["/nonexistent/ffmpeg".to_string()];
    let state = AppState::new(common::settings(dir.path(), missing));
    let (client, _server) = spawn_api(state.clone()).await;

    let result = client.start(&StartOptions::new("rtsp://cam/live")).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.cause.as_deref(), Some("not-installed"));

    let test = client.test("rtsp://cam/live", Duration::from_secs(2)).await.unwrap();
    assert!(!test.success);
    assert!(test.error.unwrap().contains("not installed"));

    state.quit.cancel();
}

#[tokio::test]
async fn shutdown_reaps_session_and_stops_serving() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(common::settings(dir.path(), common::healthy()));
    let (client, server) = spawn_api(state.clone()).await;

    assert!(client.start(&StartOptions::new("rtsp://cam/live")).await.unwrap().success);
    let pid = client.status().await.unwrap().pid.unwrap();

    assert!(client.shutdown().await.unwrap());
    assert!(!common::pid_alive(pid));
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
