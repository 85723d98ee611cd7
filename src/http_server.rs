//! HTTP control API using Axum.

use crate::config::{StreamConfig, Transport};
use crate::error::StreamError;
use crate::probe::SourceInfo;
use crate::session::SessionStatus;
use crate::state::AppState;
use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

// Request/Response types
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub url: String,
    #[serde(flatten)]
    pub config: StreamConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}

impl From<StreamError> for StartResponse {
    fn from(e: StreamError) -> Self {
        Self {
            success: false,
            stream_url: None,
            error: Some(e.to_string()),
            cause: Some(e.cause().to_string()),
            diagnostics: e.diagnostics().to_vec(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TestRequest {
    pub url: String,
    #[serde(default = "default_test_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub transport: Transport,
}

fn default_test_timeout() -> u64 { 10 }

#[derive(Debug, Serialize, Deserialize)]
pub struct TestResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<SourceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
}

/// Build the control router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stream/start", post(start_stream))
        .route("/stream/stop", post(stop_stream))
        .route("/stream/test", post(test_stream))
        .route("/stream/status", get(stream_status))
        .route("/shutdown", post(shutdown))
        .route("/health", get(health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve the control API on an already bound listener until `state.quit` fires.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let quit = state.quit.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(quit.cancelled_owned())
        .await
}

/// Run the HTTP server on the given host and port with the provided state.
pub async fn run_server(host: &str, port: u16, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind control API on {}:{}", host, port))?;
    info!("Starting HTTP server on {}", listener.local_addr()?);
    serve(listener, state).await.context("HTTP server failed")
}

/// HTTP status for a failed start. The JSON body carries the details either way.
pub fn error_status(e: &StreamError) -> StatusCode {
    match e {
        StreamError::NotInstalled | StreamError::PortBindFailed { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        StreamError::SpawnFailed { .. } | StreamError::ProcessDied { .. } => {
            StatusCode::BAD_GATEWAY
        }
        StreamError::StartTimeout { .. } | StreamError::GenerationTimeout { .. } => {
            StatusCode::GATEWAY_TIMEOUT
        }
        StreamError::Superseded => StatusCode::CONFLICT,
        StreamError::WriteDenied { .. } | StreamError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn start_stream(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> (StatusCode, Json<StartResponse>) {
    info!("POST /stream/start - url: {}", req.url);
    match state.controller.start(req.url, req.config).await {
        Ok(stream_url) => (
            StatusCode::OK,
            Json(StartResponse {
                success: true,
                stream_url: Some(stream_url),
                error: None,
                cause: None,
                diagnostics: Vec::new(),
            }),
        ),
        Err(e) => (error_status(&e), Json(e.into())),
    }
}

async fn stop_stream(State(state): State<AppState>) -> Json<AckResponse> {
    state.controller.stop().await;
    Json(AckResponse { success: true })
}

async fn test_stream(
    State(state): State<AppState>,
    Json(req): Json<TestRequest>,
) -> Json<TestResponse> {
    info!("POST /stream/test - url: {}", req.url);
    let limit = Duration::from_secs(req.timeout.max(1));
    match state.controller.test(&req.url, req.transport, limit).await {
        Ok(info) => Json(TestResponse {
            success: true,
            info: Some(info),
            error: None,
        }),
        Err(error) => Json(TestResponse {
            success: false,
            info: None,
            error: Some(error),
        }),
    }
}

async fn stream_status(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.controller.status())
}

/// Window-close / app-quit trigger: tear the session down, then stop serving.
async fn shutdown(State(state): State<AppState>) -> Json<AckResponse> {
    state.controller.shutdown("control api").await;
    state.quit.cancel();
    Json(AckResponse { success: true })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_request_fills_defaults() {
        let req: StartRequest =
            serde_json::from_str(r#"{"url":"rtsp://cam/live","audio":true}"#).unwrap();
        assert_eq!(req.url, "rtsp://cam/live");
        assert!(req.config.audio);
        assert_eq!(req.config.transport, Transport::Tcp);
        assert_eq!(req.config.crf, 23);

        let req: StartRequest = serde_json::from_str(
            r#"{"url":"rtsp://cam/live","transport":"udp","maxHeight":720}"#,
        )
        .unwrap();
        assert_eq!(req.config.transport, Transport::Udp);
        assert_eq!(req.config.max_height, Some(720));
    }

    #[test]
    fn failure_body_carries_cause_and_diagnostics() {
        let err = StreamError::StartTimeout {
            waited_secs: 10,
            diagnostics: vec!["Connection timed out".to_string()],
        };
        assert_eq!(error_status(&err), StatusCode::GATEWAY_TIMEOUT);

        let body = serde_json::to_value(StartResponse::from(err)).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["cause"], "start-timeout");
        assert_eq!(body["diagnostics"][0], "Connection timed out");
        assert!(body.get("streamUrl").is_none());
    }

    #[test]
    fn test_request_defaults() {
        let req: TestRequest = serde_json::from_str(r#"{"url":"rtsp://cam/live"}"#).unwrap();
        assert_eq!(req.timeout, 10);
        assert_eq!(req.transport, Transport::Tcp);
    }
}
