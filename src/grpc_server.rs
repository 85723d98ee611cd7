//! gRPC control API using Tonic. Mirrors the HTTP routes over the same state.

use crate::config::StreamConfig;
use crate::session::SessionStatus;
use crate::state::AppState;
use anyhow::Context;
use clap::ValueEnum;
use std::time::Duration;
use tonic::{Request, Response, Status};
use tracing::info;

// Import generated protobuf types
pub mod proto {
    tonic::include_proto!("hlsrelay");
}

use proto::stream_control_server::{StreamControl, StreamControlServer};
use proto::{
    StartRequest, StartResponse, StatusRequest, StatusResponse, StopRequest, StopResponse,
    TestRequest, TestResponse,
};

const MAX_CRF: u32 = 51;

/// gRPC service implementation.
pub struct StreamControlImpl {
    state: AppState,
}

impl StreamControlImpl {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl StreamControl for StreamControlImpl {
    async fn start(
        &self,
        request: Request<StartRequest>,
    ) -> Result<Response<StartResponse>, Status> {
        let req = request.into_inner();
        info!("gRPC Start: url={}", req.url);
        let config = stream_config(&req)?;

        let response = match self.state.controller.start(req.url, config).await {
            Ok(stream_url) => StartResponse {
                success: true,
                stream_url,
                ..Default::default()
            },
            Err(e) => StartResponse {
                success: false,
                stream_url: String::new(),
                error: e.to_string(),
                cause: e.cause().to_string(),
                diagnostics: e.diagnostics().to_vec(),
            },
        };
        Ok(Response::new(response))
    }

    async fn stop(&self, _request: Request<StopRequest>) -> Result<Response<StopResponse>, Status> {
        info!("gRPC Stop");
        self.state.controller.stop().await;
        Ok(Response::new(StopResponse { success: true }))
    }

    async fn test(&self, request: Request<TestRequest>) -> Result<Response<TestResponse>, Status> {
        let req = request.into_inner();
        info!("gRPC Test: url={}", req.url);
        let transport = parse_choice(&req.transport, "transport")?;
        let limit = Duration::from_secs(if req.timeout_secs > 0 { req.timeout_secs } else { 10 });

        let response = match self.state.controller.test(&req.url, transport, limit).await {
            Ok(info) => TestResponse {
                success: true,
                resolution: info.resolution,
                codec: info.codec,
                error: String::new(),
            },
            Err(error) => TestResponse {
                success: false,
                error,
                ..Default::default()
            },
        };
        Ok(Response::new(response))
    }

    async fn status(
        &self,
        _request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        Ok(Response::new(status_response(self.state.controller.status())))
    }
}

fn stream_config(req: &StartRequest) -> Result<StreamConfig, Status> {
    let defaults = StreamConfig::default();
    if req.crf > MAX_CRF {
        return Err(Status::invalid_argument(format!("crf must be at most {}", MAX_CRF)));
    }
    Ok(StreamConfig {
        transport: parse_choice(&req.transport, "transport")?,
        audio: req.audio,
        video: parse_choice(&req.video, "video")?,
        preset: if req.preset.is_empty() { defaults.preset } else { req.preset.clone() },
        crf: if req.crf > 0 { req.crf as u8 } else { defaults.crf },
        max_height: (req.max_height > 0).then_some(req.max_height),
        segment_secs: if req.segment_secs > 0 { req.segment_secs } else { defaults.segment_secs },
        list_size: if req.list_size > 0 { req.list_size } else { defaults.list_size },
    })
}

/// Empty selects the default variant; anything else must name one, case-insensitively.
fn parse_choice<T: ValueEnum + Default>(value: &str, field: &str) -> Result<T, Status> {
    if value.is_empty() {
        return Ok(T::default());
    }
    <T as ValueEnum>::from_str(value, true)
        .map_err(|e| Status::invalid_argument(format!("invalid {}: {}", field, e)))
}

fn status_response(status: SessionStatus) -> StatusResponse {
    StatusResponse {
        state: status.state.as_str().to_string(),
        session_id: status.session_id.unwrap_or_default(),
        source_url: status.source_url.unwrap_or_default(),
        stream_url: status.stream_url.unwrap_or_default(),
        port: status.port.map(u32::from).unwrap_or_default(),
        output_dir: status.output_dir.display().to_string(),
        pid: status.pid.unwrap_or_default(),
    }
}

/// Run the gRPC server on the given host and port until `state.quit` fires.
pub async fn run_server(host: &str, port: u16, state: AppState) -> anyhow::Result<()> {
    let addr = tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("Failed to resolve {}:{}", host, port))?
        .next()
        .with_context(|| format!("No address for {}:{}", host, port))?;
    info!("Starting gRPC server on {}", addr);

    let quit = state.quit.clone();
    let service = StreamControlImpl::new(state);

    tonic::transport::Server::builder()
        .add_service(StreamControlServer::new(service))
        .serve_with_shutdown(addr, quit.cancelled_owned())
        .await
        .context("gRPC server failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, Transport, VideoMode};
    use crate::session::SessionController;

    #[test]
    fn empty_fields_take_defaults() {
        let config = stream_config(&StartRequest {
            url: "rtsp://cam/live".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config, StreamConfig::default());
    }

    #[test]
    fn explicit_fields_override() {
        let config = stream_config(&StartRequest {
            url: "rtsp://cam/live".to_string(),
            transport: "UDP".to_string(),
            video: "copy".to_string(),
            audio: true,
            crf: 28,
            max_height: 720,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.transport, Transport::Udp);
        assert_eq!(config.video, VideoMode::Copy);
        assert!(config.audio);
        assert_eq!(config.crf, 28);
        assert_eq!(config.max_height, Some(720));
    }

    #[test]
    fn bad_choices_are_invalid_argument() {
        let err = stream_config(&StartRequest {
            transport: "http".to_string(),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);

        let err = stream_config(&StartRequest {
            crf: 90,
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn idle_status_maps_to_empty_fields() {
        let response = status_response(SessionController::new(Settings::default()).status());
        assert_eq!(response.state, "idle");
        assert!(response.session_id.is_empty());
        assert_eq!(response.port, 0);
    }
}
