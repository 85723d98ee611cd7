//! Client for the hls-relay HTTP control API.
//!
//! ```no_run
//! # async fn demo() -> Result<(), hls_relay_client::Error> {
//! let client = hls_relay_client::Client::new("http://127.0.0.1:8080")?;
//! let options = hls_relay_client::StartOptions::new("rtsp://10.0.0.9/live");
//! let started = client.start(&options).await?;
//! println!("{:?}", started.stream_url);
//! client.stop().await?;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid base url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Api { status: u16, body: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Body of `POST /stream/start`. `None` fields take server defaults.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOptions {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u32>,
}

impl StartOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = Some(transport.into());
        self
    }

    pub fn audio(mut self, audio: bool) -> Self {
        self.audio = Some(audio);
        self
    }
}

/// Outcome of a start. Failures are reported here, not as [`Error`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResult {
    pub success: bool,
    #[serde(default)]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub cause: Option<String>,
    #[serde(default)]
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceInfo {
    pub resolution: String,
    pub codec: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestResult {
    pub success: bool,
    #[serde(default)]
    pub info: Option<SourceInfo>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub state: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub pid: Option<u32>,
    pub output_dir: String,
}

#[derive(Debug, Deserialize)]
struct Ack {
    success: bool,
}

#[derive(Debug, Clone)]
pub struct Client {
    base: Url,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base: Url::parse(base_url)?,
            http: reqwest::Client::new(),
        })
    }

    pub async fn health(&self) -> Result<bool> {
        let resp = self.http.get(self.base.join("/health")?).send().await?;
        Ok(resp.status().is_success())
    }

    /// Start a stream. Resolves once the stream is playable or the start failed.
    pub async fn start(&self, options: &StartOptions) -> Result<StartResult> {
        let resp = self
            .http
            .post(self.base.join("/stream/start")?)
            .json(options)
            .send()
            .await?;
        // Failed starts use non-2xx codes but still carry a StartResult body.
        let status = resp.status();
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|_| Error::Api {
            status: status.as_u16(),
            body,
        })
    }

    pub async fn stop(&self) -> Result<bool> {
        let ack: Ack = self.post_empty("/stream/stop").await?;
        Ok(ack.success)
    }

    pub async fn test(&self, url: &str, timeout: Duration) -> Result<TestResult> {
        let resp = self
            .http
            .post(self.base.join("/stream/test")?)
            .json(&serde_json::json!({ "url": url, "timeout": timeout.as_secs().max(1) }))
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn status(&self) -> Result<Status> {
        let resp = self.http.get(self.base.join("/stream/status")?).send().await?;
        decode(resp).await
    }

    /// Tear down the session and stop the server.
    pub async fn shutdown(&self) -> Result<bool> {
        let ack: Ack = self.post_empty("/shutdown").await?;
        Ok(ack.success)
    }

    async fn post_empty<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.http.post(self.base.join(path)?).send().await?;
        decode(resp).await
    }
}

async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Api {
            status: status.as_u16(),
            body: resp.text().await.unwrap_or_default(),
        });
    }
    Ok(resp.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_options_omit_unset_fields() {
        let options = StartOptions::new("rtsp://cam/live").transport("udp");
        let body = serde_json::to_value(options).unwrap();
        assert_eq!(body["url"], "rtsp://cam/live");
        assert_eq!(body["transport"], "udp");
        assert!(body.get("audio").is_none());
        assert!(body.get("maxHeight").is_none());
    }

    #[test]
    fn failed_start_parses() {
        let result: StartResult = serde_json::from_str(
            r#"{"success":false,"error":"ffmpeg is not installed","cause":"not-installed"}"#,
        )
        .unwrap();
        assert!(!result.success);
        assert_eq!(result.cause.as_deref(), Some("not-installed"));
        assert!(result.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn unreachable_server_is_http_error() {
        // Bind then drop to get a port nothing listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = Client::new(&format!("http://127.0.0.1:{}", port)).unwrap();
        assert!(matches!(client.status().await, Err(Error::Http(_))));
        assert!(matches!(client.stop().await, Err(Error::Http(_))));
    }

    #[test]
    fn rejects_bad_base_url() {
        assert!(matches!(Client::new("not a url"), Err(Error::InvalidUrl(_))));
    }
}
