//! Per-stream options and process-wide settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// RTSP transport requested from the camera.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Tcp,
    Udp,
}

/// How the video track is produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VideoMode {
    /// Re-encode to H.264 with libx264. Works with any camera codec.
    #[default]
    H264,
    /// Pass the camera's video through untouched. Cheapest, H.264 sources only.
    Copy,
}

/// Options for one stream start. Unset fields take the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    #[serde(default)]
    pub transport: Transport,
    #[serde(default)]
    pub audio: bool,
    #[serde(default)]
    pub video: VideoMode,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_crf")]
    pub crf: u8,
    /// Downscale to this height (keeping aspect) when the source is taller.
    #[serde(default)]
    pub max_height: Option<u32>,
    #[serde(default = "default_segment_secs")]
    pub segment_secs: u32,
    #[serde(default = "default_list_size")]
    pub list_size: u32,
}

fn default_preset() -> String { "veryfast".to_string() }
fn default_crf() -> u8 { 23 }
fn default_segment_secs() -> u32 { 2 }
fn default_list_size() -> u32 { 6 }

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            audio: false,
            video: VideoMode::default(),
            preset: default_preset(),
            crf: default_crf(),
            max_height: None,
            segment_secs: default_segment_secs(),
            list_size: default_list_size(),
        }
    }
}

/// Process-wide settings, read from `config.toml` and overridden by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Launcher for the transcoder. The first entry is the program; any further
    /// entries are passed before the ffmpeg arguments (e.g. `cmd /C ffmpeg`).
    pub transcoder: Vec<String>,
    /// Where playlists and segments are written. Resolved per environment when unset.
    pub output_dir: Option<PathBuf>,
    pub bind_host: String,
    /// Host name used in the stream URL handed back to callers.
    pub public_host: String,
    pub preferred_port: u16,
    pub playlist_name: String,
    pub poll_interval_ms: u64,
    pub start_attempts: u32,
    pub generation_attempts: u32,
    pub kill_grace_ms: u64,
    pub diagnostics_lines: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            transcoder: default_transcoder(),
            output_dir: None,
            bind_host: "127.0.0.1".to_string(),
            public_host: "localhost".to_string(),
            preferred_port: 8090,
            playlist_name: "stream.m3u8".to_string(),
            poll_interval_ms: 1000,
            start_attempts: 10,
            generation_attempts: 30,
            kill_grace_ms: 5000,
            diagnostics_lines: 64,
        }
    }
}

#[cfg(windows)]
fn default_transcoder() -> Vec<String> {
    vec!["cmd".to_string(), "/C".to_string(), "ffmpeg".to_string()]
}

#[cfg(not(windows))]
fn default_transcoder() -> Vec<String> {
    vec!["ffmpeg".to_string()]
}

impl Settings {
    /// Default location of the settings file.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("hls-relay").join("config.toml"))
    }

    /// Load settings from `path`, or from the default location if it exists.
    /// A missing default file yields built-in defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::config_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let settings: Settings = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        if settings.transcoder.is_empty() {
            anyhow::bail!("{}: `transcoder` must name a program", path.display());
        }
        Ok(settings)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Output directory for this environment: explicit override, the project's
    /// `public/hls` in development builds, the user's local data directory otherwise.
    pub fn resolved_output_dir(&self) -> PathBuf {
        if let Some(dir) = &self.output_dir {
            return dir.clone();
        }
        if cfg!(debug_assertions) {
            return PathBuf::from("public").join("hls");
        }
        match dirs::data_local_dir() {
            Some(dir) => dir.join("hls-relay").join("hls"),
            None => std::env::temp_dir().join("hls-relay"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_config_defaults_from_empty_json() {
        let config: StreamConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, StreamConfig::default());
        assert_eq!(config.transport, Transport::Tcp);
        assert!(!config.audio);
        assert_eq!(config.preset, "veryfast");
    }

    #[test]
    fn stream_config_reads_camel_case() {
        let config: StreamConfig = serde_json::from_str(
            r#"{"transport":"udp","audio":true,"maxHeight":720,"video":"copy"}"#,
        )
        .unwrap();
        assert_eq!(config.transport, Transport::Udp);
        assert!(config.audio);
        assert_eq!(config.max_height, Some(720));
        assert_eq!(config.video, VideoMode::Copy);
        assert_eq!(config.segment_secs, 2);
    }

    #[test]
    fn settings_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "preferred_port = 9100\ntranscoder = [\"/opt/ffmpeg/bin/ffmpeg\"]\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.preferred_port, 9100);
        assert_eq!(settings.transcoder, vec!["/opt/ffmpeg/bin/ffmpeg".to_string()]);
        assert_eq!(settings.start_attempts, 10);
        assert_eq!(settings.generation_attempts, 30);
        assert_eq!(settings.kill_grace(), Duration::from_secs(5));
    }

    #[test]
    fn settings_reject_empty_transcoder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "transcoder = []\n").unwrap();
        assert!(Settings::load(Some(&path)).is_err());
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn explicit_output_dir_wins() {
        let settings = Settings {
            output_dir: Some(PathBuf::from("/srv/hls")),
            ..Settings::default()
        };
        assert_eq!(settings.resolved_output_dir(), PathBuf::from("/srv/hls"));
    }
}
