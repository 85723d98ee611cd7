//! Transcoder availability check and one-shot source connectivity test.

use serde::{Deserialize, Serialize};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::command::probe_transcode_args;
use crate::config::Transport;

/// Upper bound for `ffmpeg -version`; a hung binary counts as unavailable.
const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// What the connectivity test learned about the source's video track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub resolution: String,
    pub codec: String,
}

/// Check if the configured transcoder runs and identifies itself as ffmpeg.
pub async fn probe(launcher: &[String]) -> bool {
    version(launcher).await.is_some()
}

/// First line of `ffmpeg -version`, or `None` if it is missing or broken.
pub async fn version(launcher: &[String]) -> Option<String> {
    let output = match run(launcher, &["-version".to_string()], VERSION_TIMEOUT).await {
        Ok(output) => output,
        Err(e) => {
            debug!(error = %e, "Transcoder probe failed");
            return None;
        }
    };
    if !output.status.success() {
        debug!(status = %output.status, "Transcoder probe exited with failure");
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let banner = stdout.lines().find(|l| l.contains("ffmpeg version"))?;
    Some(banner.trim().to_string())
}

/// Decode a single frame from `source_url` to prove it is reachable.
///
/// Never touches the live session; the child is killed if the deadline passes.
pub async fn test_source(
    launcher: &[String],
    source_url: &str,
    transport: Transport,
    limit: Duration,
) -> Result<SourceInfo, String> {
    if !probe(launcher).await {
        return Err("ffmpeg is not installed or not runnable".to_string());
    }

    info!(
        url = %source_url,
        ?transport,
        timeout_secs = limit.as_secs(),
        "Testing source connectivity"
    );
    let output = run(launcher, &probe_transcode_args(source_url, transport), limit).await?;
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("no output");
        return Err(format!("connection failed ({}): {}", output.status, last.trim()));
    }

    parse_video_stream(&stderr).ok_or_else(|| "source has no video stream".to_string())
}

async fn run(launcher: &[String], args: &[String], limit: Duration) -> Result<Output, String> {
    let (program, leading) = launcher
        .split_first()
        .ok_or("no transcoder program configured")?;

    let mut cmd = Command::new(program);
    cmd.args(leading)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(windows)]
    cmd.creation_flags(0x0800_0000); // CREATE_NO_WINDOW

    match timeout(limit, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(format!("Failed to run {}: {}", program, e)),
        Err(_) => Err(format!("timed out after {}s", limit.as_secs())),
    }
}

/// Pull codec and resolution out of ffmpeg's stream summary, e.g.
/// `Stream #0:0: Video: h264 (Main), yuv420p(progressive), 1920x1080 [SAR 1:1 DAR 16:9], 25 fps`.
pub fn parse_video_stream(stderr: &str) -> Option<SourceInfo> {
    let line = stderr.lines().find(|l| l.contains("Stream #") && l.contains("Video: "))?;
    let (_, rest) = line.split_once("Video: ")?;

    let codec = rest
        .split(|c: char| c == ' ' || c == ',')
        .next()
        .filter(|c| !c.is_empty())?
        .to_string();
    let resolution = rest
        .split(|c: char| c == ' ' || c == ',')
        .find(|token| is_resolution(token))
        .unwrap_or("unknown")
        .to_string();

    Some(SourceInfo { resolution, codec })
}

fn is_resolution(token: &str) -> bool {
    let Some((w, h)) = token.split_once('x') else {
        return false;
    };
    let dimension = |s: &str| {
        !s.is_empty()
            && s.len() <= 5
            && !s.starts_with('0')
            && s.bytes().all(|b| b.is_ascii_digit())
    };
    dimension(w) && dimension(h)
}
