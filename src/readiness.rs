//! Turns "process launched" into "stream is playable".
//!
//! Two bounded phases, polled at a fixed interval:
//!
//! * **start**: wait for the supervisor's `started` flag (ffmpeg opened the
//!   source and began muxing);
//! * **generation**: wait for the playlist plus at least one numbered segment
//!   on disk, re-checking process liveness on every tick.
//!
//! The phases fail with different causes so a caller can tell "camera
//! unreachable" from "camera reachable but nothing encodable arrived".

use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::StreamError;
use crate::output::has_playable_output;
use crate::supervisor::ProcessMonitor;

#[derive(Debug, Clone, Copy)]
pub struct ReadinessPoller {
    pub interval: Duration,
    pub start_attempts: u32,
    pub generation_attempts: u32,
}

impl ReadinessPoller {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            interval: settings.poll_interval(),
            start_attempts: settings.start_attempts,
            generation_attempts: settings.generation_attempts,
        }
    }

    /// Run both phases back to back.
    pub async fn wait_until_ready(
        &self,
        monitor: &ProcessMonitor,
        dir: &Path,
        playlist_name: &str,
    ) -> Result<(), StreamError> {
        self.wait_for_start(monitor).await?;
        self.wait_for_segments(monitor, dir, playlist_name).await
    }

    /// Phase one: the transcoder reports it is consuming the source.
    pub async fn wait_for_start(&self, monitor: &ProcessMonitor) -> Result<(), StreamError> {
        for attempt in 1..=self.start_attempts {
            if monitor.is_started() {
                info!(attempt, "Transcoder confirmed start");
                return Ok(());
            }
            if let Some(status) = monitor.exit_status() {
                return Err(died(monitor, status, "before it started processing the source"));
            }
            debug!(attempt, max = self.start_attempts, "Waiting for transcoder to start");
            tokio::time::sleep(self.interval).await;
        }

        if monitor.is_started() {
            return Ok(());
        }
        if let Some(status) = monitor.exit_status() {
            return Err(died(monitor, status, "before it started processing the source"));
        }
        Err(StreamError::StartTimeout {
            waited_secs: self.waited_secs(self.start_attempts),
            diagnostics: monitor.diagnostics().snapshot(),
        })
    }

    /// Phase two: a playlist and at least one segment exist while the process lives.
    pub async fn wait_for_segments(
        &self,
        monitor: &ProcessMonitor,
        dir: &Path,
        playlist_name: &str,
    ) -> Result<(), StreamError> {
        for attempt in 1..=self.generation_attempts {
            if let Some(status) = monitor.exit_status() {
                return Err(died(monitor, status, "while generating the first segments"));
            }
            if has_playable_output(dir, playlist_name).await {
                info!(attempt, "First segment available");
                return Ok(());
            }
            debug!(attempt, max = self.generation_attempts, "Waiting for first segment");
            tokio::time::sleep(self.interval).await;
        }

        if let Some(status) = monitor.exit_status() {
            return Err(died(monitor, status, "while generating the first segments"));
        }
        if has_playable_output(dir, playlist_name).await {
            return Ok(());
        }
        Err(StreamError::GenerationTimeout {
            waited_secs: self.waited_secs(self.generation_attempts),
            diagnostics: monitor.diagnostics().snapshot(),
        })
    }

    fn waited_secs(&self, attempts: u32) -> u64 {
        (self.interval * attempts).as_secs()
    }
}

fn died(monitor: &ProcessMonitor, status: String, when: &'static str) -> StreamError {
    StreamError::ProcessDied {
        status,
        when,
        diagnostics: monitor.diagnostics().snapshot(),
    }
}
