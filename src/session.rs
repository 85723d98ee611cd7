//! The single live stream session and the controller that owns it.
//!
//! All transitions happen while holding the controller's slot lock, except
//! readiness polling, which runs unlocked so a newer start or a stop can
//! cancel it. Published [`SessionStatus`] is only updated under that lock,
//! so observers never see transitions out of order.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::command;
use crate::config::{Settings, StreamConfig, Transport};
use crate::error::StreamError;
use crate::output;
use crate::port;
use crate::probe::{self, SourceInfo};
use crate::readiness::ReadinessPoller;
use crate::segments::SegmentServer;
use crate::supervisor::{ProcessMonitor, TranscoderProcess};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Failed => "failed",
        }
    }
}

/// One transcoder process plus one segment listener, created per start.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub state: SessionState,
    pub source_url: String,
    pub config: StreamConfig,
    pub output_dir: PathBuf,
    pub playlist_name: String,
    pub port: u16,
    pub stream_url: String,
    generation: u64,
    process: Option<TranscoderProcess>,
    server: Option<SegmentServer>,
    reaped: bool,
}

impl Session {
    pub fn monitor(&self) -> Option<ProcessMonitor> {
        self.process.as_ref().map(TranscoderProcess::monitor)
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(TranscoderProcess::pid)
    }

    /// Release everything this session owns: stop the transcoder, close the
    /// listener, delete its playlist and segments.
    ///
    /// Safe to call any number of times; only the first call does work.
    pub async fn reap(&mut self) {
        if self.reaped {
            return;
        }
        self.reaped = true;
        self.state = SessionState::Stopping;
        info!(session_id = %self.id, port = self.port, "Reaping session");

        if let Some(mut process) = self.process.take() {
            process.terminate().await;
        }
        if let Some(mut server) = self.server.take() {
            server.close().await;
        }
        if let Err(e) = output::purge(&self.output_dir, &self.playlist_name).await {
            warn!(
                session_id = %self.id,
                dir = %self.output_dir.display(),
                error = %e,
                "Failed to purge output directory"
            );
        }

        self.state = SessionState::Idle;
        info!(session_id = %self.id, "Session reaped");
    }
}

/// Snapshot of the controller for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: SessionState,
    pub session_id: Option<String>,
    pub source_url: Option<String>,
    pub stream_url: Option<String>,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub output_dir: PathBuf,
}

impl SessionStatus {
    fn idle(output_dir: PathBuf) -> Self {
        Self {
            state: SessionState::Idle,
            session_id: None,
            source_url: None,
            stream_url: None,
            port: None,
            pid: None,
            output_dir,
        }
    }

    fn of(session: &Session) -> Self {
        Self {
            state: session.state,
            session_id: Some(session.id.to_string()),
            source_url: Some(session.source_url.clone()),
            stream_url: Some(session.stream_url.clone()),
            port: Some(session.port),
            pid: session.pid(),
            output_dir: session.output_dir.clone(),
        }
    }
}

/// Owner of the one process-wide session. Cloning shares the controller.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

struct Inner {
    settings: Settings,
    slot: Mutex<Option<Session>>,
    /// Token of the most recent start; cancelled by any newer start or stop.
    pending: StdMutex<Option<CancellationToken>>,
    generation: AtomicU64,
    status: watch::Sender<SessionStatus>,
}

impl SessionController {
    pub fn new(settings: Settings) -> Self {
        let (status, _) = watch::channel(SessionStatus::idle(settings.resolved_output_dir()));
        Self {
            inner: Arc::new(Inner {
                settings,
                slot: Mutex::new(None),
                pending: StdMutex::new(None),
                generation: AtomicU64::new(0),
                status,
            }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.status.borrow().clone()
    }

    /// Subscribe to status changes.
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    /// Resolve when the current session's transcoder exits, with its status.
    /// Returns `None` at once when there is no session.
    pub async fn process_exit(&self) -> Option<String> {
        let monitor = self.inner.slot.lock().await.as_ref().and_then(Session::monitor)?;
        monitor.wait_exit().await
    }

    /// Start streaming `source_url`, replacing any existing session.
    ///
    /// Returns the playlist URL once the first segment is on disk. The previous
    /// session is fully reaped before the new transcoder is spawned; an
    /// in-flight start that gets replaced returns [`StreamError::Superseded`].
    pub async fn start(
        &self,
        source_url: String,
        config: StreamConfig,
    ) -> Result<String, StreamError> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        if let Some(previous) = self.lock_pending().replace(token.clone()) {
            previous.cancel();
        }

        // Run as a task so a panic in any phase surfaces as a result, and so a
        // dropped caller does not abandon a half-built session.
        let this = self.clone();
        let attempt = tokio::spawn(async move {
            this.run_start(generation, source_url, config, token).await
        });
        match attempt.await {
            Ok(result) => result,
            Err(e) => {
                error!(generation, error = %e, "Start attempt aborted");
                let mut slot = self.inner.slot.lock().await;
                if slot.as_ref().is_some_and(|s| s.generation == generation) {
                    if let Some(mut session) = slot.take() {
                        session.reap().await;
                    }
                    self.publish_idle();
                }
                Err(StreamError::Internal(format!("start attempt aborted: {}", e)))
            }
        }
    }

    async fn run_start(
        &self,
        generation: u64,
        source_url: String,
        config: StreamConfig,
        token: CancellationToken,
    ) -> Result<String, StreamError> {
        let mut slot = self.inner.slot.lock().await;
        if token.is_cancelled() {
            return Err(StreamError::Superseded);
        }

        if let Some(mut previous) = slot.take() {
            info!(session_id = %previous.id, "Replacing running session");
            self.publish(SessionStatus {
                state: SessionState::Stopping,
                ..SessionStatus::of(&previous)
            });
            previous.reap().await;
        }

        let id = Uuid::new_v4();
        self.publish(SessionStatus {
            state: SessionState::Starting,
            session_id: Some(id.to_string()),
            source_url: Some(source_url.clone()),
            ..SessionStatus::idle(self.inner.settings.resolved_output_dir())
        });

        let session = match self.launch(id, generation, source_url, config).await {
            Ok(session) => session,
            Err(e) => {
                warn!(session_id = %id, cause = e.cause(), error = %e, "Stream start failed");
                self.publish_idle();
                return Err(e);
            }
        };
        let Some(monitor) = session.monitor() else {
            self.publish_idle();
            return Err(StreamError::Internal("session launched without a process".to_string()));
        };
        let dir = session.output_dir.clone();
        let stream_url = session.stream_url.clone();
        self.publish(SessionStatus::of(&session));
        *slot = Some(session);
        drop(slot);

        let poller = ReadinessPoller::from_settings(&self.inner.settings);
        let playlist = &self.inner.settings.playlist_name;
        let ready = tokio::select! {
            result = poller.wait_until_ready(&monitor, &dir, playlist) => result,
            _ = token.cancelled() => Err(StreamError::Superseded),
        };

        let mut slot = self.inner.slot.lock().await;
        let ours = slot.as_ref().is_some_and(|s| s.generation == generation);
        match ready {
            Ok(()) if ours => {
                if let Some(session) = slot.as_mut() {
                    session.state = SessionState::Running;
                    self.publish(SessionStatus::of(session));
                }
                info!(session_id = %id, url = %stream_url, "Stream ready");
                Ok(stream_url)
            }
            Ok(()) => Err(StreamError::Superseded),
            Err(e) => {
                if ours {
                    warn!(
                        session_id = %id,
                        cause = e.cause(),
                        error = %e,
                        "Stream failed to become ready"
                    );
                    if let Some(mut session) = slot.take() {
                        session.state = SessionState::Failed;
                        self.publish(SessionStatus::of(&session));
                        session.reap().await;
                    }
                    self.publish_idle();
                }
                Err(e)
            }
        }
    }

    /// Purge, probe, allocate, spawn, bind. On any failure nothing is left running.
    async fn launch(
        &self,
        id: Uuid,
        generation: u64,
        source_url: String,
        config: StreamConfig,
    ) -> Result<Session, StreamError> {
        let settings = &self.inner.settings;
        let output_dir = settings.resolved_output_dir();

        output::ensure_writable(&output_dir).await?;
        output::purge(&output_dir, &settings.playlist_name)
            .await
            .map_err(|e| StreamError::WriteDenied {
                path: output_dir.clone(),
                reason: e.to_string(),
            })?;

        if !probe::probe(&settings.transcoder).await {
            return Err(StreamError::NotInstalled);
        }

        let port = port::allocate(&settings.bind_host, settings.preferred_port)?;
        let args = command::hls_args(&source_url, &config, &output_dir, &settings.playlist_name);
        info!(
            session_id = %id,
            url = %source_url,
            port,
            transport = ?config.transport,
            audio = config.audio,
            "Starting stream"
        );

        let mut process = TranscoderProcess::spawn(
            &settings.transcoder,
            &args,
            settings.diagnostics_lines,
            settings.kill_grace(),
        )?;
        let server = match SegmentServer::bind(
            &settings.bind_host,
            port,
            output_dir.clone(),
            settings.playlist_name.clone(),
        )
        .await
        {
            Ok(server) => server,
            Err(e) => {
                process.terminate().await;
                return Err(e);
            }
        };

        // Port 0 in settings means "any"; report what was actually bound.
        let port = server.port();
        let stream_url =
            format!("http://{}:{}/{}", settings.public_host, port, settings.playlist_name);
        Ok(Session {
            id,
            state: SessionState::Starting,
            source_url,
            config,
            output_dir,
            playlist_name: settings.playlist_name.clone(),
            port,
            stream_url,
            generation,
            process: Some(process),
            server: Some(server),
            reaped: false,
        })
    }

    /// Stop the current session, if any. Idempotent.
    pub async fn stop(&self) {
        if let Some(pending) = self.lock_pending().take() {
            pending.cancel();
        }

        let mut slot = self.inner.slot.lock().await;
        let Some(mut session) = slot.take() else {
            return;
        };
        self.publish(SessionStatus {
            state: SessionState::Stopping,
            ..SessionStatus::of(&session)
        });
        session.reap().await;
        self.publish_idle();
    }

    /// Entry point for every external termination trigger (window close, app
    /// quit, SIGINT/SIGTERM). Collapses into a single [`stop`](Self::stop).
    pub async fn shutdown(&self, trigger: &str) {
        info!(trigger, "Shutdown requested");
        self.stop().await;
    }

    /// One-shot reachability check of `source_url`; never touches the session.
    pub async fn test(
        &self,
        source_url: &str,
        transport: Transport,
        limit: Duration,
    ) -> Result<SourceInfo, String> {
        probe::test_source(&self.inner.settings.transcoder, source_url, transport, limit).await
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.inner.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, status: SessionStatus) {
        self.inner.status.send_replace(status);
    }

    fn publish_idle(&self) {
        self.publish(SessionStatus::idle(self.inner.settings.resolved_output_dir()));
    }
}
