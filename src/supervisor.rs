//! Lifecycle of the single ffmpeg child process.
//!
//! A spawned [`TranscoderProcess`] owns three background tasks: two pumps that
//! copy stdout/stderr into the [`Diagnostics`] ring while watching for the
//! "processing started" markers, and a monitor that owns the child, reaps it
//! and publishes its exit status. Everything the readiness poller needs is
//! reachable through a cloneable [`ProcessMonitor`], so polling never
//! contends with termination.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::diagnostics::Diagnostics;
use crate::error::StreamError;

/// Substrings ffmpeg prints once it has opened the input and begun muxing.
pub const START_MARKERS: &[&str] = &["Output #0", "frame="];

/// How long to wait for the process to be reaped after a forced kill.
const FORCE_WAIT: Duration = Duration::from_secs(2);

/// Longest partial line buffered before it is flushed as-is.
const MAX_LINE: usize = 8 * 1024;

/// How long the monitor waits for output pumps to drain after the child exits.
/// Bounded because grandchildren may keep the pipes open.
const DRAIN_WAIT: Duration = Duration::from_millis(500);

/// Read-only view of a running transcoder.
#[derive(Debug, Clone)]
pub struct ProcessMonitor {
    started: Arc<AtomicBool>,
    exit: watch::Receiver<Option<String>>,
    diagnostics: Diagnostics,
}

impl ProcessMonitor {
    /// True once a start marker has been seen. Says nothing about output files.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Exit status text once the process has been reaped.
    pub fn exit_status(&self) -> Option<String> {
        self.exit.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Resolve once the process has been reaped and its output drained.
    pub async fn wait_exit(&self) -> Option<String> {
        let mut rx = self.exit.clone();
        let _ = rx.wait_for(Option::is_some).await;
        let status = rx.borrow().clone();
        status
    }
}

/// Owning handle to one transcoder process.
#[derive(Debug)]
pub struct TranscoderProcess {
    pid: Option<u32>,
    monitor: ProcessMonitor,
    terminating: Arc<AtomicBool>,
    kill_tx: Option<oneshot::Sender<()>>,
    grace: Duration,
}

impl TranscoderProcess {
    /// Launch `launcher` followed by `args`.
    ///
    /// `launcher[0]` is the program; remaining entries precede `args`, which is
    /// how a shell indirection such as `cmd /C ffmpeg` is expressed.
    pub fn spawn(
        launcher: &[String],
        args: &[String],
        diagnostics_lines: usize,
        grace: Duration,
    ) -> Result<Self, StreamError> {
        let (program, leading) = launcher.split_first().ok_or_else(|| StreamError::SpawnFailed {
            reason: "no transcoder program configured".to_string(),
            diagnostics: Vec::new(),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(leading)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        cmd.creation_flags(0x0800_0000); // CREATE_NO_WINDOW

        let mut child = cmd.spawn().map_err(|e| StreamError::SpawnFailed {
            reason: format!("{}: {}", program, e),
            diagnostics: Vec::new(),
        })?;
        let pid = child.id();
        info!(pid = ?pid, program = %program, "Transcoder spawned");

        let diagnostics = Diagnostics::new(diagnostics_lines);
        let started = Arc::new(AtomicBool::new(false));
        let mut pumps = Vec::with_capacity(2);
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump_output(stderr, diagnostics.clone(), started.clone())));
        }
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump_output(stdout, diagnostics.clone(), started.clone())));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let terminating = Arc::new(AtomicBool::new(false));
        let expected = terminating.clone();

        tokio::spawn(async move {
            // A dropped sender counts as a kill request, so losing the handle
            // never leaks the child.
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Some(pid) = pid {
                        force_kill_tree(pid).await;
                    }
                    let _ = child.start_kill();
                    child.wait().await
                }
            };

            // Publish the exit only after the final output lines are captured.
            for pump in pumps {
                let _ = timeout(DRAIN_WAIT, pump).await;
            }

            let text = match status {
                Ok(status) => status.to_string(),
                Err(e) => format!("wait failed: {}", e),
            };
            if expected.load(Ordering::SeqCst) {
                info!(pid = ?pid, status = %text, "Transcoder exited");
            } else {
                warn!(pid = ?pid, status = %text, "Transcoder exited unexpectedly");
            }
            let _ = exit_tx.send(Some(text));
        });

        Ok(Self {
            pid,
            monitor: ProcessMonitor {
                started,
                exit: exit_rx,
                diagnostics,
            },
            terminating,
            kill_tx: Some(kill_tx),
            grace,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn monitor(&self) -> ProcessMonitor {
        self.monitor.clone()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.monitor.diagnostics
    }

    /// Whether this handle still controls a process (not yet terminated).
    pub fn is_live(&self) -> bool {
        self.kill_tx.is_some() && !self.monitor.has_exited()
    }

    /// Ask the process to stop, escalating to a forced kill after the grace window.
    ///
    /// Idempotent: a second call, or a call after the process already exited,
    /// returns immediately. The handle is cleared in every case.
    pub async fn terminate(&mut self) {
        let Some(kill_tx) = self.kill_tx.take() else {
            return;
        };
        if self.monitor.has_exited() {
            debug!(pid = ?self.pid, "Transcoder already exited");
            return;
        }
        self.terminating.store(true, Ordering::SeqCst);

        if let Some(pid) = self.pid {
            request_stop(pid).await;
        }
        if timeout(self.grace, self.monitor.wait_exit()).await.is_ok() {
            return;
        }

        warn!(
            pid = ?self.pid,
            grace_ms = self.grace.as_millis() as u64,
            "Transcoder ignored stop request, killing"
        );
        let _ = kill_tx.send(());
        if timeout(FORCE_WAIT, self.monitor.wait_exit()).await.is_err() {
            warn!(pid = ?self.pid, "Transcoder still not reaped after kill");
        }
    }
}

/// Copy output into diagnostics line by line. ffmpeg redraws its progress line
/// with `\r`, so both `\r` and `\n` end a line.
async fn pump_output<R>(mut reader: R, diagnostics: Diagnostics, started: Arc<AtomicBool>)
where
    R: AsyncRead + Unpin,
{
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &byte in &chunk[..n] {
            if byte == b'\n' || byte == b'\r' {
                flush_line(&mut pending, &diagnostics, &started);
            } else {
                pending.push(byte);
                if pending.len() >= MAX_LINE {
                    flush_line(&mut pending, &diagnostics, &started);
                }
            }
        }
    }
    flush_line(&mut pending, &diagnostics, &started);
}

fn flush_line(pending: &mut Vec<u8>, diagnostics: &Diagnostics, started: &AtomicBool) {
    if pending.is_empty() {
        return;
    }
    let line = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    if line.trim().is_empty() {
        return;
    }

    debug!(target: "hls_relay::transcoder", "{}", line);
    if !started.load(Ordering::SeqCst) && START_MARKERS.iter().any(|m| line.contains(m)) {
        started.store(true, Ordering::SeqCst);
        info!("Transcoder started processing the source");
    }
    diagnostics.push(&line);
}

#[cfg(unix)]
async fn request_stop(pid: u32) {
    signal_group(pid, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(unix)]
async fn force_kill_tree(pid: u32) {
    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
}

/// The child leads its own process group, so its pid doubles as the group id.
#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => debug!(pid, ?signal, "Signalled transcoder process group"),
        Err(Errno::ESRCH) => debug!(pid, "Transcoder process group already gone"),
        Err(e) => warn!(pid, ?signal, error = %e, "Failed to signal transcoder"),
    }
}

#[cfg(windows)]
async fn request_stop(pid: u32) {
    taskkill(pid, false).await;
}

#[cfg(windows)]
async fn force_kill_tree(pid: u32) {
    taskkill(pid, true).await;
}

/// Windows has no process-group signals; `taskkill /T` walks the tree instead.
#[cfg(windows)]
async fn taskkill(pid: u32, force: bool) {
    let mut cmd = Command::new("taskkill");
    cmd.arg("/PID").arg(pid.to_string()).arg("/T");
    if force {
        cmd.arg("/F");
    }
    cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
    match cmd.status().await {
        Ok(status) => debug!(pid, force, %status, "taskkill finished"),
        Err(e) => warn!(pid, force, error = %e, "Failed to run taskkill"),
    }
}
