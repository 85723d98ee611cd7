//! Typed failures for a stream start attempt.

use std::path::PathBuf;
use thiserror::Error;

/// Why a start attempt (or one of its phases) failed.
///
/// Every variant renders a message specific enough to show to a user as-is.
/// Variants raised after the transcoder was launched carry the tail of its
/// captured output.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    #[error("ffmpeg is not installed or not runnable; install ffmpeg and make sure it is on PATH")]
    NotInstalled,

    #[error("failed to launch ffmpeg: {reason}")]
    SpawnFailed {
        reason: String,
        diagnostics: Vec<String>,
    },

    #[error("could not bind the segment server on port {port}: {reason}")]
    PortBindFailed { port: u16, reason: String },

    #[error(
        "ffmpeg did not start reading the stream within {waited_secs}s; \
         check the URL, credentials and that the camera is reachable"
    )]
    StartTimeout {
        waited_secs: u64,
        diagnostics: Vec<String>,
    },

    #[error("ffmpeg is running but produced no playable segment within {waited_secs}s")]
    GenerationTimeout {
        waited_secs: u64,
        diagnostics: Vec<String>,
    },

    #[error("ffmpeg exited {when} ({status})")]
    ProcessDied {
        status: String,
        when: &'static str,
        diagnostics: Vec<String>,
    },

    #[error("output directory {} is not writable: {reason}", path.display())]
    WriteDenied { path: PathBuf, reason: String },

    #[error("start request was cancelled by a newer start or a stop")]
    Superseded,

    #[error("internal error: {0}")]
    Internal(String),
}

impl StreamError {
    /// Stable machine-readable cause, used by the control APIs.
    pub fn cause(&self) -> &'static str {
        match self {
            StreamError::NotInstalled => "not-installed",
            StreamError::SpawnFailed { .. } => "spawn-failed",
            StreamError::PortBindFailed { .. } => "port-bind-failed",
            StreamError::StartTimeout { .. } => "start-timeout",
            StreamError::GenerationTimeout { .. } => "generation-timeout",
            StreamError::ProcessDied { .. } => "process-died",
            StreamError::WriteDenied { .. } => "write-denied",
            StreamError::Superseded => "superseded",
            StreamError::Internal(_) => "internal",
        }
    }

    /// Captured transcoder output attached to this failure, oldest first.
    pub fn diagnostics(&self) -> &[String] {
        match self {
            StreamError::SpawnFailed { diagnostics, .. }
            | StreamError::StartTimeout { diagnostics, .. }
            | StreamError::GenerationTimeout { diagnostics, .. }
            | StreamError::ProcessDied { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn causes_are_kebab_case_and_distinct() {
        let errors = [
            StreamError::NotInstalled,
            StreamError::SpawnFailed {
                reason: "x".into(),
                diagnostics: vec![],
            },
            StreamError::PortBindFailed {
                port: 1,
                reason: "x".into(),
            },
            StreamError::StartTimeout {
                waited_secs: 10,
                diagnostics: vec![],
            },
            StreamError::GenerationTimeout {
                waited_secs: 30,
                diagnostics: vec![],
            },
            StreamError::ProcessDied {
                status: "exit status: 1".into(),
                when: "mid-stream",
                diagnostics: vec![],
            },
            StreamError::WriteDenied {
                path: PathBuf::from("/x"),
                reason: "x".into(),
            },
            StreamError::Superseded,
            StreamError::Internal("x".into()),
        ];
        let mut causes: Vec<_> = errors.iter().map(|e| e.cause()).collect();
        assert!(causes.iter().all(|c| !c.contains('_') && !c.contains(' ')));
        causes.sort();
        causes.dedup();
        assert_eq!(causes.len(), errors.len());
    }

    #[test]
    fn diagnostics_only_on_process_failures() {
        let err = StreamError::StartTimeout {
            waited_secs: 10,
            diagnostics: vec!["Connection refused".into()],
        };
        assert_eq!(err.diagnostics(), ["Connection refused".to_string()]);
        assert!(StreamError::NotInstalled.diagnostics().is_empty());
        assert!(err.to_string().contains("10s"));
    }
}
