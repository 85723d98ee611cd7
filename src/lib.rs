//! hls-relay: turn one RTSP camera feed into an HLS stream served on localhost.
//!
//! A single [`session::SessionController`] owns at most one ffmpeg process and
//! one segment listener at a time. The HTTP and gRPC servers are thin control
//! surfaces over it.

pub mod command;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod grpc_server;
pub mod http_server;
pub mod output;
pub mod port;
pub mod probe;
pub mod readiness;
pub mod segments;
pub mod session;
pub mod state;
pub mod supervisor;
