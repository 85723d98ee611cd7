//! hls-relay - RTSP camera to local HLS stream, with HTTP and gRPC control.
//!
//! Usage:
//!   hls-relay serve [--port 8080] [--grpc-port 50051]   # Start control servers
//!   hls-relay start <URL> [--transport udp] [--audio]   # Stream in the foreground
//!   hls-relay test <URL> [--timeout 10]                  # One-shot connectivity check
//!   hls-relay probe                                      # Is ffmpeg usable?

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hls_relay::config::{Settings, StreamConfig, Transport, VideoMode};
use hls_relay::probe;
use hls_relay::session::SessionController;
use hls_relay::state::AppState;
use hls_relay::{grpc_server, http_server};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "hls-relay")]
#[command(about = "Relay an RTSP camera as an HLS stream on localhost")]
struct Args {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the playlist and segments
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP (and gRPC) control servers
    Serve {
        /// HTTP control port
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// gRPC control port
        #[arg(long, default_value = "50051")]
        grpc_port: u16,
        /// Do not start the gRPC server
        #[arg(long)]
        no_grpc: bool,
    },
    /// Stream a source until interrupted
    Start {
        url: String,
        #[arg(long, value_enum, default_value_t)]
        transport: Transport,
        /// Include the audio track (AAC)
        #[arg(long)]
        audio: bool,
        #[arg(long, value_enum, default_value_t)]
        video: VideoMode,
        /// Downscale to this height when the source is taller
        #[arg(long)]
        max_height: Option<u32>,
    },
    /// Check that a source is reachable and report its video track
    Test {
        url: String,
        /// Seconds before giving up
        #[arg(long, default_value = "10")]
        timeout: u64,
        #[arg(long, value_enum, default_value_t)]
        transport: Transport,
    },
    /// Check that the transcoder is installed and runnable
    Probe,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(dir) = args.output_dir {
        settings.output_dir = Some(dir);
    }

    match args.command {
        Commands::Serve {
            port,
            grpc_port,
            no_grpc,
        } => serve(settings, port, (!no_grpc).then_some(grpc_port)).await,
        Commands::Start {
            url,
            transport,
            audio,
            video,
            max_height,
        } => {
            let config = StreamConfig {
                transport,
                audio,
                video,
                max_height,
                ..StreamConfig::default()
            };
            run_foreground(settings, url, config).await
        }
        Commands::Test { url, timeout, transport } => {
            let controller = SessionController::new(settings);
            match controller.test(&url, transport, Duration::from_secs(timeout.max(1))).await {
                Ok(info) => {
                    println!("OK: {} {}", info.codec, info.resolution);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Probe => match probe::version(&settings.transcoder).await {
            Some(banner) => {
                println!("{}", banner);
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!(
                    "Error: transcoder {:?} is not installed or not runnable",
                    settings.transcoder
                );
                Ok(ExitCode::FAILURE)
            }
        },
    }
}

async fn serve(settings: Settings, port: u16, grpc_port: Option<u16>) -> Result<ExitCode> {
    let state = AppState::new(settings);
    let host = state.settings.bind_host.clone();

    let mut http = tokio::spawn({
        let state = state.clone();
        let host = host.clone();
        async move { http_server::run_server(&host, port, state).await }
    });
    let grpc = grpc_port.map(|grpc_port| {
        let state = state.clone();
        let host = host.clone();
        tokio::spawn(async move { grpc_server::run_server(&host, grpc_port, state).await })
    });

    let mut http_result = None;
    let trigger = tokio::select! {
        trigger = shutdown_signal() => trigger,
        _ = state.quit.cancelled() => "control api",
        result = &mut http => {
            http_result = Some(result);
            "http server exit"
        }
    };

    state.controller.shutdown(trigger).await;
    state.quit.cancel();

    let http_result = match http_result {
        Some(result) => result,
        None => http.await,
    };
    let mut failed = report("HTTP server", http_result);
    if let Some(grpc) = grpc {
        failed |= report("gRPC server", grpc.await);
    }
    info!("Shutdown complete");
    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

/// Log a server task's outcome; true when it failed.
fn report(name: &str, result: Result<Result<()>, tokio::task::JoinError>) -> bool {
    match result {
        Ok(Ok(())) => false,
        Ok(Err(e)) => {
            error!("{} error: {:#}", name, e);
            true
        }
        Err(e) => {
            error!("{} task failed: {}", name, e);
            true
        }
    }
}

async fn run_foreground(settings: Settings, url: String, config: StreamConfig) -> Result<ExitCode> {
    let controller = SessionController::new(settings);

    let stream_url = tokio::select! {
        result = controller.start(url, config) => result,
        trigger = shutdown_signal() => {
            controller.shutdown(trigger).await;
            return Ok(ExitCode::FAILURE);
        }
    };
    let stream_url = match stream_url {
        Ok(stream_url) => stream_url,
        Err(e) => {
            eprintln!("Error [{}]: {}", e.cause(), e);
            for line in e.diagnostics() {
                eprintln!("  {}", line);
            }
            return Ok(ExitCode::FAILURE);
        }
    };
    println!("{}", stream_url);

    let code = tokio::select! {
        trigger = shutdown_signal() => {
            controller.shutdown(trigger).await;
            ExitCode::SUCCESS
        }
        status = controller.process_exit() => {
            warn!(status = status.as_deref().unwrap_or("unknown"), "Transcoder exited");
            controller.stop().await;
            ExitCode::FAILURE
        }
    };
    Ok(code)
}

/// Resolve on SIGINT or SIGTERM, naming the trigger.
async fn shutdown_signal() -> &'static str {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received SIGINT, shutting down...");
            "SIGINT"
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
            "SIGTERM"
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()).context("Failed to install SIGTERM handler") {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("{:#}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
