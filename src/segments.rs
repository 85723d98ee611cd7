//! HTTP listener that exposes the playlist and numbered segments of one session.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::io::ReaderStream;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::StreamError;
use crate::output::is_segment_name;

pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

/// How long in-flight responses get to finish before the server task is aborted.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

struct SegmentState {
    dir: PathBuf,
    playlist_name: String,
}

/// Build the router for `dir`. Only `/<playlist_name>` and `/stream_<digits>.ts` resolve.
pub fn router(dir: PathBuf, playlist_name: String) -> Router {
    let state = Arc::new(SegmentState { dir, playlist_name });

    Router::new()
        .route("/:file", get(serve_file))
        .fallback(not_found)
        .with_state(state)
        // Playlists and the newest segment are rewritten in place; nothing may cache them.
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(header::EXPIRES, HeaderValue::from_static("0")))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(TraceLayer::new_for_http())
}

async fn serve_file(State(state): State<Arc<SegmentState>>, Path(file): Path<String>) -> Response {
    let content_type = if file == state.playlist_name {
        PLAYLIST_CONTENT_TYPE
    } else if is_segment_name(&file) {
        SEGMENT_CONTENT_TYPE
    } else {
        return not_found().await.into_response();
    };

    let path = state.dir.join(&file);
    let handle = match tokio::fs::File::open(&path).await {
        Ok(handle) => handle,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return not_found().await.into_response(),
        Err(e) => {
            warn!(file = %path.display(), error = %e, "Failed to open stream file");
            return (StatusCode::INTERNAL_SERVER_ERROR, "failed to read stream file")
                .into_response();
        }
    };

    // Streamed, never buffered whole; a read error mid-body aborts only this response.
    let body = Body::from_stream(ReaderStream::new(handle));
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found")
}

/// A bound, serving segment listener. Closing (or dropping) it releases the port.
#[derive(Debug)]
pub struct SegmentServer {
    port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SegmentServer {
    /// Bind `host:port` and start serving `dir`. Port 0 picks any free port.
    pub async fn bind(
        host: &str,
        port: u16,
        dir: PathBuf,
        playlist_name: String,
    ) -> Result<Self, StreamError> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| StreamError::PortBindFailed {
                port,
                reason: e.to_string(),
            })?;
        let port = listener.local_addr().map(|addr| addr.port()).unwrap_or(port);
        info!(port, dir = %dir.display(), "Segment server listening");

        let app = router(dir, playlist_name);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                warn!(port, error = %e, "Segment server stopped with error");
            }
        });

        Ok(Self {
            port,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_open(&self) -> bool {
        self.task.is_some()
    }

    /// Stop accepting, let in-flight responses drain briefly, then abort.
    /// Returns once the listener is gone. Safe to call repeatedly.
    pub async fn close(&mut self) {
        let Some(mut task) = self.task.take() else {
            return;
        };
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if timeout(CLOSE_GRACE, &mut task).await.is_err() {
            task.abort();
            let _ = task.await;
        }
        info!(port = self.port, "Segment server closed");
    }
}

impl Drop for SegmentServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
