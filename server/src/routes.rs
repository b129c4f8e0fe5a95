//! HTTP handlers.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

use radiocast_engine::{EngineError, StreamingSession};
use radiocast_ipc::{BroadcastMetrics, SessionState};
use radiocast_media::{FileService, MediaError};
use radiocast_relay::{ClientId, ClientRegistry, ClientStream};

/// Content type announced to listeners.
const STREAM_CONTENT_TYPE: &str = "audio/mpeg";

/// State shared with every handler.
#[derive(Clone)]
pub struct AppState {
    /// The broadcast session.
    pub session: Arc<StreamingSession>,

    /// Lookup of sources and static files.
    pub files: FileService,
}

/// Error returned by a handler, rendered as a JSON body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// The HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

impl From<MediaError> for ApiError {
    fn from(e: MediaError) -> Self {
        let status = match e {
            MediaError::NotFound(_) => StatusCode::NOT_FOUND,
            MediaError::OutsideRoot(_) => StatusCode::FORBIDDEN,
            MediaError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = if e.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

/// Body of `POST /broadcast/start`.
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    /// Source path relative to the public root.
    pub path: String,
}

/// Response of the broadcast control endpoints.
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    /// Whether the request changed anything.
    pub changed: bool,

    /// Session state after the request.
    pub state: SessionState,
}

/// Response of `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Current session state.
    pub state: SessionState,

    /// Current metrics.
    pub metrics: BroadcastMetrics,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stream", get(stream_listener))
        .route("/broadcast/start", post(start_broadcast))
        .route("/broadcast/stop", post(stop_broadcast))
        .route("/status", get(status))
        .route("/files/*path", get(serve_file))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A listener's stream that deregisters the listener when dropped.
///
/// The response body owns it, so the registry entry goes away as soon as
/// the connection does, whether or not a broadcast is running.
struct ListenerStream {
    client_id: ClientId,
    stream: ClientStream,
    registry: Arc<ClientRegistry>,
}

impl Stream for ListenerStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        Pin::new(&mut self.stream).poll_next(cx)
    }
}

impl Drop for ListenerStream {
    fn drop(&mut self) {
        debug!(client_id = %self.client_id, "Listener disconnected");
        self.registry.remove(&self.client_id);
    }
}

/// Register the caller as a listener and stream the broadcast to it.
async fn stream_listener(State(state): State<AppState>) -> Response {
    let registry = Arc::clone(state.session.registry());
    let (client_id, stream) = registry.add();
    debug!(client_id = %client_id, "Listener connected");

    let listener = ListenerStream {
        client_id,
        stream,
        registry,
    };
    let body = Body::from_stream(listener.map(Ok::<_, Infallible>));
    (
        [
            (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

#[instrument(skip(state))]
async fn start_broadcast(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<Json<ControlResponse>, ApiError> {
    let source = state.files.resolve(&request.path).await?;
    state.session.start(&source).await?;

    Ok(Json(ControlResponse {
        changed: true,
        state: state.session.state(),
    }))
}

#[instrument(skip(state))]
async fn stop_broadcast(State(state): State<AppState>) -> Json<ControlResponse> {
    let changed = state.session.stop().await;
    if !changed {
        info!("Stop requested with no broadcast running");
    }

    Json(ControlResponse {
        changed,
        state: state.session.state(),
    })
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        state: state.session.state(),
        metrics: state.session.metrics(),
    })
}

async fn serve_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let info = state.files.file_info(&path).await.map_err(|e| {
        if !e.is_not_found() {
            warn!(request = %path, "File request failed: {}", e);
        }
        e
    })?;

    let file = tokio::fs::File::open(&info.path)
        .await
        .map_err(MediaError::from)?;

    Ok((
        [
            (header::CONTENT_TYPE, info.content_type.to_string()),
            (header::CONTENT_LENGTH, info.size.to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
