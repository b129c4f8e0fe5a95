//! HTTP front end for the radiocast broadcast engine.
//!
//! Listeners connect to `GET /stream` and receive whatever is currently
//! on air; the broadcast itself is driven through `POST /broadcast/start`
//! and `POST /broadcast/stop`.

mod config;
mod routes;

pub use config::ServerConfig;
pub use routes::{router, ApiError, AppState};

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::Context;
use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use radiocast_engine::StreamingSession;
use radiocast_ipc::{event_channel, SessionEvent};
use radiocast_media::FileService;
use radiocast_relay::ClientRegistry;

/// Initialize logging.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "radiocast=debug,radiocast_server=debug,radiocast_engine=debug,radiocast_relay=debug,radiocast_media=debug,tower_http=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Log every session event until all senders are gone.
pub fn spawn_event_drain(event_rx: Receiver<SessionEvent>) -> anyhow::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("radiocast-events".to_string())
        .spawn(move || {
            for event in event_rx.iter() {
                log_event(&event);
            }
            debug!("Event channel closed");
        })
        .context("Failed to spawn event thread")
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged { previous, current } => {
            info!(previous = %previous.name(), current = %current.name(), "Session state changed");
            if let radiocast_ipc::SessionState::Stopped { reason } = current.as_ref() {
                info!("Broadcast stopped: {}", reason.message());
            }
        }
        SessionEvent::ListenerJoined {
            client_id,
            listeners,
        } => info!(%client_id, listeners, "Listener joined"),
        SessionEvent::ListenerLeft {
            client_id,
            listeners,
        } => info!(%client_id, listeners, "Listener left"),
        SessionEvent::BitrateFallback { source, reason } => {
            warn!(%source, %reason, "Broadcasting at fallback bitrate")
        }
        SessionEvent::Metrics(metrics) => debug!(?metrics, "Broadcast metrics"),
    }
}

/// Run the server until interrupted.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    info!("radiocast starting");

    let (event_tx, event_rx) = event_channel();
    spawn_event_drain(event_rx)?;

    let registry = Arc::new(
        ClientRegistry::new(config.broadcast.client_buffer_chunks).with_events(event_tx.clone()),
    );
    let session =
        Arc::new(StreamingSession::new(config.broadcast.clone(), registry).with_events(event_tx));
    let files = FileService::new(&config.public_root);

    if let Some(source) = &config.autostart {
        match files.resolve(&source.to_string_lossy()).await {
            Ok(path) => {
                if let Err(e) = session.start(&path).await {
                    warn!("Autostart failed: {}", e);
                }
            }
            Err(e) => warn!("Autostart source unavailable: {}", e),
        }
    }

    let app = router(AppState {
        session: Arc::clone(&session),
        files,
    });

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!(addr = %config.bind, root = %config.public_root.display(), "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&session)))
        .await
        .context("Server terminated unexpectedly")?;

    info!("radiocast stopped");
    Ok(())
}

/// Stop broadcasting and disconnect every listener.
///
/// Listener bodies only end once their sinks are gone, so graceful
/// shutdown waits on this before open connections can close.
pub async fn wind_down(session: &StreamingSession) {
    if session.stop().await {
        info!("Broadcast stopped for shutdown");
    }

    let disconnected = session.registry().clear();
    info!(disconnected, "Listeners disconnected");
}

async fn shutdown_signal(session: Arc<StreamingSession>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
    wind_down(&session).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use radiocast_ipc::BroadcastConfig;
    use tower::ServiceExt;

    fn session() -> Arc<StreamingSession> {
        let config = BroadcastConfig {
            probe_tool: "/nonexistent/radiocast-bitrate-tool".to_string(),
            ..Default::default()
        };
        Arc::new(StreamingSession::new(
            config,
            Arc::new(ClientRegistry::default()),
        ))
    }

    #[tokio::test]
    async fn test_wind_down_ends_listener_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let session = session();
        let app = router(AppState {
            session: Arc::clone(&session),
            files: FileService::new(dir.path()),
        });

        let response = app
            .oneshot(Request::get("/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(session.registry().len(), 1);

        wind_down(&session).await;
        assert!(session.registry().is_empty());

        let body = tokio::time::timeout(
            Duration::from_secs(5),
            to_bytes(response.into_body(), usize::MAX),
        )
        .await
        .expect("listener body should end after wind down")
        .unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_wind_down_stops_live_broadcast() {
        let session = session();
        let (_keep_open, live) = tokio::io::duplex(64);
        let handle = session.start_reader("live", live, 8_000);
        let (_id, _listener) = session.registry().add();

        wind_down(&session).await;
        assert!(handle.is_ended());
        assert!(session.state().is_stopped());
        assert!(session.registry().is_empty());
    }
}
