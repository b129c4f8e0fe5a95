//! The broadcast session state machine.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use tokio::fs::File;
use tokio::io::AsyncRead;
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

use radiocast_ipc::{BroadcastConfig, BroadcastMetrics, SessionEvent, SessionState, StopReason};
use radiocast_media::{BitrateProbe, CommandProbe};
use radiocast_relay::{
    ClientRegistry, Multiplexer, Pipeline, PipelineEnd, Throttle, ThrottleHandle,
};

use crate::error::EngineError;
use crate::metrics::MetricsCollector;
use crate::state::{ActiveTransfer, TransferSlot};
use crate::{EngineResult, METRICS_INTERVAL};

/// Session state plus the channel its transitions are announced on.
#[derive(Clone)]
struct StateTracker {
    state: Arc<RwLock<SessionState>>,
    event_tx: Option<Sender<SessionEvent>>,
}

impl StateTracker {
    fn get(&self) -> SessionState {
        self.state.read().clone()
    }

    fn transition_to(&self, new_state: SessionState) {
        let previous = {
            let mut state = self.state.write();
            let prev = state.clone();
            *state = new_state.clone();
            prev
        };

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        self.send_event(SessionEvent::StateChanged {
            previous: Box::new(previous),
            current: Box::new(new_state),
        });
    }

    fn send_event(&self, event: SessionEvent) {
        if let Some(tx) = &self.event_tx {
            if let Err(e) = tx.try_send(event) {
                warn!("Failed to send event: {}", e);
            }
        }
    }
}

/// Orchestrates one broadcast at a time: probe, pace, fan out, stop.
///
/// Listeners live in the shared [`ClientRegistry`] and are independent of
/// any particular transfer, so they survive a stop and receive the next
/// broadcast without reconnecting.
pub struct StreamingSession {
    config: BroadcastConfig,
    probe: Arc<dyn BitrateProbe>,
    registry: Arc<ClientRegistry>,
    states: StateTracker,
    transfers: Arc<TransferSlot>,
    metrics: Arc<MetricsCollector>,
}

impl StreamingSession {
    /// Create a session that probes with the configured command-line tool.
    pub fn new(config: BroadcastConfig, registry: Arc<ClientRegistry>) -> Self {
        let probe = CommandProbe::new(
            &config.probe_tool,
            Duration::from_millis(config.probe_timeout_ms),
            config.fallback_bitrate_bps,
        );

        Self {
            config,
            probe: Arc::new(probe),
            registry,
            states: StateTracker {
                state: Arc::new(RwLock::new(SessionState::Idle)),
                event_tx: None,
            },
            transfers: Arc::new(TransferSlot::new()),
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    /// Use a different bitrate probe.
    pub fn with_probe(mut self, probe: Arc<dyn BitrateProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Announce state changes and metrics on `event_tx`.
    pub fn with_events(mut self, event_tx: Sender<SessionEvent>) -> Self {
        self.states.event_tx = Some(event_tx);
        self
    }

    /// Start broadcasting the file at `path`.
    ///
    /// The bitrate is probed first; probing cannot fail, it falls back to
    /// the configured bitrate instead. The returned handle ends this
    /// particular transfer even after a later `start` has replaced it as
    /// the tracked one.
    #[instrument(name = "start_session", skip(self, path), fields(source = %path.display()))]
    pub async fn start(&self, path: &Path) -> EngineResult<ThrottleHandle> {
        let source = path.display().to_string();

        info!("Starting broadcast");
        self.states.transition_to(SessionState::Probing {
            source: source.clone(),
        });

        let bitrate = self.probe.probe(path).await;
        if bitrate.is_fallback() {
            self.states.send_event(SessionEvent::BitrateFallback {
                source: source.clone(),
                reason: format!("{} probe yielded no usable bitrate", self.probe.name()),
            });
        }

        let file = match File::open(path).await {
            Ok(file) => file,
            Err(e) => {
                let error = if e.kind() == std::io::ErrorKind::NotFound {
                    EngineError::SourceNotFound(path.to_path_buf())
                } else {
                    EngineError::Source(e)
                };

                error!("Broadcast start failed: {}", error);
                self.states.transition_to(SessionState::Stopped {
                    reason: StopReason::SourceFailed {
                        message: error.to_string(),
                    },
                });
                return Err(error);
            }
        };

        Ok(self.spawn_transfer(source, file, bitrate.bits_per_second()))
    }

    /// Start broadcasting an already open stream at a known bitrate.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_reader<R>(&self, label: &str, reader: R, bitrate_bps: u32) -> ThrottleHandle
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        info!(source = %label, bitrate_bps, "Starting live broadcast");
        self.spawn_transfer(label.to_string(), reader, bitrate_bps)
    }

    fn spawn_transfer<R>(&self, source: String, reader: R, bitrate_bps: u32) -> ThrottleHandle
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let throttle = Throttle::create(
            bitrate_bps,
            Duration::from_millis(self.config.pacing_interval_ms),
        );
        let handle = throttle.handle();

        // The task must not finish before it is tracked, or its end would
        // look superseded.
        let (tracked_tx, tracked_rx) = oneshot::channel::<()>();

        // Going live and tracking happen under the slot lock, so the last
        // transfer to go live is always the tracked one (and owns the
        // metrics), however long each start spent probing.
        let generation = self.transfers.track_with(|generation| {
            let statistics = self.metrics.start(bitrate_bps);
            let multiplexer = Multiplexer::new(
                Arc::clone(&self.registry),
                Duration::from_millis(self.config.sink_write_timeout_ms),
            )
            .with_statistics(statistics);

            let pipeline = Pipeline::new(
                reader,
                throttle.connect(multiplexer),
                self.config.read_chunk_size,
                handle.clone(),
            );

            self.states.transition_to(SessionState::Streaming {
                source: source.clone(),
                bitrate_bps,
            });

            let states = self.states.clone();
            let transfers = Arc::clone(&self.transfers);
            let metrics = Arc::clone(&self.metrics);
            let registry = Arc::clone(&self.registry);

            let task = tokio::spawn(async move {
                let _ = tracked_rx.await;

                let run = pipeline.run();
                tokio::pin!(run);

                let mut ticker = tokio::time::interval(METRICS_INTERVAL);
                ticker.tick().await;

                let outcome = loop {
                    tokio::select! {
                        outcome = &mut run => break outcome,
                        _ = ticker.tick() => {
                            states.send_event(SessionEvent::Metrics(metrics.snapshot(registry.len())));
                        }
                    }
                };

                let current = transfers.end_if_current(generation, || {
                    metrics.stop();
                    let reason = match &outcome.end {
                        PipelineEnd::Exhausted => StopReason::SourceExhausted,
                        PipelineEnd::Ended => StopReason::UserRequested,
                        PipelineEnd::Failed(message) => StopReason::SourceFailed {
                            message: message.clone(),
                        },
                    };
                    states.transition_to(SessionState::Stopped { reason });
                });

                if !current {
                    debug!(generation, "Untracked transfer finished");
                }

                outcome
            });

            ActiveTransfer {
                generation,
                source,
                handle: handle.clone(),
                task,
            }
        });

        debug!(generation, "Transfer live");
        let _ = tracked_tx.send(());

        handle
    }

    /// Stop the tracked transfer and wait for it to drain.
    ///
    /// Returns false, doing nothing, when no transfer is tracked.
    #[instrument(name = "stop_session", skip(self))]
    pub async fn stop(&self) -> bool {
        let Some(transfer) = self.transfers.take() else {
            debug!("No transfer tracked, ignoring stop");
            return false;
        };

        info!(source = %transfer.source, "Stopping broadcast");
        transfer.handle.end();

        match transfer.task.await {
            Ok(outcome) => debug!(bytes_read = outcome.bytes_read, "Transfer drained"),
            Err(e) => warn!("Transfer task failed: {}", e),
        }

        // A start that went live while this one drained keeps the session.
        let idle = self.transfers.when_idle(|| {
            self.metrics.stop();
            self.states.transition_to(SessionState::Stopped {
                reason: StopReason::UserRequested,
            });
        });

        if idle {
            info!("Broadcast stopped");
        } else {
            info!("Broadcast stopped; a newer transfer is live");
        }
        true
    }

    /// Get the current state.
    pub fn state(&self) -> SessionState {
        self.states.get()
    }

    /// Returns true while a transfer is streaming.
    pub fn is_streaming(&self) -> bool {
        self.states.state.read().is_streaming()
    }

    /// Get the listener registry.
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Get the handle of the tracked transfer, if any.
    pub fn current_handle(&self) -> Option<ThrottleHandle> {
        self.transfers.handle()
    }

    /// Get current metrics snapshot.
    pub fn metrics(&self) -> BroadcastMetrics {
        self.metrics.snapshot(self.registry.len())
    }

    /// Get the broadcast configuration.
    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        if let Some(transfer) = self.transfers.take() {
            transfer.handle.end();
        }
    }
}
