//! Tracking of the transfer a session currently owns.

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use radiocast_relay::{PipelineOutcome, ThrottleHandle};

/// A running source → throttle → multiplexer transfer.
#[derive(Debug)]
pub(crate) struct ActiveTransfer {
    /// Generation issued when the transfer was tracked.
    pub generation: u64,

    /// Label of the source, for logging.
    pub source: String,

    /// Handle that ends the transfer's throttle.
    pub handle: ThrottleHandle,

    /// The task driving the pipeline.
    pub task: JoinHandle<PipelineOutcome>,
}

#[derive(Debug, Default)]
struct SlotInner {
    latest_generation: u64,
    active: Option<ActiveTransfer>,
}

/// Holds at most one tracked transfer.
///
/// Generations are issued in tracking order, under the same lock that
/// installs the transfer, so the most recently tracked transfer is always
/// the current one no matter how long each start spent probing.
#[derive(Debug, Default)]
pub(crate) struct TransferSlot {
    inner: Mutex<SlotInner>,
}

impl TransferSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a generation, build the transfer for it and track it.
    ///
    /// `build` runs with the slot locked, so nothing can end or replace the
    /// transfer before it is installed. Any previously tracked transfer
    /// keeps running; only its tracking is lost.
    pub fn track_with(&self, build: impl FnOnce(u64) -> ActiveTransfer) -> u64 {
        let mut inner = self.inner.lock();
        inner.latest_generation += 1;
        let generation = inner.latest_generation;

        let transfer = build(generation);

        if let Some(previous) = inner.active.take() {
            if !previous.task.is_finished() {
                warn!(
                    previous = %previous.source,
                    current = %transfer.source,
                    "Replacing a running transfer; the previous one is no longer tracked"
                );
            }
        }

        debug!(generation, source = %transfer.source, "Tracking transfer");
        inner.active = Some(transfer);
        generation
    }

    /// Stop tracking the current transfer and hand it to the caller.
    pub fn take(&self) -> Option<ActiveTransfer> {
        self.inner.lock().active.take()
    }

    /// Run `on_end` and untrack the transfer if `generation` is still tracked.
    ///
    /// The slot stays locked while `on_end` runs, so a concurrent `stop`
    /// or `start` observes either the state before or after it.
    pub fn end_if_current(&self, generation: u64, on_end: impl FnOnce()) -> bool {
        let mut inner = self.inner.lock();

        let current = inner
            .active
            .as_ref()
            .is_some_and(|active| active.generation == generation);

        if current {
            inner.active = None;
            on_end();
        }

        current
    }

    /// Run `on_idle` if no transfer is tracked.
    pub fn when_idle(&self, on_idle: impl FnOnce()) -> bool {
        let inner = self.inner.lock();
        let idle = inner.active.is_none();
        if idle {
            on_idle();
        }
        idle
    }

    /// Get the tracked transfer's throttle handle.
    pub fn handle(&self) -> Option<ThrottleHandle> {
        self.inner.lock().active.as_ref().map(|a| a.handle.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use radiocast_relay::PipelineEnd;

    fn finished_transfer(generation: u64, source: &str) -> ActiveTransfer {
        ActiveTransfer {
            generation,
            source: source.to_string(),
            handle: ThrottleHandle::new(),
            task: tokio::spawn(async {
                PipelineOutcome {
                    end: PipelineEnd::Exhausted,
                    bytes_read: 0,
                }
            }),
        }
    }

    #[tokio::test]
    async fn test_track_and_take() {
        let slot = TransferSlot::new();
        assert!(slot.handle().is_none());
        assert!(slot.take().is_none());

        slot.track_with(|generation| finished_transfer(generation, "a.mp3"));
        assert!(slot.handle().is_some());

        let transfer = slot.take().unwrap();
        assert_eq!(transfer.source, "a.mp3");
        assert!(slot.handle().is_none());
    }

    #[tokio::test]
    async fn test_generations_follow_tracking_order() {
        let slot = TransferSlot::new();

        let first = slot.track_with(|generation| finished_transfer(generation, "a.mp3"));
        let second = slot.track_with(|generation| finished_transfer(generation, "b.mp3"));
        assert!(second > first);

        // The replaced transfer can no longer end the session.
        let mut ran = false;
        assert!(!slot.end_if_current(first, || ran = true));
        assert!(!ran);
        assert!(slot.handle().is_some());

        assert!(slot.end_if_current(second, || ran = true));
        assert!(ran);
        assert!(slot.handle().is_none());
    }

    #[tokio::test]
    async fn test_taken_transfer_is_not_current() {
        let slot = TransferSlot::new();
        let generation = slot.track_with(|generation| finished_transfer(generation, "a.mp3"));

        let _transfer = slot.take();
        assert!(!slot.end_if_current(generation, || panic!("must not run")));
    }

    #[tokio::test]
    async fn test_when_idle_skips_tracked_slot() {
        let slot = TransferSlot::new();
        let mut ran = false;
        assert!(slot.when_idle(|| ran = true));
        assert!(ran);

        slot.track_with(|generation| finished_transfer(generation, "a.mp3"));
        assert!(!slot.when_idle(|| panic!("must not run")));
    }
}
