//! Scripted stand-ins for the native primitive, for loop and handle tests.

use crate::platform::{CancelWait, NativeWatch, NotifySource, WaitOutcome};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A source fed through a channel. It blocks like the real primitive until
/// an outcome is pushed or it is cancelled; a dropped feeder counts as a
/// cancel.
pub(crate) struct FakeSource {
    feed: Receiver<WaitOutcome>,
    cancelled: Arc<AtomicBool>,
}

pub(crate) struct FakeCanceller(Arc<AtomicBool>);

impl NotifySource for FakeSource {
    fn wait(&mut self) -> WaitOutcome {
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return WaitOutcome::Cancelled;
            }
            match self.feed.recv_timeout(Duration::from_millis(5)) {
                Ok(outcome) => return outcome,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return WaitOutcome::Cancelled,
            }
        }
    }
}

impl CancelWait for FakeCanceller {
    fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// A fake watch plus the sender that scripts it.
pub(crate) fn fake_watch() -> (NativeWatch, Sender<WaitOutcome>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let cancelled = Arc::new(AtomicBool::new(false));
    let native = NativeWatch {
        source: Box::new(FakeSource {
            feed: rx,
            cancelled: Arc::clone(&cancelled),
        }),
        canceller: Arc::new(FakeCanceller(cancelled)),
    };
    (native, tx)
}

/// A source that replays a fixed script, then reports cancellation.
pub(crate) fn scripted(outcomes: Vec<WaitOutcome>) -> Box<dyn NotifySource> {
    let (native, tx) = fake_watch();
    for outcome in outcomes {
        let _ = tx.send(outcome);
    }
    drop(tx);
    native.source
}
