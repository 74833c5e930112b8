/// Watch session lifecycle states, shared between controller and loop.
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// `Idle → Opening → Watching → (Error | Stopping) → Closed`.
///
/// A handle with no session reports `Idle`; an open failure returns the
/// handle to `Idle` without ever spawning a thread.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle = 0,
    Opening = 1,
    Watching = 2,
    Stopping = 3,
    /// The retry policy ran out; the loop is on its way to `Closed`.
    Error = 4,
    Closed = 5,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LoopState::Idle,
            1 => LoopState::Opening,
            2 => LoopState::Watching,
            3 => LoopState::Stopping,
            4 => LoopState::Error,
            _ => LoopState::Closed,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub(crate) fn new(state: LoopState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub(crate) fn set(&self, state: LoopState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub(crate) fn get(&self) -> LoopState {
        LoopState::from_u8(self.0.load(Ordering::Acquire))
    }
}
