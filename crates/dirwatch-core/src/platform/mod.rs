/// Platform adapters for the native notification primitive.
///
/// An adapter owns the OS handle for one watch root and turns one blocking
/// wait into a [`WaitOutcome`]: decoded entries already resolved to absolute
/// paths, or the reason there are none. Byte-level decoding lives in
/// [`crate::decode`]; classification and delivery live in the watch loop, so
/// both stay platform-independent.
///
/// - Linux: `inotify`, woken for cancellation through an `eventfd`.
/// - Windows: overlapped `ReadDirectoryChangesW`, woken through a manual-reset
///   event and cancelled with `CancelIoEx`.
#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(windows)]
pub mod win32;

use crate::config::WatchConfig;
use crate::decode::{DecodeError, RawAction};
use crate::error::StartError;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A raw entry whose name has been joined onto the directory it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub action: RawAction,
    pub path: PathBuf,
}

impl ResolvedEntry {
    pub fn new(action: RawAction, path: impl Into<PathBuf>) -> Self {
        Self {
            action,
            path: path.into(),
        }
    }
}

/// Result of one blocking wait on the native primitive.
#[derive(Debug)]
pub enum WaitOutcome {
    /// Entries decoded from one read, in the order the OS reported them.
    Batch(Vec<ResolvedEntry>),
    /// The read returned no bytes (queue overflow or a spurious wake-up).
    Empty,
    /// The buffer could not be decoded; the whole read is dropped.
    Malformed(DecodeError),
    /// The wait was interrupted by [`CancelWait::cancel`].
    Cancelled,
    /// The wait failed for any other reason.
    Failed(io::Error),
}

/// One watch root's side of the native primitive, driven by the watch loop.
pub trait NotifySource: Send {
    /// Block until the OS reports changes, the wait is cancelled, or it fails.
    ///
    /// Once cancelled, every later call must return [`WaitOutcome::Cancelled`]
    /// without blocking.
    fn wait(&mut self) -> WaitOutcome;
}

/// Forces a pending [`NotifySource::wait`] to return, from another thread.
pub trait CancelWait: Send + Sync {
    fn cancel(&self);
}

/// An opened watch: the source moves to the watch thread, the canceller
/// stays with the controller.
pub struct NativeWatch {
    pub source: Box<dyn NotifySource>,
    pub canceller: Arc<dyn CancelWait>,
}

/// Open the native primitive on `root`, which must be an existing directory.
pub fn open(root: &Path, config: &WatchConfig) -> Result<NativeWatch, StartError> {
    #[cfg(target_os = "linux")]
    {
        linux::open(root, config)
    }
    #[cfg(windows)]
    {
        win32::open(root, config)
    }
    #[cfg(not(any(target_os = "linux", windows)))]
    {
        let _ = (root, config);
        Err(StartError::Unsupported)
    }
}
