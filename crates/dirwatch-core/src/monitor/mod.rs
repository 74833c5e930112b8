/// Watcher lifecycle: run a watch on a background thread and tear it down.
///
/// Built on the same shape as a scan handle: the caller gets an owned
/// [`WatcherHandle`], the work runs on a named thread, and a shared flag asks
/// it to stop. Unlike a fire-and-forget scan, `stop` also wakes the blocked
/// native wait and joins the thread, so when it returns the OS handle is
/// closed and no further record will be delivered.
///
/// # Usage
///
/// ```ignore
/// let watcher = WatcherHandle::new();
/// let (tx, rx) = crossbeam_channel::unbounded();
/// watcher.start("/tmp/w", tx)?;
/// // receive ChangeRecords on rx
/// watcher.stop();
/// ```
///
/// # One session per handle
///
/// A handle runs at most one session. `start` while a session is active
/// leaves it untouched (same root, same sink) and returns `Ok(())`. `stop`
/// with no session is a no-op. Independent handles are fully independent.
///
/// # Locking
///
/// `start` and `stop` serialise on a lifecycle lock that is held across the
/// open and the join. The accessors only take the session lock, which is
/// never held across a join, so a sink may call them at any time. Calls that
/// arrive on the handle's own watch thread skip the lifecycle lock: `stop`
/// only signals the loop, and `start` is a no-op because the session is
/// still live.
pub mod sink;
pub mod state;
pub(crate) mod watch_loop;

#[cfg(test)]
pub(crate) mod testing;

pub use sink::EventSink;
pub use state::LoopState;

use crate::classify::ExtensionFilter;
use crate::config::WatchConfig;
use crate::error::StartError;
use crate::platform::{self, CancelWait, NativeWatch};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use state::SharedState;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, info};
use watch_loop::{run_watch_loop, LoopContext};

/// Owner of at most one live watch session.
pub struct WatcherHandle {
    config: WatchConfig,
    /// Held by `start` and `stop` for their whole duration, so a new native
    /// handle is never opened while the previous one is still being released.
    lifecycle: Mutex<()>,
    /// The session stays here until its thread has been joined.
    session: Mutex<Option<Session>>,
}

struct Session {
    root: PathBuf,
    stop: Arc<AtomicBool>,
    canceller: Arc<dyn CancelWait>,
    shutdown_tx: Option<Sender<()>>,
    state: SharedState,
    thread_id: ThreadId,
    thread: Option<JoinHandle<()>>,
}

impl Default for WatcherHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl WatcherHandle {
    pub fn new() -> Self {
        Self::with_config(WatchConfig::default())
    }

    pub fn with_config(config: WatchConfig) -> Self {
        Self {
            config: config.validated(),
            lifecycle: Mutex::new(()),
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Start watching `path` recursively, delivering records to `sink` on a
    /// dedicated thread.
    ///
    /// Fails without spawning anything if `path` is not an existing,
    /// openable directory. A no-op if this handle is already watching.
    pub fn start<S: EventSink>(&self, path: impl AsRef<Path>, sink: S) -> Result<(), StartError> {
        let path = path.as_ref();
        if self.on_watch_thread() {
            debug!("Watch: start for {:?} from the watch thread ignored", path);
            return Ok(());
        }

        let _lifecycle = self.lifecycle.lock();
        if self.reap_if_active(path) {
            return Ok(());
        }

        let root = resolve_root(path)?;
        let native = platform::open(&root, &self.config)?;
        let session = self.spawn_session(root, native, Box::new(sink))?;
        *self.session.lock() = Some(session);
        Ok(())
    }

    /// Stop the active session and wait until its thread has exited and the
    /// native handle is closed. Safe to call at any time, any number of times.
    ///
    /// Called from the sink, this only signals the loop; it exits once the
    /// sink returns.
    pub fn stop(&self) {
        if self.on_watch_thread() {
            if let Some(session) = self.session.lock().as_mut() {
                session.signal();
            }
            return;
        }

        let _lifecycle = self.lifecycle.lock();
        self.teardown();
    }

    /// Whether a session exists and its loop has not exited.
    pub fn is_running(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|s| s.state.get() != LoopState::Closed)
    }

    pub fn state(&self) -> LoopState {
        self.session
            .lock()
            .as_ref()
            .map_or(LoopState::Idle, |s| s.state.get())
    }

    /// Root of the active session, if any.
    pub fn root(&self) -> Option<PathBuf> {
        self.session.lock().as_ref().map(|s| s.root.clone())
    }

    fn on_watch_thread(&self) -> bool {
        let current = thread::current().id();
        self.session
            .lock()
            .as_ref()
            .is_some_and(|s| s.thread_id == current)
    }

    /// Signal, join and clear the current session. Caller holds the
    /// lifecycle lock.
    fn teardown(&self) {
        let thread = {
            let mut slot = self.session.lock();
            let Some(session) = slot.as_mut() else {
                return;
            };
            session.signal();
            session.thread.take()
        };

        // The session lock is released here, so the sink can still reach
        // the accessors while the loop finishes its current delivery.
        if let Some(thread) = thread {
            if thread.join().is_err() {
                error!("Watch: watch thread panicked");
            }
        }

        if let Some(session) = self.session.lock().take() {
            info!("Stopped watching {}", session.root.display());
        }
    }

    /// Returns `true` if a live session occupies the slot. A session whose
    /// loop already gave up is joined and cleared so a new one can start.
    /// Caller holds the lifecycle lock.
    fn reap_if_active(&self, requested: &Path) -> bool {
        let closed = match self.session.lock().as_ref() {
            Some(session) if session.state.get() != LoopState::Closed => {
                debug!(
                    "Watch: already active on {:?}; ignoring start for {:?}",
                    session.root, requested
                );
                return true;
            }
            Some(_) => true,
            None => false,
        };
        if closed {
            self.teardown();
        }
        false
    }

    fn spawn_session(
        &self,
        root: PathBuf,
        native: NativeWatch,
        sink: Box<dyn EventSink>,
    ) -> Result<Session, StartError> {
        let NativeWatch { source, canceller } = native;
        let stop = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let state = SharedState::new(LoopState::Opening);

        let ctx = LoopContext {
            root: root.clone(),
            sink,
            stop: Arc::clone(&stop),
            shutdown_rx,
            state: state.clone(),
            backoff: self.config.backoff.clone(),
            filter: ExtensionFilter::new(&self.config.excluded_extensions),
        };

        let thread = thread::Builder::new()
            .name(thread_name(&root))
            .spawn(move || run_watch_loop(source, ctx))
            .map_err(StartError::Spawn)?;

        info!("Watching {}", root.display());

        Ok(Session {
            root,
            stop,
            canceller,
            shutdown_tx: Some(shutdown_tx),
            state,
            thread_id: thread.thread().id(),
            thread: Some(thread),
        })
    }

    #[cfg(test)]
    pub(crate) fn start_native<S: EventSink>(
        &self,
        root: impl Into<PathBuf>,
        native: NativeWatch,
        sink: S,
    ) -> Result<(), StartError> {
        let root = root.into();
        if self.on_watch_thread() {
            return Ok(());
        }
        let _lifecycle = self.lifecycle.lock();
        if self.reap_if_active(&root) {
            return Ok(());
        }
        let session = self.spawn_session(root, native, Box::new(sink))?;
        *self.session.lock() = Some(session);
        Ok(())
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Session {
    /// Ask the loop to exit: set the flag, wake the native wait and cut any
    /// backoff pause short. Idempotent.
    fn signal(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.canceller.cancel();
        drop(self.shutdown_tx.take());
    }
}

fn resolve_root(path: &Path) -> Result<PathBuf, StartError> {
    let metadata = std::fs::metadata(path).map_err(|e| StartError::from_io(path, e))?;
    if !metadata.is_dir() {
        return Err(StartError::NotADirectory(path.to_path_buf()));
    }
    std::path::absolute(path).map_err(|e| StartError::from_io(path, e))
}

fn thread_name(root: &Path) -> String {
    let leaf = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.to_string_lossy().into_owned());
    format!("dirwatch-{leaf}")
}
