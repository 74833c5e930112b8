/// dirwatch core: watch a directory subtree and report what changed.
///
/// Raw OS notifications are decoded, reduced to `Created | Modified |
/// Deleted`, and handed to an [`EventSink`] on a dedicated watch thread.
/// This crate has no FFI; the C boundary lives in `dirwatch-ffi`.
///
/// # Modules
///
/// - [`model`]: [`ChangeRecord`] and [`ChangeKind`].
/// - [`decode`]: pure decoders for `FILE_NOTIFY_INFORMATION` and `inotify_event` buffers.
/// - [`classify`]: raw action → change kind, plus the extension filter.
/// - [`platform`]: per-OS adapters around the native blocking wait.
/// - [`monitor`]: the watch loop and the [`WatcherHandle`] lifecycle.
/// - [`config`]: [`WatchConfig`] and the retry [`BackoffPolicy`].
pub mod classify;
pub mod config;
pub mod decode;
pub mod error;
pub mod model;
pub mod monitor;
pub mod platform;

pub use config::{BackoffPolicy, ConfigError, WatchConfig};
pub use error::StartError;
pub use model::{ChangeKind, ChangeRecord};
pub use monitor::{EventSink, LoopState, WatcherHandle};
