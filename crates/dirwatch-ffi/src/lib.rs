/// C ABI for dirwatch.
///
/// The boundary is narrow and data-only: a fixed-value event
/// enum, a NUL-terminated path, and a plain function pointer. All buffering,
/// retry and classification stays on this side; the host is a passive sink.
///
/// ```c
/// void start_file_watcher(const char* path, FileEventCallback callback);
/// void stop_file_watcher(void);
/// ```
///
/// The process holds exactly one watcher. `start_file_watcher` while it is
/// running is a no-op that keeps the first callback; `stop_file_watcher`
/// blocks until the watch thread has exited and is safe to call at any time.
/// From inside the callback, `stop_file_watcher` only signals the watch and
/// `start_file_watcher` is ignored; neither waits on a concurrent stop.
/// The matching header is `include/file_watcher.h`.
use dirwatch_core::{ChangeKind, ChangeRecord, EventSink, StartError, WatcherHandle};
use std::ffi::{c_char, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{error, warn};

/// Bumped whenever a type or signature in this file changes.
pub const ABI_VERSION: u32 = 1;

/// Event kinds as seen by the host. Values are fixed.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileEventType {
    Created = 0,
    Modified = 1,
    Deleted = 2,
}

impl From<ChangeKind> for FileEventType {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Created => FileEventType::Created,
            ChangeKind::Modified => FileEventType::Modified,
            ChangeKind::Deleted => FileEventType::Deleted,
        }
    }
}

/// Called on the watch thread once per change. `file_path` is only valid
/// for the duration of the call.
pub type FileEventCallback = extern "C" fn(file_path: *const c_char, event_type: FileEventType);

/// Result of [`start_file_watcher_checked`].
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileWatcherStatus {
    Ok = 0,
    InvalidArgument = 1,
    NotFound = 2,
    NotADirectory = 3,
    PermissionDenied = 4,
    Io = 5,
    Unsupported = 6,
}

impl From<&StartError> for FileWatcherStatus {
    fn from(err: &StartError) -> Self {
        match err {
            StartError::NotFound(_) => FileWatcherStatus::NotFound,
            StartError::NotADirectory(_) => FileWatcherStatus::NotADirectory,
            StartError::PermissionDenied(_) => FileWatcherStatus::PermissionDenied,
            StartError::Io { .. } | StartError::Spawn(_) => FileWatcherStatus::Io,
            StartError::Unsupported => FileWatcherStatus::Unsupported,
        }
    }
}

static WATCHER: OnceLock<WatcherHandle> = OnceLock::new();

fn watcher() -> &'static WatcherHandle {
    WATCHER.get_or_init(WatcherHandle::new)
}

/// Adapts the host's function pointer to an [`EventSink`].
struct CallbackSink(FileEventCallback);

impl EventSink for CallbackSink {
    fn deliver(&self, record: &ChangeRecord) {
        let path = match CString::new(record.path_lossy()) {
            Ok(p) => p,
            Err(_) => {
                warn!("dropping record with interior NUL in path: {:?}", record.path);
                return;
            }
        };
        (self.0)(path.as_ptr(), FileEventType::from(record.kind));
    }
}

#[cfg(unix)]
fn path_from_c(raw: &CStr) -> PathBuf {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(OsStr::from_bytes(raw.to_bytes()))
}

#[cfg(not(unix))]
fn path_from_c(raw: &CStr) -> PathBuf {
    PathBuf::from(raw.to_string_lossy().into_owned())
}

/// Start watching `path`. Failures are logged only; use
/// [`start_file_watcher_checked`] to observe them.
///
/// # Safety
///
/// `path` must be null or a valid NUL-terminated string for the duration of
/// the call. `callback` must stay callable until `stop_file_watcher` returns.
#[no_mangle]
pub unsafe extern "C" fn start_file_watcher(
    path: *const c_char,
    callback: Option<FileEventCallback>,
) {
    // SAFETY: forwarded caller contract.
    let _ = unsafe { start_file_watcher_checked(path, callback) };
}

/// Start watching `path`, reporting why the watch could not start.
///
/// Returns `Ok` without doing anything if a watch is already running.
///
/// # Safety
///
/// Same contract as [`start_file_watcher`].
#[no_mangle]
pub unsafe extern "C" fn start_file_watcher_checked(
    path: *const c_char,
    callback: Option<FileEventCallback>,
) -> FileWatcherStatus {
    let Some(callback) = callback else {
        warn!("start_file_watcher: null callback");
        return FileWatcherStatus::InvalidArgument;
    };
    if path.is_null() {
        warn!("start_file_watcher: null path");
        return FileWatcherStatus::InvalidArgument;
    }
    // SAFETY: non-null and NUL-terminated per the caller contract.
    let root = path_from_c(unsafe { CStr::from_ptr(path) });

    let started = catch_unwind(AssertUnwindSafe(|| {
        watcher().start(&root, CallbackSink(callback))
    }));
    match started {
        Ok(Ok(())) => FileWatcherStatus::Ok,
        Ok(Err(err)) => {
            error!("start_file_watcher: {err}");
            FileWatcherStatus::from(&err)
        }
        Err(_) => {
            error!("start_file_watcher: panicked while starting {:?}", root);
            FileWatcherStatus::Io
        }
    }
}

/// Stop the running watch and wait for the watch thread to exit.
#[no_mangle]
pub extern "C" fn stop_file_watcher() {
    let Some(watcher) = WATCHER.get() else {
        return;
    };
    if catch_unwind(AssertUnwindSafe(|| watcher.stop())).is_err() {
        error!("stop_file_watcher: panicked while stopping");
    }
}

#[no_mangle]
pub extern "C" fn file_watcher_is_running() -> bool {
    WATCHER.get().is_some_and(WatcherHandle::is_running)
}

#[no_mangle]
pub extern "C" fn file_watcher_abi_version() -> u32 {
    ABI_VERSION
}

/// Install a stderr `tracing` subscriber honouring `RUST_LOG` (default
/// `info`). Later calls, or a host that already installed one, are ignored.
#[no_mangle]
pub extern "C" fn file_watcher_init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_event_type_values_are_fixed() {
        assert_eq!(FileEventType::Created as i32, 0);
        assert_eq!(FileEventType::Modified as i32, 1);
        assert_eq!(FileEventType::Deleted as i32, 2);
        assert_eq!(FileEventType::from(ChangeKind::Deleted), FileEventType::Deleted);
    }

    #[test]
    fn test_header_matches_event_values() {
        let header = include_str!("../include/file_watcher.h");
        for (name, value) in [("Created", 0), ("Modified", 1), ("Deleted", 2)] {
            assert!(header.contains(&format!("    {name} = {value}")), "{name}");
            let c_name = format!("FILE_EVENT_{}", name.to_ascii_uppercase());
            assert!(header.contains(&format!("    {c_name} = {value}")), "{c_name}");
        }
        assert!(header.contains("enum class FileEventType : int"));
    }

    #[test]
    fn test_status_mapping() {
        let p = Path::new("/x");
        assert_eq!(
            FileWatcherStatus::from(&StartError::NotFound(p.into())),
            FileWatcherStatus::NotFound
        );
        assert_eq!(
            FileWatcherStatus::from(&StartError::NotADirectory(p.into())),
            FileWatcherStatus::NotADirectory
        );
        assert_eq!(
            FileWatcherStatus::from(&StartError::Spawn(std::io::Error::other("x"))),
            FileWatcherStatus::Io
        );
        assert_eq!(
            FileWatcherStatus::from(&StartError::Unsupported),
            FileWatcherStatus::Unsupported
        );
    }

    #[test]
    fn test_path_from_c() {
        let raw = CString::new("/tmp/w").unwrap();
        assert_eq!(path_from_c(&raw), PathBuf::from("/tmp/w"));
    }

    #[test]
    fn test_abi_version() {
        assert_eq!(file_watcher_abi_version(), 1);
    }
}
