/// Errors surfaced to callers of the watcher.
///
/// Only start-up can fail from the caller's point of view. Read and decode
/// failures happen on the watch thread and are absorbed there (logged, then
/// retried or skipped), so they never appear in this type.
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("watch root {0} does not exist")]
    NotFound(PathBuf),

    #[error("watch root {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("permission denied opening {0}")]
    PermissionDenied(PathBuf),

    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("directory watching is not supported on this platform")]
    Unsupported,

    #[error("failed to spawn watch thread: {0}")]
    Spawn(#[source] io::Error),
}

impl StartError {
    /// Sort an I/O error from opening `path` into the caller-facing variants.
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => StartError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => StartError::PermissionDenied(path.to_path_buf()),
            _ => StartError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }
}
