/// A normalized filesystem change, as delivered to an event sink.
///
/// Records are plain values: produced by the watch loop, handed to the sink
/// once, then dropped. They carry no identity beyond their fields and are
/// never reordered or deduplicated.
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// The stable event taxonomy every raw OS notification is reduced to.
///
/// The discriminants are part of the C boundary and must never change.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created = 0,
    Modified = 1,
    Deleted = 2,
}

impl ChangeKind {
    /// Short lowercase label used in logs and CLI output.
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One change under the watched root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    /// Absolute path of the entry that changed.
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl ChangeRecord {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The path as UTF-8, replacing anything the OS gave us that is not
    /// valid Unicode with U+FFFD.
    pub fn path_lossy(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.path.display())
    }
}
