/// Notification buffer decoding: raw OS bytes to discrete entries.
///
/// Everything here is a pure function over a byte slice: no I/O, no state,
/// no platform APIs. Each submodule understands one wire layout and yields a
/// lazy, finite iterator of `Result<_, DecodeError>`, so the decoders can be
/// exercised on any host with synthetic buffers.
///
/// - [`fni`]: the Windows `FILE_NOTIFY_INFORMATION` chain.
/// - [`inotify`]: the Linux `inotify_event` stream.
///
/// A malformed buffer never panics. The watch loop decodes a whole batch up
/// front and discards it if any entry fails.
pub mod fni;
pub mod inotify;

pub use fni::{decode_fni, FniEntries, FNI_HEADER_SIZE};
pub use inotify::{decode_inotify, InotifyEntries, InotifyEntry, INOTIFY_HEADER_SIZE};

use compact_str::CompactString;

/// A notification buffer that could not be walked to the end.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated entry header at offset {offset} ({available} bytes left)")]
    TruncatedHeader { offset: usize, available: usize },

    #[error("entry name at offset {offset} needs {needed} bytes, only {available} left")]
    TruncatedName {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("next-entry offset {next} at offset {offset} does not advance past the entry")]
    BadOffset { offset: usize, next: usize },

    #[error("next-entry offset {next} at offset {offset} is not 4-byte aligned")]
    Misaligned { offset: usize, next: usize },
}

/// What the OS says happened to a name, before classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RawAction {
    Added,
    Removed,
    Modified,
    RenamedOldName,
    RenamedNewName,
    /// The kernel dropped notifications; there is no name to report.
    Overflow,
    /// An action code this crate has no special handling for.
    Other(u32),
}

/// One decoded `FILE_NOTIFY_INFORMATION` record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawEntry {
    pub action: RawAction,
    /// Name relative to the watched root, converted lossily from UTF-16.
    pub name: CompactString,
}
