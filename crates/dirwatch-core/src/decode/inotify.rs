/// Decoder for the Linux `inotify_event` stream.
///
/// `read(2)` on an inotify descriptor returns records packed back to back:
///
/// ```text
/// 0   wd      i32
/// 4   mask    u32   IN_*
/// 8   cookie  u32   pairs IN_MOVED_FROM with IN_MOVED_TO
/// 12  len     u32   size of name, including NUL padding
/// 16  name    [u8; len]
/// ```
///
/// There is no next-entry pointer: a record ends where its name ends, and the
/// stream ends with the buffer. Fields are native-endian.
use super::{DecodeError, RawAction};
use compact_str::CompactString;
use std::iter::FusedIterator;

/// Size of `struct inotify_event` without the trailing name.
pub const INOTIFY_HEADER_SIZE: usize = 16;

// Kernel ABI values, duplicated here so decoding does not depend on libc.
pub const IN_MODIFY: u32 = 0x0000_0002;
pub const IN_ATTRIB: u32 = 0x0000_0004;
pub const IN_CLOSE_WRITE: u32 = 0x0000_0008;
pub const IN_MOVED_FROM: u32 = 0x0000_0040;
pub const IN_MOVED_TO: u32 = 0x0000_0080;
pub const IN_CREATE: u32 = 0x0000_0100;
pub const IN_DELETE: u32 = 0x0000_0200;
pub const IN_DELETE_SELF: u32 = 0x0000_0400;
pub const IN_MOVE_SELF: u32 = 0x0000_0800;
pub const IN_UNMOUNT: u32 = 0x0000_2000;
pub const IN_Q_OVERFLOW: u32 = 0x0000_4000;
pub const IN_IGNORED: u32 = 0x0000_8000;
pub const IN_ISDIR: u32 = 0x4000_0000;

impl RawAction {
    /// Map an inotify event mask. The first matching bit wins.
    pub fn from_inotify_mask(mask: u32) -> Self {
        if mask & IN_Q_OVERFLOW != 0 {
            RawAction::Overflow
        } else if mask & IN_CREATE != 0 {
            RawAction::Added
        } else if mask & IN_DELETE != 0 {
            RawAction::Removed
        } else if mask & IN_MOVED_FROM != 0 {
            RawAction::RenamedOldName
        } else if mask & IN_MOVED_TO != 0 {
            RawAction::RenamedNewName
        } else if mask & (IN_MODIFY | IN_CLOSE_WRITE | IN_ATTRIB) != 0 {
            RawAction::Modified
        } else {
            RawAction::Other(mask)
        }
    }
}

/// One decoded `inotify_event`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InotifyEntry {
    /// Watch descriptor the name is relative to; `-1` for queue overflow.
    pub wd: i32,
    pub mask: u32,
    pub cookie: u32,
    /// Name with NUL padding stripped, converted lossily from bytes.
    /// Empty when the event concerns the watched directory itself.
    pub name: CompactString,
}

impl InotifyEntry {
    pub fn action(&self) -> RawAction {
        RawAction::from_inotify_mask(self.mask)
    }

    pub fn is_dir(&self) -> bool {
        self.mask & IN_ISDIR != 0
    }

    /// Housekeeping events about the watch itself rather than a child name.
    pub fn is_watch_event(&self) -> bool {
        self.mask & (IN_IGNORED | IN_DELETE_SELF | IN_MOVE_SELF | IN_UNMOUNT) != 0
    }
}

/// Walk the bytes returned by one `read(2)` call.
pub fn decode_inotify(buffer: &[u8]) -> InotifyEntries<'_> {
    InotifyEntries {
        buf: buffer,
        offset: 0,
        done: false,
    }
}

/// Lazy iterator over an inotify read buffer.
pub struct InotifyEntries<'a> {
    buf: &'a [u8],
    offset: usize,
    done: bool,
}

impl Iterator for InotifyEntries<'_> {
    type Item = Result<InotifyEntry, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset == self.buf.len() {
            self.done = true;
            return None;
        }

        let offset = self.offset;
        let available = self.buf.len() - offset;
        if available < INOTIFY_HEADER_SIZE {
            self.done = true;
            return Some(Err(DecodeError::TruncatedHeader { offset, available }));
        }

        let wd = i32::from_ne_bytes(field(self.buf, offset));
        let mask = u32::from_ne_bytes(field(self.buf, offset + 4));
        let cookie = u32::from_ne_bytes(field(self.buf, offset + 8));
        let len = u32::from_ne_bytes(field(self.buf, offset + 12)) as usize;

        let name_start = offset + INOTIFY_HEADER_SIZE;
        let name_available = available - INOTIFY_HEADER_SIZE;
        if len > name_available {
            self.done = true;
            return Some(Err(DecodeError::TruncatedName {
                offset,
                needed: len,
                available: name_available,
            }));
        }

        let raw = &self.buf[name_start..name_start + len];
        let raw = match raw.iter().position(|&b| b == 0) {
            Some(nul) => &raw[..nul],
            None => raw,
        };
        self.offset = name_start + len;

        Some(Ok(InotifyEntry {
            wd,
            mask,
            cookie,
            name: CompactString::from(String::from_utf8_lossy(raw)),
        }))
    }
}

impl FusedIterator for InotifyEntries<'_> {}

#[inline]
fn field(buf: &[u8], at: usize) -> [u8; 4] {
    [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]
}
