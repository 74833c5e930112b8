/// Decoder for the Windows `FILE_NOTIFY_INFORMATION` chain.
///
/// Layout of one record (little-endian, 4-byte aligned):
///
/// ```text
/// 0   NextEntryOffset  u32   0 = last record
/// 4   Action           u32   FILE_ACTION_*
/// 8   FileNameLength   u32   in bytes
/// 12  FileName         [u16; FileNameLength / 2], not NUL-terminated
/// ```
///
/// The decoder reads fields with `from_le_bytes` instead of casting the
/// buffer to the Win32 struct, so it runs (and is tested) on every target.
use super::{DecodeError, RawAction, RawEntry};
use compact_str::CompactString;
use std::iter::FusedIterator;

/// Size of the fixed part of a record, before the name.
pub const FNI_HEADER_SIZE: usize = 12;

pub const FILE_ACTION_ADDED: u32 = 1;
pub const FILE_ACTION_REMOVED: u32 = 2;
pub const FILE_ACTION_MODIFIED: u32 = 3;
pub const FILE_ACTION_RENAMED_OLD_NAME: u32 = 4;
pub const FILE_ACTION_RENAMED_NEW_NAME: u32 = 5;

impl RawAction {
    /// Map a `FILE_ACTION_*` code.
    pub fn from_fni_code(code: u32) -> Self {
        match code {
            FILE_ACTION_ADDED => RawAction::Added,
            FILE_ACTION_REMOVED => RawAction::Removed,
            FILE_ACTION_MODIFIED => RawAction::Modified,
            FILE_ACTION_RENAMED_OLD_NAME => RawAction::RenamedOldName,
            FILE_ACTION_RENAMED_NEW_NAME => RawAction::RenamedNewName,
            other => RawAction::Other(other),
        }
    }
}

/// Walk the first `buffer.len()` bytes of a notification buffer.
///
/// Pass only the bytes the kernel reported as transferred.
pub fn decode_fni(buffer: &[u8]) -> FniEntries<'_> {
    FniEntries {
        buf: buffer,
        offset: 0,
        done: buffer.is_empty(),
    }
}

/// Lazy iterator over a `FILE_NOTIFY_INFORMATION` chain.
///
/// Yields at most one `Err`, after which it is exhausted.
pub struct FniEntries<'a> {
    buf: &'a [u8],
    offset: usize,
    done: bool,
}

impl FniEntries<'_> {
    fn fail(&mut self, err: DecodeError) -> Option<Result<RawEntry, DecodeError>> {
        self.done = true;
        Some(Err(err))
    }
}

impl Iterator for FniEntries<'_> {
    type Item = Result<RawEntry, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let offset = self.offset;
        let available = self.buf.len().saturating_sub(offset);
        if available < FNI_HEADER_SIZE {
            return self.fail(DecodeError::TruncatedHeader { offset, available });
        }

        let next = read_u32(self.buf, offset) as usize;
        let action = read_u32(self.buf, offset + 4);
        let name_len = read_u32(self.buf, offset + 8) as usize;

        let name_start = offset + FNI_HEADER_SIZE;
        let name_available = available - FNI_HEADER_SIZE;
        if name_len > name_available {
            return self.fail(DecodeError::TruncatedName {
                offset,
                needed: name_len,
                available: name_available,
            });
        }

        // An odd byte count is malformed; the trailing byte is dropped.
        let units: Vec<u16> = self.buf[name_start..name_start + name_len]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let entry = RawEntry {
            action: RawAction::from_fni_code(action),
            name: CompactString::from(String::from_utf16_lossy(&units)),
        };

        if next == 0 {
            self.done = true;
        } else if next < FNI_HEADER_SIZE + name_len {
            return self.fail(DecodeError::BadOffset { offset, next });
        } else if next % 4 != 0 {
            return self.fail(DecodeError::Misaligned { offset, next });
        } else {
            self.offset = offset + next;
        }

        Some(Ok(entry))
    }
}

impl FusedIterator for FniEntries<'_> {}

#[inline]
fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
