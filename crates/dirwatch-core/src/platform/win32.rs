/// Windows adapter: overlapped `ReadDirectoryChangesW`.
///
/// The directory handle is opened with `FILE_FLAG_OVERLAPPED` so a pending
/// read can be cancelled. Each wait issues one read and then blocks in
/// `WaitForMultipleObjects` on two manual-reset events: the I/O completion
/// event and the cancel event set by [`CancelEvent::cancel`]. On cancel the
/// pending read is aborted with `CancelIoEx` and drained before returning, so
/// the kernel no longer references the `OVERLAPPED` or the buffer.
use super::{CancelWait, NativeWatch, NotifySource, ResolvedEntry, WaitOutcome};
use crate::config::WatchConfig;
use crate::decode::decode_fni;
use crate::error::StartError;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use windows::core::PCWSTR;
use windows::Win32::Foundation::{
    CloseHandle, ERROR_NOTIFY_ENUM_DIR, ERROR_OPERATION_ABORTED, HANDLE,
};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, ReadDirectoryChangesW, FILE_FLAGS_AND_ATTRIBUTES, FILE_FLAG_BACKUP_SEMANTICS,
    FILE_FLAG_OVERLAPPED, FILE_LIST_DIRECTORY, FILE_NOTIFY_CHANGE, FILE_NOTIFY_CHANGE_DIR_NAME,
    FILE_NOTIFY_CHANGE_FILE_NAME, FILE_NOTIFY_CHANGE_LAST_WRITE, FILE_SHARE_DELETE,
    FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::Threading::{
    CreateEventW, ResetEvent, SetEvent, WaitForMultipleObjects, INFINITE,
};
use windows::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};

const FILTER: FILE_NOTIFY_CHANGE = FILE_NOTIFY_CHANGE(
    FILE_NOTIFY_CHANGE_FILE_NAME.0 | FILE_NOTIFY_CHANGE_LAST_WRITE.0 | FILE_NOTIFY_CHANGE_DIR_NAME.0,
);

/// A kernel handle closed exactly once, on drop.
struct OwnedHandle(HANDLE);

// SAFETY: kernel handles are process-wide and may be used or closed from any
// thread; the wrapper never hands out the raw value beyond a call.
unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// The manual-reset event that interrupts [`DirectorySource::wait`].
pub struct CancelEvent(OwnedHandle);

pub struct DirectorySource {
    root: PathBuf,
    dir: OwnedHandle,
    io_event: OwnedHandle,
    cancel: Arc<CancelEvent>,
    /// `u32` storage keeps the buffer DWORD-aligned as the API requires.
    buffer: Vec<u32>,
    recursive: bool,
}

fn create_event(root: &Path) -> Result<OwnedHandle, StartError> {
    // SAFETY: unnamed manual-reset event, initially non-signalled.
    unsafe { CreateEventW(None, true, false, None) }
        .map(OwnedHandle)
        .map_err(|e| StartError::from_io(root, io::Error::from(e)))
}

pub fn open(root: &Path, config: &WatchConfig) -> Result<NativeWatch, StartError> {
    let wide_path: Vec<u16> = root
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0u16))
        .collect();

    // SAFETY: `wide_path` is NUL-terminated and outlives the call.
    let dir = unsafe {
        CreateFileW(
            PCWSTR(wide_path.as_ptr()),
            FILE_LIST_DIRECTORY.0,
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
            None,
            OPEN_EXISTING,
            FILE_FLAGS_AND_ATTRIBUTES(FILE_FLAG_BACKUP_SEMANTICS.0 | FILE_FLAG_OVERLAPPED.0),
            None,
        )
    }
    .map(OwnedHandle)
    .map_err(|e| StartError::from_io(root, io::Error::from(e)))?;

    let io_event = create_event(root)?;
    let cancel = Arc::new(CancelEvent(create_event(root)?));

    debug!("ReadDirectoryChangesW: watching {}", root.display());

    let source = DirectorySource {
        root: root.to_path_buf(),
        dir,
        io_event,
        cancel: Arc::clone(&cancel),
        buffer: vec![0u32; config.buffer_size / 4],
        recursive: config.recursive,
    };

    Ok(NativeWatch {
        source: Box::new(source),
        canceller: cancel,
    })
}

impl DirectorySource {
    fn resolve(&self, len: usize) -> WaitOutcome {
        let len = len.min(self.buffer.len() * 4);
        // SAFETY: the u32 buffer is valid for `buffer.len() * 4` bytes and the
        // read has completed, so the kernel no longer writes to it.
        let bytes = unsafe { std::slice::from_raw_parts(self.buffer.as_ptr().cast::<u8>(), len) };

        let mut batch = Vec::new();
        for entry in decode_fni(bytes) {
            match entry {
                Ok(entry) => batch.push(ResolvedEntry::new(
                    entry.action,
                    self.root.join(entry.name.as_str()),
                )),
                Err(err) => return WaitOutcome::Malformed(err),
            }
        }
        WaitOutcome::Batch(batch)
    }

    /// Abort the read described by `overlapped` and wait for the kernel to
    /// release it.
    fn abort_pending(&self, overlapped: &OVERLAPPED) {
        unsafe {
            let _ = CancelIoEx(self.dir.0, Some(overlapped));
            let mut transferred = 0u32;
            let _ = GetOverlappedResult(self.dir.0, overlapped, &mut transferred, true);
        }
    }
}

impl NotifySource for DirectorySource {
    fn wait(&mut self) -> WaitOutcome {
        let mut overlapped = OVERLAPPED::default();
        overlapped.hEvent = self.io_event.0;

        unsafe {
            let _ = ResetEvent(self.io_event.0);
        }

        // SAFETY: the buffer and `overlapped` stay alive until the read has
        // completed or `abort_pending` has drained it below.
        let issued = unsafe {
            ReadDirectoryChangesW(
                self.dir.0,
                self.buffer.as_mut_ptr().cast(),
                (self.buffer.len() * 4) as u32,
                self.recursive,
                FILTER,
                None,
                Some(&mut overlapped),
                None,
            )
        };
        if let Err(e) = issued {
            return WaitOutcome::Failed(io::Error::from(e));
        }

        let handles = [self.io_event.0, (self.cancel.0).0];
        let wait = unsafe { WaitForMultipleObjects(&handles, false, INFINITE) };

        match wait.0 {
            // WAIT_OBJECT_0: the read completed.
            0 => {
                let mut transferred = 0u32;
                let result = unsafe {
                    GetOverlappedResult(self.dir.0, &overlapped, &mut transferred, false)
                };
                match result {
                    Ok(()) if transferred == 0 => WaitOutcome::Empty,
                    Ok(()) => self.resolve(transferred as usize),
                    Err(e) if e.code() == ERROR_OPERATION_ABORTED.to_hresult() => {
                        WaitOutcome::Cancelled
                    }
                    // Buffer overflow: the kernel discarded the details.
                    Err(e) if e.code() == ERROR_NOTIFY_ENUM_DIR.to_hresult() => WaitOutcome::Empty,
                    Err(e) => WaitOutcome::Failed(io::Error::from(e)),
                }
            }
            // WAIT_OBJECT_0 + 1: stop requested.
            1 => {
                self.abort_pending(&overlapped);
                WaitOutcome::Cancelled
            }
            _ => {
                let err = io::Error::last_os_error();
                self.abort_pending(&overlapped);
                WaitOutcome::Failed(err)
            }
        }
    }
}

impl CancelWait for CancelEvent {
    fn cancel(&self) {
        // The event is manual-reset and never reset, so it stays signalled
        // and every later wait returns immediately.
        if let Err(e) = unsafe { SetEvent((self.0).0) } {
            debug!("SetEvent on cancel event failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::RawAction;
    use std::fs;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_reports_create_in_root() {
        let tmp = tempfile::TempDir::new().unwrap();
        let NativeWatch { mut source, .. } = open(tmp.path(), &WatchConfig::default()).unwrap();

        let writer_root = tmp.path().to_path_buf();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            fs::write(writer_root.join("f1"), b"x").unwrap();
        });

        let mut seen = Vec::new();
        while seen.is_empty() {
            match source.wait() {
                WaitOutcome::Batch(batch) => seen.extend(batch),
                WaitOutcome::Empty => {}
                other => panic!("unexpected wait outcome: {other:?}"),
            }
        }
        writer.join().unwrap();
        assert_eq!(seen[0].action, RawAction::Added);
        assert_eq!(seen[0].path, tmp.path().join("f1"));
    }

    #[test]
    fn test_cancel_wakes_blocked_wait() {
        let tmp = tempfile::TempDir::new().unwrap();
        let NativeWatch {
            mut source,
            canceller,
        } = open(tmp.path(), &WatchConfig::default()).unwrap();

        let waiter = thread::spawn(move || (source.wait(), source.wait()));
        thread::sleep(Duration::from_millis(50));
        canceller.cancel();

        let (first, second) = waiter.join().unwrap();
        assert!(matches!(first, WaitOutcome::Cancelled));
        assert!(matches!(second, WaitOutcome::Cancelled));
    }
}
