/// Linux adapter: `inotify` plus an `eventfd` for cancellation.
///
/// inotify watches are per directory, so recursive watching registers every
/// directory under the root at open time and each directory that appears
/// (created or moved in) while watching. A directory that arrives with
/// content already in it is walked, and everything found is reported as
/// added. A directory that moves away, out of the root or to a new name,
/// has its watches removed, so nothing below it is reported under its old
/// path. The watch thread blocks in `poll(2)`
/// on both descriptors; [`WakeFd::cancel`] makes the `eventfd` readable, which
/// ends the current wait and every later one.
use super::{CancelWait, NativeWatch, NotifySource, ResolvedEntry, WaitOutcome};
use crate::config::WatchConfig;
use crate::decode::inotify::{IN_IGNORED, IN_MOVE_SELF, IN_Q_OVERFLOW};
use crate::decode::{decode_inotify, InotifyEntry, RawAction};
use crate::error::StartError;
use std::collections::HashMap;
use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// Name, write and directory-name changes, the inotify equivalent of
/// `FILE_NOTIFY_CHANGE_FILE_NAME | LAST_WRITE | DIR_NAME`.
const WATCH_MASK: u32 = libc::IN_CREATE
    | libc::IN_DELETE
    | libc::IN_MODIFY
    | libc::IN_MOVED_FROM
    | libc::IN_MOVED_TO
    | libc::IN_ONLYDIR;

pub struct InotifySource {
    root: PathBuf,
    inotify: OwnedFd,
    wake: Arc<WakeFd>,
    root_wd: i32,
    /// Watch descriptor → the directory it watches.
    dirs: HashMap<i32, PathBuf>,
    buffer: Vec<u8>,
    recursive: bool,
}

/// The `eventfd` that interrupts [`InotifySource::wait`].
pub struct WakeFd(OwnedFd);

pub fn open(root: &Path, config: &WatchConfig) -> Result<NativeWatch, StartError> {
    // SAFETY: plain syscall; the result is checked before use.
    let raw = unsafe { libc::inotify_init1(libc::IN_CLOEXEC | libc::IN_NONBLOCK) };
    if raw < 0 {
        return Err(StartError::from_io(root, io::Error::last_os_error()));
    }
    // SAFETY: `raw` is a freshly created descriptor nobody else owns.
    let inotify = unsafe { OwnedFd::from_raw_fd(raw) };

    // SAFETY: as above.
    let raw = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
    if raw < 0 {
        return Err(StartError::from_io(root, io::Error::last_os_error()));
    }
    // SAFETY: as above.
    let wake = Arc::new(WakeFd(unsafe { OwnedFd::from_raw_fd(raw) }));

    let mut source = InotifySource {
        root: root.to_path_buf(),
        inotify,
        wake: Arc::clone(&wake),
        root_wd: -1,
        dirs: HashMap::new(),
        buffer: vec![0u8; config.buffer_size],
        recursive: config.recursive,
    };

    source.root_wd = source
        .add_watch(root)
        .map_err(|e| StartError::from_io(root, e))?;
    if config.recursive {
        source.add_subtree(root);
    }
    debug!(
        "inotify: watching {} ({} directories)",
        root.display(),
        source.dirs.len()
    );

    Ok(NativeWatch {
        source: Box::new(source),
        canceller: wake,
    })
}

impl InotifySource {
    fn add_watch(&mut self, dir: &Path) -> io::Result<i32> {
        let c_path = CString::new(dir.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
        // SAFETY: `c_path` is NUL-terminated and outlives the call.
        let wd = unsafe {
            libc::inotify_add_watch(self.inotify.as_raw_fd(), c_path.as_ptr(), WATCH_MASK)
        };
        if wd < 0 {
            return Err(io::Error::last_os_error());
        }
        self.dirs.insert(wd, dir.to_path_buf());
        Ok(wd)
    }

    /// Watch every directory below `dir` and return every entry found there,
    /// parents before children. Unreadable subdirectories are skipped; they
    /// simply produce no events.
    fn add_subtree(&mut self, dir: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let walker = jwalk::WalkDir::new(dir)
            .skip_hidden(false)
            .follow_links(false);

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    debug!("inotify: skipping unreadable entry: {err}");
                    continue;
                }
            };
            let path = entry.path();
            if path == dir {
                continue;
            }
            if entry.file_type().is_dir() {
                if let Err(err) = self.add_watch(&path) {
                    debug!("inotify: cannot watch {}: {err}", path.display());
                }
            }
            found.push(path);
        }
        found
    }

    /// Drop the watches on `dir` and everything below it. Events the kernel
    /// already queued for them are skipped as retired.
    fn retire_subtree(&mut self, dir: &Path) {
        let root_wd = self.root_wd;
        let retired: Vec<i32> = self
            .dirs
            .iter()
            .filter(|(wd, path)| **wd != root_wd && path.starts_with(dir))
            .map(|(wd, _)| *wd)
            .collect();
        for wd in retired {
            self.dirs.remove(&wd);
            // SAFETY: plain syscall on a descriptor we own. EINVAL for a
            // watch the kernel already dropped is harmless.
            unsafe {
                libc::inotify_rm_watch(self.inotify.as_raw_fd(), wd);
            }
            trace!("inotify: retired watch {wd} under {}", dir.display());
        }
    }

    /// Decode `len` bytes of the read buffer and resolve names to paths.
    fn resolve(&mut self, len: usize) -> WaitOutcome {
        let entries: Vec<InotifyEntry> =
            match decode_inotify(&self.buffer[..len]).collect::<Result<_, _>>() {
                Ok(entries) => entries,
                Err(err) => return WaitOutcome::Malformed(err),
            };

        let mut batch = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.mask & IN_Q_OVERFLOW != 0 {
                batch.push(ResolvedEntry::new(RawAction::Overflow, self.root.clone()));
                continue;
            }
            if entry.mask & IN_IGNORED != 0 {
                self.dirs.remove(&entry.wd);
                continue;
            }
            if entry.mask & IN_MOVE_SELF != 0 && entry.wd != self.root_wd {
                if let Some(moved) = self.dirs.get(&entry.wd).cloned() {
                    self.retire_subtree(&moved);
                }
                continue;
            }
            if entry.is_watch_event() {
                continue;
            }

            let Some(dir) = self.dirs.get(&entry.wd) else {
                trace!("inotify: event for retired watch {}", entry.wd);
                continue;
            };
            let path = if entry.name.is_empty() {
                dir.clone()
            } else {
                dir.join(entry.name.as_str())
            };

            let action = entry.action();
            if entry.is_dir() && action == RawAction::RenamedOldName {
                self.retire_subtree(&path);
            }
            if self.recursive
                && entry.is_dir()
                && matches!(action, RawAction::Added | RawAction::RenamedNewName)
            {
                if let Err(err) = self.add_watch(&path) {
                    debug!("inotify: cannot watch {}: {err}", path.display());
                    batch.push(ResolvedEntry::new(action, path));
                    continue;
                }
                let contents = self.add_subtree(&path);
                batch.push(ResolvedEntry::new(action, path));
                batch.extend(
                    contents
                        .into_iter()
                        .map(|p| ResolvedEntry::new(RawAction::Added, p)),
                );
                continue;
            }

            batch.push(ResolvedEntry::new(action, path));
        }

        if batch.is_empty() {
            WaitOutcome::Empty
        } else {
            WaitOutcome::Batch(batch)
        }
    }
}

impl NotifySource for InotifySource {
    fn wait(&mut self) -> WaitOutcome {
        loop {
            let mut fds = [
                libc::pollfd {
                    fd: self.inotify.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.wake.0.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            // SAFETY: `fds` is a live array of initialised pollfd structs.
            let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return WaitOutcome::Failed(err);
            }

            if fds[1].revents != 0 {
                return WaitOutcome::Cancelled;
            }
            if fds[0].revents & libc::POLLIN == 0 {
                if fds[0].revents != 0 {
                    return WaitOutcome::Failed(io::Error::other(format!(
                        "inotify descriptor reported poll events {:#x}",
                        fds[0].revents
                    )));
                }
                continue;
            }

            // SAFETY: the buffer is valid for `len` bytes of writes.
            let n = unsafe {
                libc::read(
                    self.inotify.as_raw_fd(),
                    self.buffer.as_mut_ptr().cast(),
                    self.buffer.len(),
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => continue,
                    _ => return WaitOutcome::Failed(err),
                }
            }
            if n == 0 {
                return WaitOutcome::Empty;
            }
            return self.resolve(n as usize);
        }
    }
}

impl CancelWait for WakeFd {
    fn cancel(&self) {
        let one: u64 = 1;
        // SAFETY: writes the 8 bytes of a live u64 to a descriptor we own.
        let rc = unsafe {
            libc::write(
                self.0.as_raw_fd(),
                (&one as *const u64).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        if rc < 0 {
            // EAGAIN means the counter is already non-zero, i.e. already woken.
            trace!("eventfd wake failed: {}", io::Error::last_os_error());
        }
    }
}
