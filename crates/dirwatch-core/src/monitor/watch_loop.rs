/// The watch loop, run on the background watch thread.
///
/// Blocks on the native source, classifies each decoded entry and hands the
/// resulting records to the sink, one read at a time. Only three things end
/// the loop: a cancelled wait, the stop flag, or a bounded retry policy
/// running out. Everything else (empty reads, malformed buffers, failed
/// reads) is logged and the loop waits again.
///
/// # Stop semantics
///
/// Records are discarded, not drained, once stop is requested: the flag is
/// checked before every delivery, so the tail of a batch read just before
/// the stop never reaches the sink.
use super::sink::EventSink;
use super::state::{LoopState, SharedState};
use crate::classify::{classify, ExtensionFilter};
use crate::config::BackoffPolicy;
use crate::model::ChangeRecord;
use crate::platform::{NotifySource, ResolvedEntry, WaitOutcome};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Everything the loop thread owns besides the source.
pub(crate) struct LoopContext {
    pub root: PathBuf,
    pub sink: Box<dyn EventSink>,
    pub stop: Arc<AtomicBool>,
    /// Never sent on; the controller drops the sender to cut a backoff
    /// pause short.
    pub shutdown_rx: Receiver<()>,
    pub state: SharedState,
    pub backoff: BackoffPolicy,
    pub filter: ExtensionFilter,
}

pub(crate) fn run_watch_loop(mut source: Box<dyn NotifySource>, ctx: LoopContext) {
    let LoopContext {
        root,
        sink,
        stop,
        shutdown_rx,
        state,
        backoff,
        filter,
    } = ctx;

    state.set(LoopState::Watching);
    debug!("Watch: started on {:?}", root);

    let mut failures: u32 = 0;

    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }

        match source.wait() {
            WaitOutcome::Batch(entries) => {
                failures = 0;
                deliver_batch(&root, entries, sink.as_ref(), &stop, &filter);
            }
            WaitOutcome::Empty => {
                failures = 0;
                trace!("Watch: empty read on {:?}", root);
            }
            WaitOutcome::Malformed(err) => {
                failures = 0;
                warn!("Watch: skipping malformed notification batch on {:?}: {}", root, err);
            }
            WaitOutcome::Cancelled => break,
            WaitOutcome::Failed(err) => {
                failures = failures.saturating_add(1);
                if stop.load(Ordering::Acquire) {
                    break;
                }
                if backoff.is_exhausted(failures) {
                    error!(
                        "Watch: giving up on {:?} after {} consecutive read failures: {}",
                        root, failures, err
                    );
                    state.set(LoopState::Error);
                    break;
                }
                warn!(
                    "Watch: read failed on {:?} (attempt {}): {}; retrying in {:?}",
                    root,
                    failures,
                    err,
                    backoff.retry_delay()
                );
                match shutdown_rx.recv_timeout(backoff.retry_delay()) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }
    }

    if state.get() != LoopState::Error {
        state.set(LoopState::Stopping);
    }

    // Releases the native handle; the sink goes with it.
    drop(source);
    drop(sink);

    state.set(LoopState::Closed);
    debug!("Watch: stopped on {:?}", root);
}

/// Classify, filter and deliver one read's entries in order.
fn deliver_batch(
    root: &Path,
    entries: Vec<ResolvedEntry>,
    sink: &dyn EventSink,
    stop: &AtomicBool,
    filter: &ExtensionFilter,
) {
    let total = entries.len();
    for (delivered, entry) in entries.into_iter().enumerate() {
        if stop.load(Ordering::Acquire) {
            debug!(
                "Watch: stop requested, discarding {} undelivered records",
                total - delivered
            );
            return;
        }

        let Some(kind) = classify(entry.action) else {
            warn!(
                "Watch: notification queue overflowed on {:?}; some changes were not reported",
                root
            );
            continue;
        };
        if filter.excludes(&entry.path) {
            trace!("Watch: excluded {:?}", entry.path);
            continue;
        }

        sink.deliver(&ChangeRecord::new(entry.path, kind));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{DecodeError, RawAction};
    use crate::model::ChangeKind;
    use crate::monitor::testing::{fake_watch, scripted};
    use crossbeam_channel::{unbounded, Sender};
    use std::io;
    use std::thread;
    use std::time::{Duration, Instant};

    fn context(
        sink: impl EventSink,
        backoff: BackoffPolicy,
    ) -> (LoopContext, Arc<AtomicBool>, Sender<()>, SharedState) {
        let stop = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);
        let state = SharedState::new(LoopState::Opening);
        let ctx = LoopContext {
            root: PathBuf::from("/w"),
            sink: Box::new(sink),
            stop: Arc::clone(&stop),
            shutdown_rx,
            state: state.clone(),
            backoff,
            filter: ExtensionFilter::default(),
        };
        (ctx, stop, shutdown_tx, state)
    }

    fn fast_retry(max_attempts: Option<u32>) -> BackoffPolicy {
        BackoffPolicy {
            retry_delay_ms: 1,
            max_attempts,
        }
    }

    fn entry(action: RawAction, path: &str) -> ResolvedEntry {
        ResolvedEntry::new(action, path)
    }

    #[test]
    fn test_delivers_batch_in_decode_order() {
        let (tx, rx) = unbounded();
        let (ctx, _stop, _shutdown, state) = context(tx, fast_retry(None));
        let source = scripted(vec![WaitOutcome::Batch(vec![
            entry(RawAction::Added, "/w/f1"),
            entry(RawAction::Modified, "/w/f1"),
            entry(RawAction::Removed, "/w/f1"),
        ])]);

        run_watch_loop(source, ctx);

        let kinds: Vec<_> = rx.try_iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Created, ChangeKind::Modified, ChangeKind::Deleted]
        );
        assert_eq!(state.get(), LoopState::Closed);
    }

    #[test]
    fn test_rename_surfaces_as_delete_then_create() {
        let (tx, rx) = unbounded();
        let (ctx, _stop, _shutdown, _state) = context(tx, fast_retry(None));
        let source = scripted(vec![WaitOutcome::Batch(vec![
            entry(RawAction::RenamedOldName, "/w/a.txt"),
            entry(RawAction::RenamedNewName, "/w/b.txt"),
        ])]);

        run_watch_loop(source, ctx);

        let records: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            records,
            vec![
                ChangeRecord::new("/w/a.txt", ChangeKind::Deleted),
                ChangeRecord::new("/w/b.txt", ChangeKind::Created),
            ]
        );
    }

    #[test]
    fn test_malformed_and_empty_reads_do_not_stop_the_loop() {
        let (tx, rx) = unbounded();
        let (ctx, _stop, _shutdown, _state) = context(tx, fast_retry(None));
        let source = scripted(vec![
            WaitOutcome::Malformed(DecodeError::BadOffset { offset: 0, next: 4 }),
            WaitOutcome::Empty,
            WaitOutcome::Batch(vec![entry(RawAction::Added, "/w/after")]),
        ]);

        run_watch_loop(source, ctx);

        let records: Vec<_> = rx.try_iter().collect();
        assert_eq!(records, vec![ChangeRecord::new("/w/after", ChangeKind::Created)]);
    }

    #[test]
    fn test_failed_reads_are_retried() {
        let (tx, rx) = unbounded();
        let (ctx, _stop, _shutdown, state) = context(tx, fast_retry(None));
        let source = scripted(vec![
            WaitOutcome::Failed(io::Error::other("transient")),
            WaitOutcome::Failed(io::Error::other("transient")),
            WaitOutcome::Batch(vec![entry(RawAction::Modified, "/w/f1")]),
        ]);

        run_watch_loop(source, ctx);

        assert_eq!(rx.try_iter().count(), 1);
        assert_eq!(state.get(), LoopState::Closed);
    }

    #[test]
    fn test_bounded_backoff_gives_up() {
        let (tx, rx) = unbounded();
        let (ctx, _stop, _shutdown, state) = context(tx, fast_retry(Some(2)));
        let source = scripted(vec![
            WaitOutcome::Failed(io::Error::other("broken")),
            WaitOutcome::Failed(io::Error::other("broken")),
            WaitOutcome::Batch(vec![entry(RawAction::Added, "/w/never")]),
        ]);

        run_watch_loop(source, ctx);

        assert_eq!(rx.try_iter().count(), 0);
        assert_eq!(state.get(), LoopState::Closed);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let (tx, rx) = unbounded();
        let (ctx, _stop, _shutdown, _state) = context(tx, fast_retry(Some(2)));
        let source = scripted(vec![
            WaitOutcome::Failed(io::Error::other("blip")),
            WaitOutcome::Empty,
            WaitOutcome::Failed(io::Error::other("blip")),
            WaitOutcome::Batch(vec![entry(RawAction::Added, "/w/still-here")]),
        ]);

        run_watch_loop(source, ctx);

        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_stop_discards_rest_of_batch() {
        let (tx, rx) = unbounded::<ChangeRecord>();
        let stop_slot: Arc<parking_lot::Mutex<Option<Arc<AtomicBool>>>> = Default::default();
        let slot = Arc::clone(&stop_slot);
        let sink = move |record: &ChangeRecord| {
            let _ = tx.send(record.clone());
            if let Some(stop) = slot.lock().as_ref() {
                stop.store(true, Ordering::Release);
            }
        };
        let (ctx, stop, _shutdown, _state) = context(sink, fast_retry(None));
        *stop_slot.lock() = Some(stop);

        let source = scripted(vec![
            WaitOutcome::Batch(vec![
                entry(RawAction::Added, "/w/1"),
                entry(RawAction::Added, "/w/2"),
                entry(RawAction::Added, "/w/3"),
            ]),
            WaitOutcome::Batch(vec![entry(RawAction::Added, "/w/4")]),
        ]);

        run_watch_loop(source, ctx);

        let paths: Vec<_> = rx.try_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec![PathBuf::from("/w/1")]);
    }

    #[test]
    fn test_overflow_and_excluded_entries_are_not_delivered() {
        let (tx, rx) = unbounded();
        let (mut ctx, _stop, _shutdown, _state) = context(tx, fast_retry(None));
        ctx.filter = ExtensionFilter::new(["tmp"]);
        let source = scripted(vec![WaitOutcome::Batch(vec![
            entry(RawAction::Overflow, "/w"),
            entry(RawAction::Added, "/w/scratch.tmp"),
            entry(RawAction::Added, "/w/keep.txt"),
        ])]);

        run_watch_loop(source, ctx);

        let records: Vec<_> = rx.try_iter().collect();
        assert_eq!(records, vec![ChangeRecord::new("/w/keep.txt", ChangeKind::Created)]);
    }

    #[test]
    fn test_shutdown_interrupts_backoff_pause() {
        let (tx, _rx) = unbounded();
        let slow = BackoffPolicy {
            retry_delay_ms: 60_000,
            max_attempts: None,
        };
        let (ctx, stop, shutdown, state) = context(tx, slow);
        let (native, feed) = fake_watch();
        feed.send(WaitOutcome::Failed(io::Error::other("down")))
            .unwrap();

        let started = Instant::now();
        let worker = thread::spawn(move || run_watch_loop(native.source, ctx));
        thread::sleep(Duration::from_millis(50));
        stop.store(true, Ordering::Release);
        drop(shutdown);
        worker.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(state.get(), LoopState::Closed);
        drop(feed);
    }
}
