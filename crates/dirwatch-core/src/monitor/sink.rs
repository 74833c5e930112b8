/// Where delivered records go.
///
/// A sink is invoked on the watch thread, once per record, synchronously and
/// in decode order. A slow sink stalls the watch loop, and with it the OS
/// queue, so sinks should hand work off rather than do it inline.
use crate::model::ChangeRecord;
use crossbeam_channel::Sender;
use tracing::trace;

pub trait EventSink: Send + 'static {
    fn deliver(&self, record: &ChangeRecord);
}

impl<F> EventSink for F
where
    F: Fn(&ChangeRecord) + Send + 'static,
{
    fn deliver(&self, record: &ChangeRecord) {
        self(record)
    }
}

/// Forwards records over a channel. With a bounded channel a full queue
/// blocks the watch thread until the receiver catches up; nothing is dropped.
impl EventSink for Sender<ChangeRecord> {
    fn deliver(&self, record: &ChangeRecord) {
        if self.send(record.clone()).is_err() {
            trace!("sink receiver dropped; discarding {}", record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChangeKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_closure_sink() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let sink = move |_: &ChangeRecord| {
            seen.fetch_add(1, Ordering::SeqCst);
        };
        sink.deliver(&ChangeRecord::new("/w/a", ChangeKind::Created));
        sink.deliver(&ChangeRecord::new("/w/a", ChangeKind::Deleted));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.deliver(&ChangeRecord::new("/w/a", ChangeKind::Modified));
        assert_eq!(rx.recv().unwrap().kind, ChangeKind::Modified);
        drop(rx);
        tx.deliver(&ChangeRecord::new("/w/b", ChangeKind::Modified));
    }
}
