//! Seek requests, promises, and the current/pending slot pair.
//!
//! At most one seek is physically in flight (`current`) and at most one is
//! parked behind it (`pending`). A newer request always wins: parking it
//! rejects the promise of whichever request it supersedes. Promises resolve
//! exactly once; dropping an unresolved promise rejects it.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::trace;

use offload_types::SeekMode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeekTarget {
    pub time: Duration,
    pub mode: SeekMode,
}

impl SeekTarget {
    pub fn accurate(time: Duration) -> Self {
        Self { time, mode: SeekMode::Accurate }
    }
}

/// Resolver half of a seek request.
#[derive(Debug)]
pub struct SeekPromise {
    tx: Option<Sender<bool>>,
}

impl SeekPromise {
    pub fn new() -> (SeekPromise, SeekTicket) {
        let (tx, rx) = bounded(1);
        (SeekPromise { tx: Some(tx) }, SeekTicket { rx })
    }

    pub fn resolve(mut self, success: bool) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(success);
        }
    }
}

impl Drop for SeekPromise {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(false);
        }
    }
}

/// Caller half of a seek request.
#[derive(Debug)]
pub struct SeekTicket {
    rx: Receiver<bool>,
}

impl SeekTicket {
    /// Block until the seek settles; a torn-down session reads as failure.
    pub fn wait(&self) -> bool {
        self.rx.recv().unwrap_or(false)
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<bool> {
        self.rx.recv_timeout(timeout).ok()
    }
}

pub(crate) struct SeekJob {
    pub target: SeekTarget,
    /// Internal seeks (dormancy, teardown recovery) are not visible: no
    /// observer events and no promise.
    pub visible: bool,
    pub promise: Option<SeekPromise>,
}

impl SeekJob {
    fn settle(&mut self, success: bool) {
        if let Some(promise) = self.promise.take() {
            promise.resolve(success);
        }
    }
}

#[derive(Default)]
pub(crate) struct SeekSlots {
    current: Option<SeekJob>,
    pending: Option<SeekJob>,
}

impl SeekSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Install `job` as the in-flight seek. The slot must be free.
    pub fn begin(&mut self, job: SeekJob) {
        debug_assert!(self.current.is_none());
        self.current = Some(job);
    }

    /// Park `job` behind the in-flight seek, rejecting the request it
    /// supersedes: an already-parked pending if present, otherwise the
    /// current one (which keeps running, but its promise settles now).
    pub fn defer(&mut self, job: SeekJob) {
        if let Some(mut old) = self.pending.take() {
            trace!("replacing pending seek");
            old.settle(false);
        } else if let Some(current) = self.current.as_mut() {
            trace!("superseding in-flight seek");
            current.settle(false);
        }
        self.pending = Some(job);
    }

    /// Settle the in-flight seek and promote the pending one, if any,
    /// returning what should now be seeked to.
    pub fn finish_current(&mut self, success: bool) -> Option<(SeekTarget, bool)> {
        if let Some(mut current) = self.current.take() {
            current.settle(success);
        }
        self.promote_pending()
    }

    /// Move the pending seek into the current slot.
    pub fn promote_pending(&mut self) -> Option<(SeekTarget, bool)> {
        debug_assert!(self.current.is_none());
        let next = self.pending.take()?;
        let fired = (next.target, next.visible);
        self.current = Some(next);
        Some(fired)
    }

    /// Reject the in-flight seek without touching the pending one. Used
    /// when a reset discards the physical request mid-flight.
    pub fn abort_current(&mut self) {
        if let Some(mut current) = self.current.take() {
            current.settle(false);
        }
    }

    /// Reject everything outstanding.
    pub fn clear(&mut self) {
        if let Some(mut current) = self.current.take() {
            current.settle(false);
        }
        if let Some(mut pending) = self.pending.take() {
            pending.settle(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(ms: u64) -> (SeekJob, SeekTicket) {
        let (promise, ticket) = SeekPromise::new();
        let job = SeekJob {
            target: SeekTarget::accurate(Duration::from_millis(ms)),
            visible: true,
            promise: Some(promise),
        };
        (job, ticket)
    }

    #[test]
    fn resolve_reaches_ticket() {
        let (promise, ticket) = SeekPromise::new();
        promise.resolve(true);
        assert!(ticket.wait());
    }

    #[test]
    fn dropped_promise_reads_as_rejection() {
        let (promise, ticket) = SeekPromise::new();
        drop(promise);
        assert!(!ticket.wait());
    }

    #[test]
    fn defer_rejects_superseded_current() {
        let mut slots = SeekSlots::new();
        let (a, ticket_a) = job(1000);
        let (b, ticket_b) = job(2000);
        slots.begin(a);
        slots.defer(b);
        // A's promise settles immediately even though its physical seek
        // is still running.
        assert_eq!(ticket_a.wait_timeout(Duration::from_millis(100)), Some(false));
        assert!(slots.has_current());
        assert!(slots.has_pending());

        let fired = slots.finish_current(true);
        assert_eq!(fired.map(|(t, _)| t.time), Some(Duration::from_millis(2000)));
        assert!(slots.has_current());
        assert!(!slots.has_pending());

        slots.finish_current(true);
        assert!(ticket_b.wait());
    }

    #[test]
    fn defer_replaces_existing_pending_first() {
        let mut slots = SeekSlots::new();
        let (a, ticket_a) = job(1);
        let (b, ticket_b) = job(2);
        let (c, ticket_c) = job(3);
        slots.begin(a);
        slots.defer(b);
        slots.defer(c);
        // B was parked and never ran; C supersedes it. A already settled
        // when B parked.
        assert_eq!(ticket_a.wait_timeout(Duration::from_millis(100)), Some(false));
        assert_eq!(ticket_b.wait_timeout(Duration::from_millis(100)), Some(false));

        let fired = slots.finish_current(true);
        assert_eq!(fired.map(|(t, _)| t.time), Some(Duration::from_millis(3)));
        slots.finish_current(true);
        assert!(ticket_c.wait());
    }

    #[test]
    fn clear_rejects_outstanding() {
        let mut slots = SeekSlots::new();
        let (a, ticket_a) = job(1);
        let (b, ticket_b) = job(2);
        slots.begin(a);
        slots.defer(b);
        slots.clear();
        assert!(!ticket_a.wait());
        assert!(!ticket_b.wait());
        assert!(!slots.has_current());
        assert!(!slots.has_pending());
    }

    #[test]
    fn abort_current_keeps_pending() {
        let mut slots = SeekSlots::new();
        let (a, _ticket_a) = job(1);
        let mut b = job(2).0;
        b.visible = false;
        b.promise = None;
        slots.begin(a);
        slots.defer(b);
        slots.abort_current();
        assert!(!slots.has_current());
        assert!(slots.has_pending());
        let fired = slots.promote_pending();
        assert_eq!(fired, Some((SeekTarget::accurate(Duration::from_millis(2)), false)));
    }
}
