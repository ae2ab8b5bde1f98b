//! Demux worker thread.
//!
//! Owns the `TrackDemuxer` so its potentially blocking calls never run on
//! the control thread. Requests carry an id; the controller tracks at most
//! one outstanding id per kind in a [`RequestHolder`] and drops any reply
//! whose id no longer matches.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, trace};

use crate::demux::{BufferedRange, DemuxError, Sample, TrackDemuxer, TrackMetadata};

#[derive(Debug)]
pub(crate) enum DemuxRequestKind {
    Init,
    Pull { count: usize },
    Seek { target: Duration },
    Reset,
    DataArrived,
}

#[derive(Debug)]
pub(crate) struct DemuxRequest {
    pub id: u64,
    pub kind: DemuxRequestKind,
}

#[derive(Debug)]
pub(crate) enum DemuxReplyKind {
    Init(Result<TrackMetadata, DemuxError>),
    Samples(Result<Vec<Sample>, DemuxError>),
    Seek(Result<Duration, DemuxError>),
    Buffered(Vec<BufferedRange>),
}

#[derive(Debug)]
pub(crate) struct DemuxReply {
    pub id: u64,
    pub kind: DemuxReplyKind,
}

pub(crate) struct DemuxWorker {
    req_tx: Sender<DemuxRequest>,
    reply_rx: Receiver<DemuxReply>,
    join: Option<JoinHandle<()>>,
    next_id: u64,
}

impl DemuxWorker {
    pub fn spawn(demuxer: Box<dyn TrackDemuxer>) -> Self {
        let (req_tx, req_rx) = unbounded();
        let (reply_tx, reply_rx) = unbounded();
        let join = thread::spawn(move || worker_main(demuxer, req_rx, reply_tx));
        Self { req_tx, reply_rx, join: Some(join), next_id: 1 }
    }

    pub fn replies(&self) -> &Receiver<DemuxReply> {
        &self.reply_rx
    }

    /// Queue a request and return its id for reply matching.
    pub fn request(&mut self, kind: DemuxRequestKind) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        trace!(id, ?kind, "demux request");
        let _ = self.req_tx.send(DemuxRequest { id, kind });
        id
    }

    /// Close the request channel and wait for the worker to drain and exit.
    pub fn shutdown(mut self) {
        let join = self.join.take();
        drop(self);
        if let Some(join) = join {
            let _ = join.join();
        }
    }
}

fn worker_main(
    mut demuxer: Box<dyn TrackDemuxer>,
    req_rx: Receiver<DemuxRequest>,
    reply_tx: Sender<DemuxReply>,
) {
    while let Ok(req) = req_rx.recv() {
        let kind = match req.kind {
            DemuxRequestKind::Init => DemuxReplyKind::Init(demuxer.init()),
            DemuxRequestKind::Pull { count } => DemuxReplyKind::Samples(demuxer.get_samples(count)),
            DemuxRequestKind::Seek { target } => DemuxReplyKind::Seek(demuxer.seek(target)),
            DemuxRequestKind::Reset => {
                demuxer.reset();
                continue;
            }
            DemuxRequestKind::DataArrived => {
                demuxer.notify_data_arrived();
                DemuxReplyKind::Buffered(demuxer.buffered())
            }
        };
        if reply_tx.send(DemuxReply { id: req.id, kind }).is_err() {
            break;
        }
    }
    debug!("demux worker exiting");
}

/// Tracks a single outstanding async request id.
#[derive(Debug, Default)]
pub(crate) struct RequestHolder {
    id: Option<u64>,
}

impl RequestHolder {
    pub fn track(&mut self, id: u64) {
        debug_assert!(self.id.is_none());
        self.id = Some(id);
    }

    pub fn exists(&self) -> bool {
        self.id.is_some()
    }

    /// Returns true and clears the holder when `id` is the tracked request;
    /// a stale or unknown id leaves the holder alone.
    pub fn complete(&mut self, id: u64) -> bool {
        if self.id == Some(id) {
            self.id = None;
            true
        } else {
            false
        }
    }

    /// Forget the outstanding request; its reply will be ignored.
    pub fn disconnect_if_exists(&mut self) {
        self.id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct CountingDemuxer {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl TrackDemuxer for CountingDemuxer {
        fn init(&mut self) -> Result<TrackMetadata, DemuxError> {
            self.calls.lock().unwrap().push("init".into());
            Err(DemuxError::Other("nothing to parse".into()))
        }

        fn get_samples(&mut self, count: usize) -> Result<Vec<Sample>, DemuxError> {
            self.calls.lock().unwrap().push(format!("pull {count}"));
            Err(DemuxError::EndOfStream)
        }

        fn seek(&mut self, target: Duration) -> Result<Duration, DemuxError> {
            self.calls.lock().unwrap().push("seek".into());
            Ok(target)
        }

        fn reset(&mut self) {
            self.calls.lock().unwrap().push("reset".into());
        }

        fn buffered(&self) -> Vec<BufferedRange> {
            vec![]
        }
    }

    #[test]
    fn worker_serializes_requests_and_tags_replies() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut worker = DemuxWorker::spawn(Box::new(CountingDemuxer { calls: calls.clone() }));

        let pull_id = worker.request(DemuxRequestKind::Pull { count: 10 });
        worker.request(DemuxRequestKind::Reset);
        let seek_id = worker.request(DemuxRequestKind::Seek { target: Duration::from_secs(3) });

        let reply = worker.replies().recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(reply.id, pull_id);
        assert!(matches!(reply.kind, DemuxReplyKind::Samples(Err(DemuxError::EndOfStream))));

        // Reset produces no reply; the next one is the seek.
        let reply = worker.replies().recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(reply.id, seek_id);
        assert!(matches!(reply.kind, DemuxReplyKind::Seek(Ok(t)) if t == Duration::from_secs(3)));

        worker.shutdown();
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            ["pull 10", "reset", "seek"]
        );
    }

    #[test]
    fn holder_drops_stale_ids() {
        let mut holder = RequestHolder::default();
        holder.track(7);
        assert!(holder.exists());
        assert!(!holder.complete(6));
        assert!(holder.exists());
        assert!(holder.complete(7));
        assert!(!holder.exists());
        // Completing twice is a no-op.
        assert!(!holder.complete(7));
    }

    #[test]
    fn disconnect_ignores_later_reply() {
        let mut holder = RequestHolder::default();
        holder.track(3);
        holder.disconnect_if_exists();
        assert!(!holder.complete(3));
    }
}
