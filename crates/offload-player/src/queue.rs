//! Bounded-by-duration sample queue shared with the sink callback thread.
//!
//! The control thread pushes demuxed samples and watches the queued
//! duration against its watermarks; the sink callback drains bytes with
//! [`SampleQueue::fill`] under the same lock. The `finished` flag marks the
//! end of input so consumers can tell an underrun from end of stream.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tracing::warn;

use crate::demux::Sample;

#[derive(Debug, Default)]
struct QueueInner {
    samples: VecDeque<Sample>,
    /// Sum of the queued samples' durations.
    queued: Duration,
    /// Bytes of the front sample already consumed by `fill`.
    front_offset: usize,
    finished: bool,
}

/// What a single `fill` call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FillOutcome {
    /// Bytes copied into the destination.
    pub bytes: usize,
    /// Whole samples fully consumed and removed.
    pub popped: usize,
}

#[derive(Debug, Default)]
pub struct SampleQueue {
    inner: Mutex<QueueInner>,
}

impl SampleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a demuxed sample. Ignored after `finish`.
    pub fn push(&self, sample: Sample) {
        let mut inner = self.inner.lock().unwrap();
        if inner.finished {
            warn!("dropping sample pushed after end of stream");
            return;
        }
        inner.queued += sample.duration;
        inner.samples.push_back(sample);
    }

    /// Total playback duration currently queued.
    pub fn duration(&self) -> Duration {
        self.inner.lock().unwrap().queued
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark that no further samples will arrive.
    pub fn finish(&self) {
        self.inner.lock().unwrap().finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().unwrap().finished
    }

    /// Finished and fully drained.
    pub fn at_end_of_stream(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.finished && inner.samples.is_empty()
    }

    /// Drop all queued samples and clear the finished flag.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.samples.clear();
        inner.queued = Duration::ZERO;
        inner.front_offset = 0;
        inner.finished = false;
    }

    /// Copy queued bytes into `dst`, consuming samples front to back.
    ///
    /// Partially consumed samples stay at the front with their offset
    /// advanced. Returns fewer bytes than `dst.len()` on underrun.
    pub fn fill(&self, dst: &mut [u8]) -> FillOutcome {
        let mut inner = self.inner.lock().unwrap();
        let mut outcome = FillOutcome::default();
        while outcome.bytes < dst.len() {
            let offset = inner.front_offset;
            let Some(front) = inner.samples.front() else {
                break;
            };
            let available = &front.bytes[offset..];
            let want = dst.len() - outcome.bytes;
            let take = want.min(available.len());
            dst[outcome.bytes..outcome.bytes + take].copy_from_slice(&available[..take]);
            outcome.bytes += take;
            if take == available.len() {
                if let Some(sample) = inner.samples.pop_front() {
                    inner.queued = inner.queued.saturating_sub(sample.duration);
                }
                inner.front_offset = 0;
                outcome.popped += 1;
            } else {
                inner.front_offset = offset + take;
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize, ms: u64) -> Sample {
        Sample {
            bytes: vec![0xAB; len],
            time: Duration::ZERO,
            duration: Duration::from_millis(ms),
        }
    }

    #[test]
    fn push_accumulates_duration() {
        let q = SampleQueue::new();
        q.push(sample(4, 100));
        q.push(sample(4, 150));
        assert_eq!(q.duration(), Duration::from_millis(250));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn fill_spans_samples_and_counts_pops() {
        let q = SampleQueue::new();
        q.push(sample(4, 100));
        q.push(sample(4, 100));
        let mut dst = [0u8; 6];
        let out = q.fill(&mut dst);
        assert_eq!(out, FillOutcome { bytes: 6, popped: 1 });
        assert_eq!(q.duration(), Duration::from_millis(100));

        // The second sample is half consumed; finishing it pops it.
        let mut rest = [0u8; 2];
        let out = q.fill(&mut rest);
        assert_eq!(out, FillOutcome { bytes: 2, popped: 1 });
        assert!(q.is_empty());
        assert_eq!(q.duration(), Duration::ZERO);
    }

    #[test]
    fn fill_underruns_when_empty() {
        let q = SampleQueue::new();
        q.push(sample(3, 100));
        let mut dst = [0u8; 8];
        let out = q.fill(&mut dst);
        assert_eq!(out, FillOutcome { bytes: 3, popped: 1 });
        let out = q.fill(&mut dst);
        assert_eq!(out, FillOutcome { bytes: 0, popped: 0 });
    }

    #[test]
    fn finish_distinguishes_underrun_from_eos() {
        let q = SampleQueue::new();
        q.push(sample(2, 50));
        assert!(!q.at_end_of_stream());
        q.finish();
        assert!(q.is_finished());
        assert!(!q.at_end_of_stream());
        let mut dst = [0u8; 2];
        q.fill(&mut dst);
        assert!(q.at_end_of_stream());
    }

    #[test]
    fn push_after_finish_is_dropped() {
        let q = SampleQueue::new();
        q.finish();
        q.push(sample(2, 50));
        assert!(q.is_empty());
        assert_eq!(q.duration(), Duration::ZERO);
    }

    #[test]
    fn reset_clears_everything() {
        let q = SampleQueue::new();
        q.push(sample(4, 100));
        let mut dst = [0u8; 2];
        q.fill(&mut dst);
        q.finish();
        q.reset();
        assert!(q.is_empty());
        assert!(!q.is_finished());
        assert_eq!(q.duration(), Duration::ZERO);

        // Usable again after reset, with no leftover front offset.
        q.push(sample(4, 100));
        let mut dst = [0u8; 4];
        let out = q.fill(&mut dst);
        assert_eq!(out, FillOutcome { bytes: 4, popped: 1 });
    }
}
