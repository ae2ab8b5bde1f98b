//! Demuxer collaborator boundary.
//!
//! A [`TrackDemuxer`] supplies raw, still-encoded samples from a media
//! container. Implementations may block; all calls happen on the dedicated
//! demux worker thread, never on the control thread.

use std::time::Duration;

use thiserror::Error;

/// One raw sample (encoded packet) pulled from the container.
#[derive(Clone, Debug)]
pub struct Sample {
    pub bytes: Vec<u8>,
    /// Presentation time of the first frame in this sample.
    pub time: Duration,
    /// Playback duration covered by this sample.
    pub duration: Duration,
}

/// Track facts read at demuxer initialization.
#[derive(Clone, Debug)]
pub struct TrackMetadata {
    pub codec: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Platform channel mask; one bit per channel.
    pub channel_mask: u32,
    pub bit_depth: Option<u16>,
    pub duration: Option<Duration>,
    /// Whether the container supports seeking at the format level.
    pub seekable: bool,
    /// Total stream length in bytes when known.
    pub byte_length: Option<u64>,
    pub encoder_delay: Option<u32>,
    pub encoder_padding: Option<u32>,
}

impl TrackMetadata {
    /// Average bitrate in bits per second, derived from the stream byte
    /// length and duration when both are known.
    pub fn bitrate_estimate(&self) -> Option<u32> {
        let bytes = self.byte_length?;
        let duration = self.duration?;
        let secs = duration.as_secs_f64();
        if secs <= 0.0 {
            return None;
        }
        Some((bytes as f64 * 8.0 / secs) as u32)
    }
}

/// A buffered `[start, end)` time range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferedRange {
    pub start: Duration,
    pub end: Duration,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DemuxError {
    /// The container has no more samples. Not a failure.
    #[error("end of stream")]
    EndOfStream,
    #[error("{0}")]
    Other(String),
}

impl DemuxError {
    pub fn is_eos(&self) -> bool {
        matches!(self, DemuxError::EndOfStream)
    }
}

/// Pull-based supplier of raw samples from a media container.
pub trait TrackDemuxer: Send {
    /// Parse the container far enough to report track metadata.
    fn init(&mut self) -> Result<TrackMetadata, DemuxError>;

    /// Pull up to `count` samples. Returns `EndOfStream` only when no
    /// samples at all are available.
    fn get_samples(&mut self, count: usize) -> Result<Vec<Sample>, DemuxError>;

    /// Reposition so the next pull starts at or near `target`; returns the
    /// time actually landed on.
    fn seek(&mut self, target: Duration) -> Result<Duration, DemuxError>;

    /// Drop internal read-ahead state. Infallible by contract.
    fn reset(&mut self);

    /// Time ranges currently available without network stalls.
    fn buffered(&self) -> Vec<BufferedRange>;

    /// More underlying bytes arrived (progressive download).
    fn notify_data_arrived(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(byte_length: Option<u64>, duration: Option<Duration>) -> TrackMetadata {
        TrackMetadata {
            codec: None,
            sample_rate: 44_100,
            channels: 2,
            channel_mask: 0x3,
            bit_depth: None,
            duration,
            seekable: true,
            byte_length,
            encoder_delay: None,
            encoder_padding: None,
        }
    }

    #[test]
    fn bitrate_estimate_needs_both_inputs() {
        assert_eq!(meta(None, Some(Duration::from_secs(10))).bitrate_estimate(), None);
        assert_eq!(meta(Some(40_000), None).bitrate_estimate(), None);
        assert_eq!(meta(Some(40_000), Some(Duration::ZERO)).bitrate_estimate(), None);
    }

    #[test]
    fn bitrate_estimate_is_bits_per_second() {
        // 40 kB over 10 s = 32 kbit/s.
        let m = meta(Some(40_000), Some(Duration::from_secs(10)));
        assert_eq!(m.bitrate_estimate(), Some(32_000));
    }

    #[test]
    fn eos_is_distinguished() {
        assert!(DemuxError::EndOfStream.is_eos());
        assert!(!DemuxError::Other("broken header".into()).is_eos());
    }
}
