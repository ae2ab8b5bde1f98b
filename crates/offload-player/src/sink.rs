//! Audio sink collaborator boundary.
//!
//! The sink represents a hardware (or emulated) compressed-audio output. It
//! pulls data by invoking [`SinkCallback::fill`] from its own thread; the
//! controller never pushes. All other callbacks are fire-and-forget notices.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use offload_types::ChannelKind;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The output refused the requested format or no offload output exists.
    #[error("{0}")]
    Open(String),
}

/// Parameters for opening the output.
#[derive(Clone, Debug)]
pub struct SinkFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub channel_mask: u32,
    pub codec: Option<String>,
    pub bit_depth: Option<u16>,
    /// Average bitrate estimate in bits per second.
    pub bitrate: Option<u32>,
    pub duration: Option<Duration>,
    pub channel_kind: ChannelKind,
}

/// Codec details forwarded to the output after a successful open.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CodecMetadata {
    pub sample_rate: u32,
    pub channel_mask: u32,
    pub avg_bitrate: u32,
    pub encoder_delay: Option<u32>,
    pub encoder_padding: Option<u32>,
}

/// Callbacks the sink invokes from its own thread.
pub trait SinkCallback: Send + Sync {
    /// Copy queued bytes into `dst`; returns the number written. May return
    /// less than `dst.len()` on underrun or at end of stream.
    fn fill(&self, dst: &mut [u8]) -> usize;

    /// The sink played out everything written to it.
    fn stream_ended(&self);

    /// The underlying audio session was lost; the owner must rebuild.
    fn tear_down(&self);
}

/// Compressed-audio output abstraction.
///
/// Every method except the callback-driven pulls is called from the control
/// thread only.
pub trait AudioSink: Send {
    fn open(&mut self, format: &SinkFormat, callback: Arc<dyn SinkCallback>) -> Result<(), SinkError>;
    fn start(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    fn flush(&mut self);
    fn close(&mut self);
    fn set_volume(&mut self, volume: f64);
    /// `pitch` equals `speed` when pitch preservation is off, `1.0` otherwise.
    fn set_playback_rate(&mut self, speed: f32, pitch: f32);
    fn set_parameters(&mut self, metadata: &CodecMetadata);
    /// Frames played since the last start or flush.
    fn position(&self) -> u64;
}
