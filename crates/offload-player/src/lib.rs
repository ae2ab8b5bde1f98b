//! Offloaded audio playback controller.
//!
//! Drives a compressed-audio pipeline where decoding happens downstream of
//! this process: raw container packets are demuxed ahead of playback into a
//! bounded queue, and a hardware sink pulls them from its own callback
//! thread. The controller owns all session state on a single control thread
//! and coordinates init, seeking, dormancy, and end-of-stream.

pub mod config;
pub mod controller;
pub mod demux;
pub mod error;
pub mod events;
pub mod queue;
pub mod seek;
pub mod sink;
pub mod status;
pub mod symphonia_demux;

mod worker;

pub use config::PlayerConfig;
pub use controller::{PlayerHandle, SessionInit, spawn_session};
pub use demux::{BufferedRange, DemuxError, Sample, TrackDemuxer, TrackMetadata};
pub use error::PlaybackError;
pub use events::PlayerEvent;
pub use seek::{SeekTarget, SeekTicket};
pub use sink::{AudioSink, CodecMetadata, SinkCallback, SinkError, SinkFormat};
pub use symphonia_demux::SymphoniaDemuxer;
