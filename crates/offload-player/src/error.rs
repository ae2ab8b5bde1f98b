use thiserror::Error;

/// Observer-visible playback failures.
///
/// `DemuxerInit` and `SinkOpen` are terminal for the session; `Demux` leaves
/// already-queued audio playable.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("demuxer initialization failed: {0}")]
    DemuxerInit(String),
    #[error("audio sink open failed: {0}")]
    SinkOpen(String),
    #[error("demuxing failed mid-stream: {0}")]
    Demux(String),
}
