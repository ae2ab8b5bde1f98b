//! Observer notifications.

use offload_types::{NextFrameStatus, PlaybackEventKind};

use crate::demux::TrackMetadata;
use crate::error::PlaybackError;

/// Fire-and-forget notifications delivered to the session owner over a
/// channel. A disconnected receiver never stalls playback.
#[derive(Clone, Debug)]
pub enum PlayerEvent {
    /// Track facts became available; also signals the session is ready.
    MetadataLoaded(TrackMetadata),
    /// The first sample after init was demuxed. Fires once per session.
    FirstFrameLoaded,
    Playback(PlaybackEventKind),
    NextFrame(NextFrameStatus),
    /// The container cannot seek; UI should disable the scrubber.
    MediaNotSeekable,
    Error(PlaybackError),
}
