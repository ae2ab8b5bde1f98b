//! Shared types for the offload playback controller.
//!
//! These are the plain values crossing the session API boundary: play state,
//! seek modes, observer event kinds, the audio channel classification, and
//! the status snapshot returned to UI/API layers.

use serde::{Deserialize, Serialize};

/// High-level playback state of a session, driven by the owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayState {
    /// Metadata not loaded yet.
    Loading,
    Playing,
    Paused,
}

/// Requested accuracy for a seek.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeekMode {
    /// Land exactly on the target time.
    Accurate,
    /// Land on the closest sync point at or before the target.
    PreviousSyncPoint,
    /// Land on the next frame after the target.
    NextFrame,
}

/// Whether the next frame of media is ready for rendering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextFrameStatus {
    Available,
    Unavailable,
    UnavailableSeeking,
}

/// UI-facing playback milestones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEventKind {
    SeekStarted,
    PlaybackEnded,
}

/// Classification of the audio stream, mapped to a platform output type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    #[default]
    Music,
    Notification,
    Alarm,
    Telephony,
    Ring,
    EnforcedAudible,
    System,
}

/// A buffered `[start, end)` range in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedRangeMs {
    pub start_ms: u64,
    pub end_ms: u64,
}

/// Snapshot of a playback session suitable for API responses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub play_state: PlayState,
    /// Current playback position in milliseconds.
    pub position_ms: u64,
    /// Total duration in milliseconds when known.
    pub duration_ms: Option<u64>,
    pub buffered: Vec<BufferedRangeMs>,
    pub volume: f64,
    pub playback_rate: f64,
    pub preserves_pitch: bool,
    pub looping: bool,
    /// Whether the pipeline is suspended to save power.
    pub dormant: bool,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub codec: Option<String>,
}
