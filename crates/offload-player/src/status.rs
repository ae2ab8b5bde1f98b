//! Shared session status, readable from any thread.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use offload_types::{BufferedRangeMs, PlayState, StatusSnapshot};

use crate::demux::BufferedRange;

#[derive(Debug)]
pub struct SessionStatusState {
    pub play_state: PlayState,
    pub position: Duration,
    pub duration: Option<Duration>,
    pub buffered: Vec<BufferedRange>,
    pub volume: f64,
    pub playback_rate: f64,
    pub preserves_pitch: bool,
    pub looping: bool,
    pub dormant: bool,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub codec: Option<String>,
}

impl Default for SessionStatusState {
    fn default() -> Self {
        Self {
            play_state: PlayState::Loading,
            position: Duration::ZERO,
            duration: None,
            buffered: Vec::new(),
            volume: 1.0,
            playback_rate: 1.0,
            preserves_pitch: true,
            looping: false,
            dormant: false,
            sample_rate: None,
            channels: None,
            codec: None,
        }
    }
}

impl SessionStatusState {
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            play_state: self.play_state,
            position_ms: self.position.as_millis() as u64,
            duration_ms: self.duration.map(|d| d.as_millis() as u64),
            buffered: self
                .buffered
                .iter()
                .map(|r| BufferedRangeMs {
                    start_ms: r.start.as_millis() as u64,
                    end_ms: r.end.as_millis() as u64,
                })
                .collect(),
            volume: self.volume,
            playback_rate: self.playback_rate,
            preserves_pitch: self.preserves_pitch,
            looping: self.looping,
            dormant: self.dormant,
            sample_rate: self.sample_rate,
            channels: self.channels,
            codec: self.codec.clone(),
        }
    }
}
