use std::time::Duration;

/// Tuning parameters for a playback session.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Demux-ahead pauses once at least this much audio is queued.
    pub queue_upper_threshold: Duration,
    /// Demux-ahead resumes once the queue drains to this level or below.
    pub queue_lower_threshold: Duration,
    /// Samples requested per demuxer pull.
    pub demux_batch: usize,
    /// Delay before a paused session goes dormant, in milliseconds.
    /// Zero enters dormancy immediately on pause; negative disables it.
    pub dormant_timeout_ms: i64,
    /// Interval between position updates while playing.
    pub position_poll_interval: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            queue_upper_threshold: Duration::from_secs(10),
            queue_lower_threshold: Duration::from_secs(1),
            demux_batch: 10,
            dormant_timeout_ms: 5000,
            position_poll_interval: Duration::from_millis(250),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_lower_below_upper() {
        let cfg = PlayerConfig::default();
        assert!(cfg.queue_lower_threshold < cfg.queue_upper_threshold);
        assert!(cfg.demux_batch > 0);
    }
}
