//! Symphonia-backed packet demuxer.
//!
//! Probes the container and pulls raw, still-encoded packets; nothing here
//! decodes. Runs on the demux worker thread, so blocking reads are fine.

use std::time::Duration;

use symphonia::core::codecs::CodecParameters;
use symphonia::core::errors::Error as SymError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};
use tracing::debug;

use crate::demux::{BufferedRange, DemuxError, Sample, TrackDemuxer, TrackMetadata};

pub struct SymphoniaDemuxer {
    format: Box<dyn FormatReader>,
    track_id: u32,
    params: CodecParameters,
    time_base: Option<TimeBase>,
    seekable: bool,
    byte_length: Option<u64>,
}

impl SymphoniaDemuxer {
    /// Probe `source` and select its default audio track.
    pub fn new(source: Box<dyn MediaSource>, hint: Hint) -> Result<Self, DemuxError> {
        let seekable = source.is_seekable();
        let byte_length = source.byte_len();
        let mss = MediaSourceStream::new(source, Default::default());

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DemuxError::Other(format!("probe failed: {e}")))?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| DemuxError::Other("no default audio track".into()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();
        let time_base = params.time_base;

        Ok(Self { format, track_id, params, time_base, seekable, byte_length })
    }

    fn time_from_ts(&self, ts: u64) -> Duration {
        match self.time_base {
            Some(tb) => {
                let time = tb.calc_time(ts);
                Duration::from_secs_f64(time.seconds as f64 + time.frac)
            }
            None => Duration::ZERO,
        }
    }
}

impl TrackDemuxer for SymphoniaDemuxer {
    fn init(&mut self) -> Result<TrackMetadata, DemuxError> {
        let sample_rate = self
            .params
            .sample_rate
            .ok_or_else(|| DemuxError::Other("unknown sample rate".into()))?;
        let channels = self
            .params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| DemuxError::Other("unknown channel layout".into()))?;
        let channel_mask = self
            .params
            .channels
            .map(|c| c.bits())
            .unwrap_or_else(|| default_channel_mask(channels));

        Ok(TrackMetadata {
            codec: codec_name_from_params(&self.params),
            sample_rate,
            channels,
            channel_mask,
            bit_depth: self
                .params
                .bits_per_sample
                .or(self.params.bits_per_coded_sample)
                .and_then(|v| u16::try_from(v).ok()),
            duration: duration_from_codec_params(&self.params),
            seekable: self.seekable,
            byte_length: self.byte_length,
            encoder_delay: self.params.delay,
            encoder_padding: self.params.padding,
        })
    }

    fn get_samples(&mut self, count: usize) -> Result<Vec<Sample>, DemuxError> {
        let mut samples = Vec::new();
        while samples.len() < count {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(e) => {
                    let err = map_symphonia_error(e);
                    if samples.is_empty() {
                        return Err(err);
                    }
                    if err.is_eos() {
                        // EOS surfaces on the next, empty pull.
                        break;
                    }
                    return Err(err);
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            samples.push(Sample {
                bytes: packet.buf().to_vec(),
                time: self.time_from_ts(packet.ts()),
                duration: self.time_from_ts(packet.dur()),
            });
        }
        Ok(samples)
    }

    fn seek(&mut self, target: Duration) -> Result<Duration, DemuxError> {
        let secs = target.as_secs();
        let frac = target.subsec_nanos() as f64 / 1e9;
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time { time: Time::new(secs, frac), track_id: Some(self.track_id) },
            )
            .map_err(map_symphonia_error)?;
        Ok(self.time_from_ts(seeked.actual_ts))
    }

    fn reset(&mut self) {
        // The reader keeps no read-ahead of its own; the next seek
        // re-synchronizes it.
        debug!("demuxer reset");
    }

    fn buffered(&self) -> Vec<BufferedRange> {
        // Local/seekable sources are fully available.
        match (self.seekable, duration_from_codec_params(&self.params)) {
            (true, Some(duration)) => vec![BufferedRange { start: Duration::ZERO, end: duration }],
            _ => vec![],
        }
    }
}

fn map_symphonia_error(e: SymError) -> DemuxError {
    match e {
        SymError::IoError(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            DemuxError::EndOfStream
        }
        other => DemuxError::Other(other.to_string()),
    }
}

/// Best-effort duration from codec metadata.
fn duration_from_codec_params(params: &CodecParameters) -> Option<Duration> {
    let frames = params.n_frames?;
    let rate = params.sample_rate?;
    if rate == 0 {
        return None;
    }
    Some(Duration::from_secs_f64(frames as f64 / rate as f64))
}

/// Best-effort codec label used for sink open and status payloads.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}

fn default_channel_mask(channels: u16) -> u32 {
    if channels == 0 || channels > 32 {
        return 0;
    }
    (1u32 << channels) - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Minimal 16-bit PCM WAV with `frames` frames of silence.
    fn wav_bytes(frames: usize, rate: u32, channels: u16) -> Vec<u8> {
        let data_len = frames * channels as usize * 2;
        let byte_rate = rate * channels as u32 * 2;
        let block_align = channels * 2;
        let mut out = Vec::with_capacity(44 + data_len);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len as u32).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&rate.to_le_bytes());
        out.extend_from_slice(&byte_rate.to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&(data_len as u32).to_le_bytes());
        out.resize(44 + data_len, 0);
        out
    }

    fn open_wav(frames: usize, rate: u32) -> SymphoniaDemuxer {
        let bytes = wav_bytes(frames, rate, 2);
        let mut hint = Hint::new();
        hint.with_extension("wav");
        SymphoniaDemuxer::new(Box::new(Cursor::new(bytes)), hint).unwrap()
    }

    #[test]
    fn init_reads_track_metadata() {
        let mut demuxer = open_wav(48_000, 48_000);
        let meta = demuxer.init().unwrap();
        assert_eq!(meta.sample_rate, 48_000);
        assert_eq!(meta.channels, 2);
        assert!(meta.seekable);
        assert_eq!(meta.duration, Some(Duration::from_secs(1)));
        assert!(meta.byte_length.is_some());
        assert!(meta.bitrate_estimate().is_some());
    }

    #[test]
    fn pulls_raw_packets_until_eos() {
        let mut demuxer = open_wav(4800, 48_000);
        demuxer.init().unwrap();
        let mut total = Duration::ZERO;
        loop {
            match demuxer.get_samples(8) {
                Ok(samples) => {
                    assert!(!samples.is_empty());
                    for s in &samples {
                        assert!(!s.bytes.is_empty());
                        total += s.duration;
                    }
                }
                Err(e) => {
                    assert!(e.is_eos());
                    break;
                }
            }
        }
        // 4800 frames at 48 kHz = 100 ms of audio.
        let total_ms = total.as_millis();
        assert!((99..=101).contains(&total_ms), "total {total_ms} ms");
    }

    #[test]
    fn seek_lands_near_target() {
        let mut demuxer = open_wav(48_000, 48_000);
        demuxer.init().unwrap();
        let landed = demuxer.seek(Duration::from_millis(500)).unwrap();
        assert!(landed <= Duration::from_millis(500));
        let samples = demuxer.get_samples(1).unwrap();
        assert_eq!(samples.len(), 1);
        assert!(samples[0].time >= landed);
    }

    #[test]
    fn buffered_covers_whole_seekable_source() {
        let mut demuxer = open_wav(48_000, 48_000);
        demuxer.init().unwrap();
        let ranges = demuxer.buffered();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].start, Duration::ZERO);
        assert_eq!(ranges[0].end, Duration::from_secs(1));
    }
}
