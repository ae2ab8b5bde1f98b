//! Playback session controller.
//!
//! All session state lives on one dedicated control thread running
//! [`Controller::run`]. The public [`PlayerHandle`] turns every operation
//! into a command message; the demux worker answers over its reply channel;
//! the sink callback thread only touches the sample queue and posts notices
//! back here. Dormancy and position polling use one-shot
//! `crossbeam_channel::after` timers folded into the same `select!` loop.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, never, select, unbounded};
use tracing::{debug, info, trace, warn};

use offload_types::{ChannelKind, NextFrameStatus, PlayState, PlaybackEventKind, StatusSnapshot};

use crate::config::PlayerConfig;
use crate::demux::{DemuxError, Sample, TrackDemuxer, TrackMetadata};
use crate::error::PlaybackError;
use crate::events::PlayerEvent;
use crate::queue::SampleQueue;
use crate::seek::{SeekJob, SeekPromise, SeekSlots, SeekTarget, SeekTicket};
use crate::sink::{AudioSink, CodecMetadata, SinkCallback, SinkFormat};
use crate::status::SessionStatusState;
use crate::worker::{
    DemuxReply, DemuxReplyKind, DemuxRequestKind, DemuxWorker, RequestHolder,
};

enum Command {
    Init,
    Seek { target: SeekTarget, promise: SeekPromise },
    Flush,
    SetPlayState(PlayState),
    SetVolume(f64),
    SetPlaybackRate(f64),
    SetPreservesPitch(bool),
    SetLooping(bool),
    NotifyDataArrived,
    Shutdown { done: Sender<()> },
}

/// Notices posted from the sink callback thread.
enum SinkNotice {
    SamplesPopped,
    StreamEnded,
    TearDown,
}

enum Message {
    Command(Command),
    Sink(SinkNotice),
}

/// Everything needed to start a session.
pub struct SessionInit {
    pub demuxer: Box<dyn TrackDemuxer>,
    pub sink: Box<dyn AudioSink>,
    pub channel_kind: ChannelKind,
    /// Whether the underlying resource (file, range-request stream)
    /// supports repositioning. Dormancy requires it.
    pub transport_seekable: bool,
}

/// Owner-facing handle; cheap operations, all asynchronous.
pub struct PlayerHandle {
    msg_tx: Sender<Message>,
    status: Arc<Mutex<SessionStatusState>>,
    join: Option<JoinHandle<()>>,
}

impl PlayerHandle {
    /// Kick off demuxer init and sink open. Completion is observable via
    /// the `MetadataLoaded` event or a terminal `Error`.
    pub fn init(&self) {
        self.send(Command::Init);
    }

    /// Request a seek. The returned ticket settles with `true` on success,
    /// `false` when the seek fails or is superseded by a newer one.
    pub fn seek(&self, target: SeekTarget) -> SeekTicket {
        let (promise, ticket) = SeekPromise::new();
        self.send(Command::Seek { target, promise });
        ticket
    }

    pub fn flush(&self) {
        self.send(Command::Flush);
    }

    pub fn set_play_state(&self, state: PlayState) {
        self.send(Command::SetPlayState(state));
    }

    pub fn set_volume(&self, volume: f64) {
        self.send(Command::SetVolume(volume));
    }

    pub fn set_playback_rate(&self, rate: f64) {
        self.send(Command::SetPlaybackRate(rate));
    }

    pub fn set_preserves_pitch(&self, preserves: bool) {
        self.send(Command::SetPreservesPitch(preserves));
    }

    pub fn set_looping(&self, looping: bool) {
        self.send(Command::SetLooping(looping));
    }

    /// More bytes of the underlying resource arrived.
    pub fn notify_data_arrived(&self) {
        self.send(Command::NotifyDataArrived);
    }

    /// Tear the session down. The returned channel receives one message
    /// after the sink is closed and the demux worker has exited.
    pub fn shutdown(&self) -> Receiver<()> {
        let (done_tx, done_rx) = bounded(1);
        self.send(Command::Shutdown { done: done_tx });
        done_rx
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.lock().unwrap().snapshot()
    }

    fn send(&self, cmd: Command) {
        let _ = self.msg_tx.send(Message::Command(cmd));
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let (done_tx, _done_rx) = bounded(1);
            let _ = self.msg_tx.send(Message::Command(Command::Shutdown { done: done_tx }));
            let _ = join.join();
        }
    }
}

/// Spawn the control thread for a new session and hand back its handle.
///
/// Events are delivered on `events`; a dropped receiver never stalls the
/// session.
pub fn spawn_session(
    init: SessionInit,
    config: PlayerConfig,
    events: Sender<PlayerEvent>,
) -> PlayerHandle {
    let (msg_tx, msg_rx) = unbounded();
    let status = SessionStatusState::shared();
    let controller = Controller {
        cfg: config,
        sink: init.sink,
        worker: Some(DemuxWorker::spawn(init.demuxer)),
        queue: Arc::new(SampleQueue::new()),
        events,
        status: status.clone(),
        msg_tx: msg_tx.clone(),
        channel_kind: init.channel_kind,
        transport_seekable: init.transport_seekable,
        seeks: SeekSlots::new(),
        init_request: RequestHolder::default(),
        demux_request: RequestHolder::default(),
        demux_seek_request: RequestHolder::default(),
        play_state: PlayState::Loading,
        volume: 1.0,
        playback_rate: 1.0,
        preserves_pitch: true,
        init_done: false,
        sink_open: false,
        is_playing: false,
        in_dormant: false,
        input_eos: false,
        notified_eos: false,
        sent_first_frame: false,
        start_position: None,
        current_position: Duration::ZERO,
        next_frame_status: None,
        metadata: None,
        media_seekable: false,
        position_timer: None,
        dormant_timer: None,
    };
    let join = thread::spawn(move || controller.run(msg_rx));
    PlayerHandle { msg_tx, status, join: Some(join) }
}

struct Controller {
    cfg: PlayerConfig,
    sink: Box<dyn AudioSink>,
    worker: Option<DemuxWorker>,
    queue: Arc<SampleQueue>,
    events: Sender<PlayerEvent>,
    status: Arc<Mutex<SessionStatusState>>,
    msg_tx: Sender<Message>,
    channel_kind: ChannelKind,
    transport_seekable: bool,

    seeks: SeekSlots,
    init_request: RequestHolder,
    demux_request: RequestHolder,
    demux_seek_request: RequestHolder,

    play_state: PlayState,
    volume: f64,
    playback_rate: f64,
    preserves_pitch: bool,

    init_done: bool,
    sink_open: bool,
    is_playing: bool,
    in_dormant: bool,
    input_eos: bool,
    notified_eos: bool,
    sent_first_frame: bool,
    start_position: Option<Duration>,
    current_position: Duration,
    next_frame_status: Option<NextFrameStatus>,
    metadata: Option<TrackMetadata>,
    media_seekable: bool,

    position_timer: Option<Receiver<Instant>>,
    dormant_timer: Option<Receiver<Instant>>,
}

impl Controller {
    fn run(mut self, msg_rx: Receiver<Message>) {
        let idle = never::<Instant>();
        loop {
            let reply_rx = match &self.worker {
                Some(worker) => worker.replies().clone(),
                None => never(),
            };
            let position_rx = self.position_timer.clone().unwrap_or_else(|| idle.clone());
            let dormant_rx = self.dormant_timer.clone().unwrap_or_else(|| idle.clone());

            select! {
                recv(msg_rx) -> msg => match msg {
                    Ok(Message::Command(Command::Shutdown { done })) => {
                        self.handle_shutdown();
                        let _ = done.send(());
                        break;
                    }
                    Ok(msg) => self.handle_message(msg),
                    Err(_) => {
                        // Every handle dropped without an explicit shutdown.
                        self.handle_shutdown();
                        break;
                    }
                },
                recv(reply_rx) -> reply => {
                    if let Ok(reply) = reply {
                        self.handle_demux_reply(reply);
                    }
                },
                recv(position_rx) -> _ => {
                    self.position_timer = None;
                    self.update_current_position_periodically();
                },
                recv(dormant_rx) -> _ => {
                    self.dormant_timer = None;
                    self.enter_dormant();
                },
            }
        }
        debug!("control thread exiting");
    }

    fn handle_message(&mut self, msg: Message) {
        match msg {
            Message::Command(Command::Init) => self.init_internal(),
            Message::Command(Command::Seek { target, promise }) => {
                self.handle_seek(target, true, Some(promise));
            }
            Message::Command(Command::Flush) => self.flush(),
            Message::Command(Command::SetPlayState(state)) => self.play_state_changed(state),
            Message::Command(Command::SetVolume(volume)) => {
                self.volume = volume;
                self.with_status(|s| s.volume = volume);
                self.volume_changed();
            }
            Message::Command(Command::SetPlaybackRate(rate)) => {
                self.playback_rate = rate;
                self.with_status(|s| s.playback_rate = rate);
                self.playback_settings_changed();
            }
            Message::Command(Command::SetPreservesPitch(preserves)) => {
                self.preserves_pitch = preserves;
                self.with_status(|s| s.preserves_pitch = preserves);
                self.playback_settings_changed();
            }
            Message::Command(Command::SetLooping(looping)) => {
                self.with_status(|s| s.looping = looping);
            }
            Message::Command(Command::NotifyDataArrived) => self.notify_data_arrived(),
            Message::Command(Command::Shutdown { .. }) => unreachable!("handled in run"),
            Message::Sink(SinkNotice::SamplesPopped) => self.on_samples_popped(),
            Message::Sink(SinkNotice::StreamEnded) => self.on_stream_ended(),
            Message::Sink(SinkNotice::TearDown) => self.on_tear_down(),
        }
    }

    // ---- demuxer init and sink open ----

    fn init_internal(&mut self) {
        if self.init_request.exists() || self.init_done {
            return;
        }
        debug!("initializing demuxer");
        if let Some(id) = self.request(DemuxRequestKind::Init) {
            self.init_request.track(id);
        }
    }

    fn handle_demux_reply(&mut self, reply: DemuxReply) {
        match reply.kind {
            DemuxReplyKind::Init(result) => {
                if !self.init_request.complete(reply.id) {
                    trace!(id = reply.id, "dropping stale init reply");
                    return;
                }
                match result {
                    Ok(metadata) => self.on_demuxer_init_done(metadata),
                    Err(e) => {
                        self.notify_error(PlaybackError::DemuxerInit(e.to_string()));
                    }
                }
            }
            DemuxReplyKind::Samples(result) => {
                if !self.demux_request.complete(reply.id) {
                    trace!(id = reply.id, "dropping stale sample reply");
                    return;
                }
                match result {
                    Ok(samples) => self.on_demux_completed(samples),
                    Err(e) => self.on_demux_failed(e),
                }
            }
            DemuxReplyKind::Seek(result) => {
                if !self.demux_seek_request.complete(reply.id) {
                    trace!(id = reply.id, "dropping stale seek reply");
                    return;
                }
                match result {
                    Ok(time) => {
                        self.set_position(time);
                        self.notify_seeked(true);
                    }
                    Err(e) => {
                        debug!(error = %e, "demuxer seek failed");
                        self.notify_seeked(false);
                    }
                }
                // Unless the settled seek chained into another one, resume
                // demuxing from the new position.
                if !self.demux_seek_request.exists() {
                    self.maybe_start_demuxing();
                }
            }
            DemuxReplyKind::Buffered(ranges) => {
                self.with_status(|s| s.buffered = ranges);
                self.maybe_start_demuxing();
            }
        }
    }

    fn on_demuxer_init_done(&mut self, metadata: TrackMetadata) {
        info!(
            codec = metadata.codec.as_deref().unwrap_or("unknown"),
            sample_rate = metadata.sample_rate,
            channels = metadata.channels,
            "demuxer initialized"
        );
        self.media_seekable = metadata.seekable;
        self.with_status(|s| {
            s.duration = metadata.duration;
            s.sample_rate = Some(metadata.sample_rate);
            s.channels = Some(metadata.channels);
            s.codec = metadata.codec.clone();
        });
        self.metadata = Some(metadata.clone());
        self.send_event(PlayerEvent::MetadataLoaded(metadata));
        if !self.media_seekable {
            self.send_event(PlayerEvent::MediaNotSeekable);
        }
        self.open_audio_sink();
    }

    fn open_audio_sink(&mut self) {
        let Some(metadata) = self.metadata.clone() else {
            return;
        };
        let format = SinkFormat {
            sample_rate: metadata.sample_rate,
            channels: metadata.channels,
            channel_mask: metadata.channel_mask,
            codec: metadata.codec.clone(),
            bit_depth: metadata.bit_depth,
            bitrate: metadata.bitrate_estimate(),
            duration: metadata.duration,
            channel_kind: self.channel_kind,
        };
        let callback: Arc<dyn SinkCallback> = Arc::new(QueueFiller {
            queue: self.queue.clone(),
            msg_tx: self.msg_tx.clone(),
        });
        match self.sink.open(&format, callback) {
            Ok(()) => {
                info!(bitrate = ?format.bitrate, "audio sink opened");
                self.sink_open = true;
                self.sink.set_parameters(&CodecMetadata {
                    sample_rate: metadata.sample_rate,
                    channel_mask: metadata.channel_mask,
                    avg_bitrate: metadata.bitrate_estimate().unwrap_or(0),
                    encoder_delay: metadata.encoder_delay,
                    encoder_padding: metadata.encoder_padding,
                });
                self.init_done = true;
                self.volume_changed();
                self.playback_settings_changed();
                // A deferred seek and the first demux batch are mutually
                // exclusive here; the seek repositions before any pull.
                if !self.fire_pending_seek_if_exists() {
                    self.maybe_start_demuxing();
                }
                self.apply_play_state();
            }
            Err(e) => {
                self.notify_error(PlaybackError::SinkOpen(e.to_string()));
            }
        }
    }

    // ---- demux-ahead ----

    fn maybe_start_demuxing(&mut self) {
        if !self.init_done {
            return;
        }
        if self.demux_request.exists() || self.demux_seek_request.exists() {
            return;
        }
        if self.queue.is_finished() || self.queue.duration() > self.cfg.queue_lower_threshold {
            return;
        }
        debug!("starting demux");
        self.demux_samples();
    }

    fn demux_samples(&mut self) {
        debug_assert!(!self.demux_request.exists());
        if let Some(id) = self.request(DemuxRequestKind::Pull { count: self.cfg.demux_batch }) {
            self.demux_request.track(id);
        }
    }

    fn on_demux_completed(&mut self, samples: Vec<Sample>) {
        for sample in samples {
            if self.start_position.is_none() {
                self.start_position = Some(sample.time);
                self.set_next_frame_status(NextFrameStatus::Available);
                if !self.sent_first_frame {
                    self.sent_first_frame = true;
                    self.send_event(PlayerEvent::FirstFrameLoaded);
                }
            }
            self.queue.push(sample);
        }
        trace!(queued_ms = self.queue.duration().as_millis() as u64, "demuxed batch");
        if self.queue.duration() < self.cfg.queue_upper_threshold {
            self.demux_samples();
        }
    }

    fn on_demux_failed(&mut self, error: DemuxError) {
        if error.is_eos() {
            debug!("demuxer reached end of stream");
            self.input_eos = true;
            self.queue.finish();
        } else {
            // Already-queued samples stay playable; the session survives.
            self.queue.finish();
            self.notify_error(PlaybackError::Demux(error.to_string()));
        }
        if self.queue.at_end_of_stream() && self.sink_open {
            self.sink.stop();
        }
    }

    fn on_samples_popped(&mut self) {
        if self.queue.at_end_of_stream() {
            debug!("sample queue drained");
            if self.sink_open {
                self.sink.stop();
            }
            return;
        }
        self.maybe_start_demuxing();
    }

    fn on_stream_ended(&mut self) {
        if !self.input_eos || self.notified_eos {
            return;
        }
        info!("playback ended");
        self.notified_eos = true;
        self.set_next_frame_status(NextFrameStatus::Unavailable);
        self.send_event(PlayerEvent::Playback(PlaybackEventKind::PlaybackEnded));
    }

    // ---- seeking ----

    fn handle_seek(&mut self, target: SeekTarget, visible: bool, promise: Option<SeekPromise>) {
        debug!(time_ms = target.time.as_millis() as u64, visible, "seek requested");
        if visible {
            self.exit_dormant();
        }
        let job = SeekJob { target, visible, promise };
        if self.seeks.has_current() || self.needs_deferred_seek() {
            self.seeks.defer(job);
            return;
        }
        self.seeks.begin(job);
        self.seek_internal(target, visible);
    }

    /// Seeks cannot reach the demuxer until the sink has opened.
    fn needs_deferred_seek(&self) -> bool {
        !self.init_done
    }

    fn seek_internal(&mut self, target: SeekTarget, visible: bool) {
        debug_assert!(!self.demux_seek_request.exists());
        if visible {
            self.set_next_frame_status(NextFrameStatus::UnavailableSeeking);
            self.send_event(PlayerEvent::Playback(PlaybackEventKind::SeekStarted));
        }
        self.flush();
        if let Some(id) = self.request(DemuxRequestKind::Seek { target: target.time }) {
            self.demux_seek_request.track(id);
        }
    }

    fn notify_seeked(&mut self, success: bool) {
        debug!(success, "seek settled");
        match self.seeks.finish_current(success) {
            Some((target, visible)) => self.seek_internal(target, visible),
            // Re-assert the play state; this is what restarts the sink
            // after a dormancy or teardown recovery seek.
            None => self.play_state_changed(self.play_state),
        }
    }

    fn fire_pending_seek_if_exists(&mut self) -> bool {
        debug_assert!(!self.seeks.has_current());
        match self.seeks.promote_pending() {
            Some((target, visible)) => {
                debug!(time_ms = target.time.as_millis() as u64, "firing deferred seek");
                self.seek_internal(target, visible);
                true
            }
            None => false,
        }
    }

    // ---- flush and reset ----

    fn flush(&mut self) {
        debug!("flush");
        if self.sink_open {
            self.sink.pause();
            self.sink.flush();
        }
        self.queue.reset();
        self.input_eos = false;
        self.notified_eos = false;
        self.demux_request.disconnect_if_exists();
        self.start_position = None;
        if self.sink_open && self.is_playing {
            self.sink.start();
        }
    }

    fn reset_internal(&mut self) {
        debug!("resetting session");
        self.init_done = false;
        self.is_playing = false;
        self.flush();
        if self.sink_open {
            self.sink.stop();
            self.sink.flush();
            self.sink.close();
            self.sink_open = false;
        }
        self.request(DemuxRequestKind::Reset);
        self.init_request.disconnect_if_exists();
        self.demux_request.disconnect_if_exists();
        if self.demux_seek_request.exists() {
            // The physical seek outcome is lost; its requester must not
            // wait forever. A parked pending seek survives the reset.
            self.demux_seek_request.disconnect_if_exists();
            self.seeks.abort_current();
        }
        self.position_timer = None;
    }

    fn handle_shutdown(&mut self) {
        info!("shutting down session");
        self.reset_internal();
        self.seeks.clear();
        self.dormant_timer = None;
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }

    fn on_tear_down(&mut self) {
        warn!("audio sink torn down, rebuilding session");
        self.update_current_position();
        let resume = self.current_position;
        self.reset_internal();
        self.handle_seek(SeekTarget::accurate(resume), false, None);
        self.init_internal();
    }

    // ---- play state, volume, rate ----

    fn play_state_changed(&mut self, state: PlayState) {
        self.play_state = state;
        self.with_status(|s| s.play_state = state);
        match state {
            PlayState::Playing => {
                self.exit_dormant();
                self.apply_play_state();
            }
            PlayState::Paused => {
                self.apply_play_state();
                self.start_dormant_timer();
            }
            PlayState::Loading => {}
        }
    }

    /// Reconcile the sink with the requested play state. No-op until the
    /// sink is open.
    fn apply_play_state(&mut self) {
        if !self.init_done {
            return;
        }
        match self.play_state {
            PlayState::Playing if !self.is_playing => {
                debug!("starting sink");
                self.is_playing = true;
                self.sink.start();
                self.position_timer =
                    Some(crossbeam_channel::after(self.cfg.position_poll_interval));
            }
            PlayState::Paused if self.is_playing => {
                debug!("pausing sink");
                self.is_playing = false;
                self.sink.pause();
                self.update_current_position();
            }
            _ => {}
        }
    }

    fn volume_changed(&mut self) {
        if self.init_done {
            self.sink.set_volume(self.volume);
        }
    }

    fn playback_settings_changed(&mut self) {
        if self.init_done {
            let speed = self.playback_rate as f32;
            let pitch = if self.preserves_pitch { 1.0 } else { speed };
            self.sink.set_playback_rate(speed, pitch);
        }
    }

    // ---- position ----

    fn update_current_position_periodically(&mut self) {
        if self.update_current_position() {
            self.position_timer = Some(crossbeam_channel::after(self.cfg.position_poll_interval));
        }
    }

    /// Refresh the position from the sink's frame counter. Returns whether
    /// the periodic poll should stay armed.
    fn update_current_position(&mut self) -> bool {
        if !self.init_done || !self.sink_open {
            return false;
        }
        let Some(metadata) = self.metadata.as_ref() else {
            return false;
        };
        if metadata.sample_rate == 0 {
            return false;
        }
        if let Some(start) = self.start_position {
            let played = self.sink.position();
            let offset = Duration::from_secs_f64(played as f64 / metadata.sample_rate as f64);
            self.set_position(start + offset);
        }
        self.play_state == PlayState::Playing
    }

    fn set_position(&mut self, position: Duration) {
        self.current_position = position;
        self.with_status(|s| s.position = position);
    }

    // ---- dormancy ----

    fn start_dormant_timer(&mut self) {
        if self.in_dormant {
            return;
        }
        if !self.transport_seekable || !self.media_seekable {
            return;
        }
        let timeout = self.cfg.dormant_timeout_ms;
        if timeout < 0 {
            return;
        }
        if timeout == 0 {
            self.enter_dormant();
            return;
        }
        debug!(timeout_ms = timeout, "arming dormancy timer");
        self.dormant_timer =
            Some(crossbeam_channel::after(Duration::from_millis(timeout as u64)));
    }

    fn enter_dormant(&mut self) {
        if self.in_dormant {
            return;
        }
        info!("entering dormancy");
        self.in_dormant = true;
        self.with_status(|s| s.dormant = true);
        self.update_current_position();
        self.reset_internal();
        // Exiting dormancy replays this seek to restore the position.
        self.handle_seek(SeekTarget::accurate(self.current_position), false, None);
    }

    fn exit_dormant(&mut self) {
        self.dormant_timer = None;
        if self.in_dormant {
            info!("exiting dormancy");
            self.in_dormant = false;
            self.with_status(|s| s.dormant = false);
            self.init_internal();
        }
    }

    // ---- progressive data ----

    fn notify_data_arrived(&mut self) {
        self.request(DemuxRequestKind::DataArrived);
    }

    // ---- helpers ----

    fn request(&mut self, kind: DemuxRequestKind) -> Option<u64> {
        self.worker.as_mut().map(|w| w.request(kind))
    }

    fn set_next_frame_status(&mut self, status: NextFrameStatus) {
        if self.next_frame_status == Some(status) {
            return;
        }
        self.next_frame_status = Some(status);
        self.send_event(PlayerEvent::NextFrame(status));
    }

    fn notify_error(&mut self, error: PlaybackError) {
        warn!(error = %error, "playback error");
        self.send_event(PlayerEvent::Error(error));
    }

    fn send_event(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    fn with_status(&self, f: impl FnOnce(&mut SessionStatusState)) {
        if let Ok(mut status) = self.status.lock() {
            f(&mut status);
        }
    }
}

/// The sink-callback side: drains the queue, posts notices to the control
/// thread, never blocks on it.
struct QueueFiller {
    queue: Arc<SampleQueue>,
    msg_tx: Sender<Message>,
}

impl SinkCallback for QueueFiller {
    fn fill(&self, dst: &mut [u8]) -> usize {
        let outcome = self.queue.fill(dst);
        if outcome.popped > 0 {
            let _ = self.msg_tx.send(Message::Sink(SinkNotice::SamplesPopped));
        }
        outcome.bytes
    }

    fn stream_ended(&self) {
        let _ = self.msg_tx.send(Message::Sink(SinkNotice::StreamEnded));
    }

    fn tear_down(&self) {
        let _ = self.msg_tx.send(Message::Sink(SinkNotice::TearDown));
    }
}
