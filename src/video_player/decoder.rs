// SPDX-License-Identifier: MPL-2.0
//! The decode thread.
//!
//! One [`DecodeLoop`] per player owns the media session, the audio device,
//! the tone mapping graph and the clock state. The facade talks to it through
//! a command queue guarded by a mutex and condition variable, plus the
//! lock-free seek coordinator.
//!
//! Each [`DecodeLoop::step`] applies pending commands, handles a pending seek
//! and then does one unit of decode work: receive a frame, or read and route
//! one packet. Frames flow through a fixed pipeline:
//!
//! ```text
//! validate -> seek gate -> audio hold -> sync -> slot check -> transfer
//!          -> validate -> tone map / convert -> generation check -> copy -> offer
//! ```
//!
//! With `zero_copy` enabled, SDR hardware frames skip the transfer and are
//! offered as GPU surfaces right after the slot check.
//!
//! Everything before the slot check is cheap, so late or stale frames never
//! pay for a transfer, a filter pass or a staging copy.

use super::audio::{negotiate_output_format, RemainderWriter};
use super::audio_output::{AudioControl, AudioHost, AudioSink};
use super::backend::{AudioChunk, BackendFactory, MediaBackend, PacketRead, StreamInfo, VideoReceive};
use super::failure_run::{FailureReport, FailureRun};
use super::handoff::{FrameFormat, FrameSlot, PresentedFrame, SurfaceFrame};
use super::hdr_filter::{needs_tone_mapping, tone_mapping_available, HdrToneMapper, ToneMapOutcome};
use super::hw_surface::{is_frame_valid, is_hardware_format, surface_sw_format, HardwareTransfer};
use super::seek::{Admission, SeekCoordinator};
use super::state::{ObservableState, PlaybackState};
use super::stats::{DropReason, PlaybackStats};
use super::sync::{decide, ClockState, SyncDecision, SyncThresholds, TimeSource};
use super::time_units::{millis_to_secs, secs_to_millis, ticks_to_secs};
use crate::config::{self, PlayerConfig, TRANSIENT_FAILURE_LOG_LIMIT};
use crate::logging::should_log_occurrence;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame;
use ffmpeg_next::Rational;
use ffmpeg_next::software::scaling;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Upper bound on an idle wait; commands and seeks wake the thread earlier.
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// Repeated per-frame diagnostics: log the first few, then one in this many.
const DROP_LOG_BURST: u64 = 5;
const DROP_LOG_PERIOD: u64 = 100;

/// Commands from the facade, applied in order by the decode thread.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    Open(PathBuf),
    Play,
    Pause,
    Stop,
    DisplaySize(Option<(u32, u32)>),
    /// Volume or mute changed and should survive a restart.
    PersistAudio { volume: f32, muted: bool },
}

#[derive(Debug, Default)]
pub(crate) struct ControlState {
    commands: VecDeque<Command>,
    shutdown: bool,
}

/// State shared between the facade and the decode thread.
pub(crate) struct Shared {
    control: Mutex<ControlState>,
    wake: Condvar,
    pub(crate) state: ObservableState,
    pub(crate) seek: SeekCoordinator,
    pub(crate) slot: FrameSlot,
    pub(crate) audio: Arc<AudioControl>,
    pub(crate) stats: PlaybackStats,
}

impl Shared {
    pub(crate) fn new(state: ObservableState, audio: Arc<AudioControl>) -> Self {
        Self {
            control: Mutex::new(ControlState::default()),
            wake: Condvar::new(),
            state,
            seek: SeekCoordinator::new(),
            slot: FrameSlot::new(),
            audio,
            stats: PlaybackStats::default(),
        }
    }

    fn control(&self) -> MutexGuard<'_, ControlState> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push(&self, command: Command) {
        self.control().commands.push_back(command);
        self.wake.notify_all();
    }

    /// Wakes the decode thread without a command, e.g. after a seek request.
    pub(crate) fn notify(&self) {
        let _guard = self.control();
        self.wake.notify_all();
    }

    pub(crate) fn shutdown(&self) {
        self.control().shutdown = true;
        self.wake.notify_all();
    }

    fn take_commands(&self) -> (Vec<Command>, bool) {
        let mut control = self.control();
        (control.commands.drain(..).collect(), control.shutdown)
    }

    fn wait_for_work(&self, timeout: Duration) {
        let control = self.control();
        if !control.commands.is_empty() || control.shutdown || self.seek.has_pending_request() {
            return;
        }
        let _ = self
            .wake
            .wait_timeout(control, timeout)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Phase of the decode loop for the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodePhase {
    /// No session, or not playing.
    #[default]
    Idle,
    /// Alternating frame receives and packet reads.
    Decoding,
    /// End of file reached; the drain packet was sent.
    Draining,
    /// End of stream reached.
    Stopped,
}

/// What one [`DecodeLoop::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing to do until a command arrives.
    Idle,
    /// Decode work that did not present a frame.
    Working,
    /// A frame was offered to the presentation slot.
    Presented,
    /// The stream just ended.
    EndOfStream,
    /// The player is shutting down.
    Shutdown,
}

/// References the session needs from the loop while it works.
struct Env<'a> {
    shared: &'a Shared,
    time: &'a dyn TimeSource,
    thresholds: &'a SyncThresholds,
}

struct AudioPath {
    sink: Box<dyn AudioSink>,
    writer: RemainderWriter,
}

/// Cached software conversion to NV12.
#[derive(Default)]
struct FrameConverter {
    scaler: Option<((Pixel, u32, u32), scaling::Context)>,
}

// SAFETY: the scaler is owned and used by the decode thread only.
unsafe impl Send for FrameConverter {}

impl FrameConverter {
    fn to_nv12(&mut self, source: &frame::Video) -> Option<frame::Video> {
        let key = (source.format(), source.width(), source.height());
        if self.scaler.as_ref().map(|(cached, _)| *cached) != Some(key) {
            let (format, width, height) = key;
            match scaling::Context::get(
                format,
                width,
                height,
                Pixel::NV12,
                width,
                height,
                scaling::Flags::BILINEAR,
            ) {
                Ok(context) => {
                    tracing::debug!(?format, width, height, "NV12 converter configured");
                    self.scaler = Some((key, context));
                }
                Err(error) => {
                    tracing::warn!(%error, ?format, "cannot convert frames to NV12");
                    self.scaler = None;
                    return None;
                }
            }
        }

        let (_, scaler) = self.scaler.as_mut()?;
        let mut converted = frame::Video::empty();
        match scaler.run(source, &mut converted) {
            Ok(()) => {
                converted.set_pts(source.pts());
                Some(converted)
            }
            Err(error) => {
                tracing::debug!(%error, "NV12 conversion failed");
                None
            }
        }
    }
}

/// Per-open state owned by the decode thread.
struct Session {
    backend: Box<dyn MediaBackend>,
    info: StreamInfo,
    phase: DecodePhase,
    audio: Option<AudioPath>,
    clock: ClockState,
    transfer: HardwareTransfer,
    tone_mapper: HdrToneMapper,
    tone_mapping: bool,
    converter: FrameConverter,
    packets_sent: bool,
    drain_sent: bool,
    send_failures: FailureRun,
    decode_failures: FailureRun,
    /// Set by stop and end of stream: the next play starts from the beginning.
    needs_restart: bool,
    last_master: Option<f64>,
    warned_untonemapped: bool,
    /// Hand hardware surfaces to the renderer instead of copying them out.
    zero_copy: bool,
}

impl Session {
    fn new(backend: Box<dyn MediaBackend>, config: &PlayerConfig, display_size: Option<(u32, u32)>) -> Self {
        let info = backend.info().clone();
        let mut tone_mapper = HdrToneMapper::new(&config.hdr);
        tone_mapper.set_display_size(display_size);
        Self {
            backend,
            info,
            phase: DecodePhase::Idle,
            audio: None,
            clock: ClockState::new(),
            transfer: HardwareTransfer::new(),
            tone_mapper,
            tone_mapping: tone_mapping_available(),
            converter: FrameConverter::default(),
            packets_sent: false,
            drain_sent: false,
            send_failures: FailureRun::new(TRANSIENT_FAILURE_LOG_LIMIT),
            decode_failures: FailureRun::new(TRANSIENT_FAILURE_LOG_LIMIT),
            needs_restart: false,
            last_master: None,
            warned_untonemapped: false,
            zero_copy: config.zero_copy,
        }
    }

    fn open_audio(&mut self, host: &dyn AudioHost, config: &PlayerConfig, control: &Arc<AudioControl>) {
        let Some(input) = self.backend.audio_input() else {
            return;
        };
        let opened = negotiate_output_format(input, host)
            .ok_or_else(|| "no usable output format".to_string())
            .and_then(|format| {
                control.clear_failed();
                let sink = host
                    .open(format, config.audio.buffer_duration(), Arc::clone(control))
                    .map_err(|e| e.to_string())?;
                self.backend
                    .set_audio_output(Some(format))
                    .map_err(|e| e.to_string())?;
                Ok((format, sink))
            });

        match opened {
            Ok((format, sink)) => {
                tracing::info!(?input, output = ?format, "audio output negotiated");
                self.audio = Some(AudioPath {
                    sink,
                    writer: RemainderWriter::new(),
                });
            }
            Err(reason) => {
                tracing::warn!(%reason, ?input, "audio output unavailable, playing without audio");
                if let Err(error) = self.backend.set_audio_output(None) {
                    tracing::debug!(%error, "failed to disable audio decoding");
                }
            }
        }
    }

    fn suspend_audio(&mut self) {
        if let Some(audio) = self.audio.as_mut() {
            audio.sink.suspend();
        }
    }

    fn resume_audio(&mut self) {
        if let Some(audio) = self.audio.as_mut() {
            audio.sink.resume();
        }
    }

    fn clear_audio(&mut self) {
        if let Some(audio) = self.audio.as_mut() {
            audio.sink.clear();
            audio.writer.clear();
        }
    }

    /// Seeks the container and restarts every per-stream gate.
    fn seek_to(&mut self, target_ms: i64, env: &Env<'_>) {
        let target_secs = millis_to_secs(target_ms);
        if let Err(error) = self.backend.seek(target_secs) {
            tracing::warn!(%error, target_ms, "seek failed");
            env.shared.seek.cancel();
            return;
        }

        self.clear_audio();
        self.tone_mapper.reset();
        env.shared.slot.clear();
        self.clock.reset();
        self.clock.start_epoch(env.time.now());
        self.phase = DecodePhase::Decoding;
        self.packets_sent = false;
        self.drain_sent = false;
        self.needs_restart = false;
        self.last_master = None;

        env.shared.seek.begin(self.audio.is_some());
        env.shared.state.set_position_ms(target_ms);
        tracing::debug!(target_ms, has_audio = self.audio.is_some(), "seek started");
    }

    /// Disables audio for the rest of the session once the device failed.
    fn check_audio_device(&mut self, env: &Env<'_>) {
        if !self.audio.as_ref().is_some_and(|audio| !audio.sink.is_active()) {
            return;
        }
        tracing::warn!("audio device failed, continuing on the wall clock");
        env.shared
            .state
            .notify_error("Audio output failed; continuing without audio");
        self.audio = None;
        if let Err(error) = self.backend.set_audio_output(None) {
            tracing::debug!(%error, "failed to disable audio decoding");
        }
        env.shared.seek.release_audio();
        self.clock.clear_audio_base();
        if let Some(position) = self.last_master {
            self.clock.anchor_video(position, env.time.now());
        }
    }

    fn decode_once(&mut self, env: &Env<'_>) -> StepOutcome {
        if self.phase == DecodePhase::Stopped {
            return StepOutcome::Idle;
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.writer.flush(audio.sink.as_mut());
        }

        match self.backend.receive_video_frame() {
            VideoReceive::Frame(decoded) => {
                self.decode_failures.record_success();
                self.handle_video_frame(decoded, env)
            }
            VideoReceive::NeedInput if self.drain_sent => self.finish(env),
            VideoReceive::NeedInput => self.read_packet(env),
            VideoReceive::Exhausted => self.finish(env),
            VideoReceive::Failed(error) => {
                report_failure(&mut self.decode_failures, &error, "video decode failed");
                self.read_packet(env)
            }
        }
    }

    fn read_packet(&mut self, env: &Env<'_>) -> StepOutcome {
        match self.backend.read_packet() {
            PacketRead::VideoSent => {
                self.packets_sent = true;
                self.send_failures.record_success();
            }
            PacketRead::VideoRejected(error) => {
                report_failure(&mut self.send_failures, &error, "video packet rejected");
            }
            PacketRead::Audio(chunks) => {
                for chunk in chunks {
                    self.handle_audio(chunk, env);
                }
            }
            PacketRead::Skipped => {}
            PacketRead::EndOfFile => return self.end_of_file(env),
            PacketRead::Failed(error) => {
                tracing::warn!(%error, "demuxer read failed, treating as end of file");
                return self.end_of_file(env);
            }
        }
        StepOutcome::Working
    }

    /// Sends the drain packet once, and only if the decoder ever got input.
    fn end_of_file(&mut self, env: &Env<'_>) -> StepOutcome {
        if !self.packets_sent || self.drain_sent {
            return self.finish(env);
        }
        self.drain_sent = true;
        self.phase = DecodePhase::Draining;
        match self.backend.send_video_eof() {
            Ok(()) => {
                tracing::debug!("end of file, draining video decoder");
                StepOutcome::Working
            }
            Err(error) => {
                tracing::debug!(%error, "drain packet rejected");
                self.finish(env)
            }
        }
    }

    fn finish(&mut self, env: &Env<'_>) -> StepOutcome {
        if self.phase == DecodePhase::Stopped {
            return StepOutcome::Idle;
        }
        self.phase = DecodePhase::Stopped;
        self.needs_restart = true;
        self.suspend_audio();

        let state = &env.shared.state;
        if self.info.duration_ms > 0 {
            state.set_position_ms(self.info.duration_ms);
        }
        state.set_state(PlaybackState::Stopped);
        state.notify_end_of_stream();

        let stats = env.shared.stats.snapshot();
        tracing::info!(
            presented = stats.presented,
            dropped = stats.dropped(),
            late = stats.late,
            slot_busy = stats.slot_busy,
            "end of stream"
        );
        StepOutcome::EndOfStream
    }

    fn handle_audio(&mut self, chunk: AudioChunk, env: &Env<'_>) {
        let Some(audio) = self.audio.as_mut() else {
            return;
        };
        match env.shared.seek.admit_audio(chunk.pts_secs) {
            Admission::Discard => return,
            Admission::Settled => {
                if let Some(pts) = chunk.pts_secs {
                    self.clock.set_audio_base(pts, audio.sink.processed_usecs());
                    tracing::debug!(pts, "audio clock based after seek");
                }
            }
            Admission::Pass => {
                if let (None, Some(pts)) = (self.clock.audio_base(), chunk.pts_secs) {
                    self.clock.set_audio_base(pts, audio.sink.processed_usecs());
                }
            }
        }
        audio
            .writer
            .write(audio.sink.as_mut(), &chunk.samples, env.time);
        env.shared
            .stats
            .set_audio_samples_dropped(audio.writer.dropped_samples());
    }

    fn drop_frame(env: &Env<'_>, reason: DropReason, pts: Option<f64>) -> StepOutcome {
        let count = env.shared.stats.record_drop(reason);
        if should_log_occurrence(count, DROP_LOG_BURST, DROP_LOG_PERIOD) {
            tracing::debug!(?reason, ?pts, count, "video frame dropped");
        }
        StepOutcome::Working
    }

    fn handle_video_frame(&mut self, decoded: frame::Video, env: &Env<'_>) -> StepOutcome {
        let shared = env.shared;
        let generation = shared.seek.generation();
        let pts = ticks_to_secs(decoded.pts().or(decoded.timestamp()), self.info.video_time_base);

        if !is_frame_valid(&decoded) {
            return Self::drop_frame(env, DropReason::Invalid, pts);
        }

        let now = env.time.now();
        match shared.seek.admit_video(pts) {
            Admission::Discard => return Self::drop_frame(env, DropReason::Seek, pts),
            Admission::Settled => {
                if let Some(pts) = pts {
                    self.clock.anchor_video(pts, now);
                }
            }
            Admission::Pass => {}
        }
        if shared.seek.is_holding_video() {
            return Self::drop_frame(env, DropReason::Seek, pts);
        }

        if let Some(pts) = pts {
            if !self.clock.is_video_anchored() {
                self.clock.anchor_video(pts, now);
            }
            let sink = self.audio.as_ref().map(|audio| audio.sink.as_ref());
            if let Some(master) = self.clock.master_clock(sink, now) {
                let decision = decide(
                    pts - master,
                    self.clock.in_grace(now, env.thresholds),
                    self.clock.rebase_available(),
                    self.info.frame_duration_secs,
                    env.thresholds,
                );
                match decision {
                    SyncDecision::Drop => return Self::drop_frame(env, DropReason::Late, Some(pts)),
                    SyncDecision::Present { sleep, rebase } => {
                        if rebase {
                            tracing::debug!(pts, master, "frame behind, re-anchoring clock");
                            self.clock.rebase(pts, now);
                        }
                        self.last_master = Some(master);
                        let upper = if self.info.duration_ms > 0 {
                            self.info.duration_ms
                        } else {
                            i64::MAX
                        };
                        shared
                            .state
                            .set_position_ms(secs_to_millis(master).clamp(0, upper));
                        if let Some(sleep) = sleep {
                            env.time.sleep(sleep);
                        }
                    }
                }
            }
        }

        if shared.slot.is_occupied() {
            return Self::drop_frame(env, DropReason::SlotBusy, pts);
        }

        let decoded = if self.zero_copy && is_hardware_format(decoded.format()) {
            match Self::hand_over_surface(decoded, generation, pts, env) {
                Ok(outcome) => return outcome,
                Err(decoded) => decoded,
            }
        } else {
            decoded
        };

        let system = if is_hardware_format(decoded.format()) {
            match self.transfer.transfer(&decoded) {
                Some(system) => system,
                None => return Self::drop_frame(env, DropReason::Invalid, pts),
            }
        } else {
            decoded
        };
        if !is_frame_valid(&system) {
            return Self::drop_frame(env, DropReason::Invalid, pts);
        }

        let output = match self.prepare(system, &shared.stats) {
            Ok(output) => output,
            Err(reason) => return Self::drop_frame(env, reason, pts),
        };

        // The tone mapper may hand back an earlier frame than the one just fed.
        let decoded_pts = pts;
        let pts = presented_pts(&output, self.info.video_time_base, decoded_pts);
        if let (Some(shown), Some(decoded), Some(master)) = (pts, decoded_pts, self.last_master) {
            if shown < decoded && master - shown > env.thresholds.late_drop {
                return Self::drop_frame(env, DropReason::Late, pts);
            }
        }

        if shared.seek.generation() != generation {
            return Self::drop_frame(env, DropReason::Seek, pts);
        }
        let Some(presented) = PresentedFrame::copy_from(&output, pts.unwrap_or_default()) else {
            return Self::drop_frame(env, DropReason::Invalid, pts);
        };
        Self::offer(presented, env, pts)
    }

    /// Presents a hardware frame without leaving the GPU. Hands the frame back
    /// when its surface layout needs tone mapping or cannot be described, so
    /// the caller can take the transfer path instead.
    fn hand_over_surface(
        decoded: frame::Video,
        generation: u64,
        pts: Option<f64>,
        env: &Env<'_>,
    ) -> Result<StepOutcome, frame::Video> {
        let hdr = surface_sw_format(&decoded)
            .is_some_and(|sw| needs_tone_mapping(sw, decoded.color_transfer_characteristic()));
        if hdr {
            return Err(decoded);
        }
        let surface = SurfaceFrame::adopt(decoded)?;
        if env.shared.seek.generation() != generation {
            return Ok(Self::drop_frame(env, DropReason::Seek, pts));
        }
        let presented = PresentedFrame::from_surface(surface, pts.unwrap_or_default());
        Ok(Self::offer(presented, env, pts))
    }

    fn offer(presented: PresentedFrame, env: &Env<'_>, pts: Option<f64>) -> StepOutcome {
        let (width, height) = (presented.width, presented.height);
        if !env.shared.slot.try_offer(presented) {
            return Self::drop_frame(env, DropReason::SlotBusy, pts);
        }
        env.shared.state.set_size(width, height);
        env.shared.stats.record_presented();
        StepOutcome::Presented
    }

    /// Brings a system-memory frame into a presentable format.
    fn prepare(
        &mut self,
        mut source: frame::Video,
        stats: &PlaybackStats,
    ) -> Result<frame::Video, DropReason> {
        if needs_tone_mapping(source.format(), source.color_transfer_characteristic()) {
            if self.tone_mapping {
                return match self.tone_mapper.process(&mut source, self.info.video_time_base) {
                    ToneMapOutcome::Output(output) => {
                        stats.record_tone_mapped();
                        Ok(output)
                    }
                    ToneMapOutcome::NeedMore
                    | ToneMapOutcome::Backpressure
                    | ToneMapOutcome::Refused
                    | ToneMapOutcome::Poisoned(_)
                    | ToneMapOutcome::SinkError(_) => Err(DropReason::Filter),
                };
            }
            if !self.warned_untonemapped {
                tracing::warn!("tone mapping filters unavailable, HDR frames are converted without it");
                self.warned_untonemapped = true;
            }
            return self.converter.to_nv12(&source).ok_or(DropReason::Invalid);
        }

        if FrameFormat::from_pixel(source.format()).is_some() {
            return Ok(source);
        }
        self.converter.to_nv12(&source).ok_or(DropReason::Invalid)
    }
}

/// Timestamp of the frame that is actually presented, falling back to the
/// decoded frame's when the prepared frame carries none.
fn presented_pts(output: &frame::Video, time_base: Rational, decoded: Option<f64>) -> Option<f64> {
    ticks_to_secs(output.pts(), time_base).or(decoded)
}

fn report_failure(run: &mut FailureRun, error: &ffmpeg_next::Error, what: &'static str) {
    match run.record_failure() {
        FailureReport::Transient => tracing::debug!(%error, attempt = run.count(), "{what}"),
        FailureReport::Persistent => {
            tracing::warn!(%error, failures = run.count(), "{what} repeatedly")
        }
        FailureReport::Suppressed => {}
    }
}

/// Decode loop state machine. Runs on its own thread via [`DecodeLoop::run`],
/// or is stepped manually in tests.
pub struct DecodeLoop {
    shared: Arc<Shared>,
    config: PlayerConfig,
    thresholds: SyncThresholds,
    factory: BackendFactory,
    host: Box<dyn AudioHost>,
    time: Arc<dyn TimeSource>,
    session: Option<Session>,
    display_size: Option<(u32, u32)>,
    /// Play was requested before a session was open.
    autoplay: bool,
    /// Settings file updated when volume or mute change.
    settings_path: Option<PathBuf>,
}

impl DecodeLoop {
    pub(crate) fn new(
        shared: Arc<Shared>,
        config: PlayerConfig,
        factory: BackendFactory,
        host: Box<dyn AudioHost>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        let thresholds = SyncThresholds::from(&config.sync);
        Self {
            shared,
            config,
            thresholds,
            factory,
            host,
            time,
            session: None,
            display_size: None,
            autoplay: false,
            settings_path: None,
        }
    }

    /// Saves volume and mute changes to `path`.
    pub fn persist_settings_to(&mut self, path: impl Into<PathBuf>) {
        self.settings_path = Some(path.into());
    }

    /// Current phase of the loop.
    pub fn phase(&self) -> DecodePhase {
        match &self.session {
            Some(session) if session.phase == DecodePhase::Stopped => DecodePhase::Stopped,
            Some(session) if self.shared.state.state().is_playing() => session.phase,
            _ => DecodePhase::Idle,
        }
    }

    /// Runs until the player shuts down.
    pub fn run(mut self) {
        tracing::debug!("decode thread started");
        loop {
            match self.step() {
                StepOutcome::Shutdown => break,
                StepOutcome::Idle | StepOutcome::EndOfStream => self.shared.wait_for_work(IDLE_WAIT),
                StepOutcome::Working | StepOutcome::Presented => {}
            }
        }
        tracing::debug!("decode thread stopped");
    }

    /// Applies pending commands and performs one unit of decode work.
    pub fn step(&mut self) -> StepOutcome {
        let (commands, shutdown) = self.shared.take_commands();
        if shutdown {
            self.close();
            return StepOutcome::Shutdown;
        }
        for command in commands {
            self.apply(command);
        }

        let seek_requested = self.shared.seek.take_request().is_some();
        let env = Env {
            shared: &self.shared,
            time: self.time.as_ref(),
            thresholds: &self.thresholds,
        };
        let Some(session) = self.session.as_mut() else {
            return StepOutcome::Idle;
        };
        if seek_requested {
            session.seek_to(env.shared.seek.target_ms(), &env);
        }
        if !env.shared.state.state().is_playing() {
            return StepOutcome::Idle;
        }
        session.check_audio_device(&env);
        session.decode_once(&env)
    }

    fn apply(&mut self, command: Command) {
        tracing::trace!(?command, "applying command");
        match command {
            Command::Open(path) => self.open(&path),
            Command::Play => self.play(),
            Command::Pause => self.pause(),
            Command::Stop => self.stop(),
            Command::DisplaySize(size) => {
                self.display_size = size;
                if let Some(session) = self.session.as_mut() {
                    session.tone_mapper.set_display_size(size);
                }
            }
            Command::PersistAudio { volume, muted } => self.persist_audio(volume, muted),
        }
    }

    fn persist_audio(&mut self, volume: f32, muted: bool) {
        self.config.volume = volume;
        self.config.muted = muted;
        let Some(path) = self.settings_path.as_deref() else {
            return;
        };

        // Only the audio preferences change; everything else stays as stored.
        let mut stored = config::load_from_path(path).unwrap_or_default();
        stored.volume = volume;
        stored.muted = muted;
        match config::save_to_path(&stored, path) {
            Ok(()) => tracing::debug!(volume, muted, path = %path.display(), "audio settings saved"),
            Err(error) => {
                tracing::warn!(%error, path = %path.display(), "failed to save audio settings")
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.suspend_audio();
            tracing::debug!(presented = self.shared.stats.snapshot().presented, "media session closed");
        }
        self.shared.slot.clear();
        self.shared.seek.cancel();
    }

    fn open(&mut self, path: &Path) {
        self.close();
        let state = &self.shared.state;
        state.set_source(Some(path.to_path_buf()));
        state.clear_size();
        state.set_state(PlaybackState::Stopped);
        state.set_position_ms(0);
        state.set_duration_ms(0);
        state.set_seekable(false);

        let backend = match (self.factory)(path, &self.config) {
            Ok(backend) => backend,
            Err(error) => {
                tracing::error!(path = %path.display(), %error, "failed to open media");
                state.notify_error(error.to_string());
                self.autoplay = false;
                return;
            }
        };

        let mut session = Session::new(backend, &self.config, self.display_size);
        tracing::debug!(
            decoder = session.backend.hardware_device().unwrap_or("software"),
            tone_mapping = session.tone_mapping,
            "decode session ready"
        );
        state.set_duration_ms(session.info.duration_ms);
        state.set_seekable(session.info.seekable);
        session.open_audio(self.host.as_ref(), &self.config, &self.shared.audio);

        // A fresh start goes through the same gates as a seek to zero.
        let seek = &self.shared.seek;
        seek.request(0);
        seek.take_request();
        seek.begin(session.audio.is_some());
        session.phase = DecodePhase::Decoding;
        self.session = Some(session);

        if std::mem::take(&mut self.autoplay) {
            self.play();
        }
    }

    fn play(&mut self) {
        let Some(session) = self.session.as_mut() else {
            self.autoplay = true;
            return;
        };
        let now = self.time.now();
        match self.shared.state.state() {
            PlaybackState::Playing => return,
            PlaybackState::Paused => session.clock.resume(now),
            PlaybackState::Stopped => {
                if session.needs_restart {
                    session.needs_restart = false;
                    if !self.shared.seek.has_pending_request() {
                        self.shared.seek.request(0);
                    }
                }
                session.clock.start_epoch(now);
            }
        }
        session.resume_audio();
        self.shared.state.set_state(PlaybackState::Playing);
    }

    fn pause(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !self.shared.state.state().is_playing() {
            return;
        }
        session.clock.pause(self.time.now());
        session.suspend_audio();
        self.shared.state.set_state(PlaybackState::Paused);
    }

    fn stop(&mut self) {
        self.autoplay = false;
        if self.shared.state.state().is_stopped() {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.suspend_audio();
            session.clear_audio();
            session.needs_restart = true;
        }
        self.shared.slot.clear();
        self.shared.state.set_state(PlaybackState::Stopped);
        self.shared.state.set_position_ms(0);
    }
}
