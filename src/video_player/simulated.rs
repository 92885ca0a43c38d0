// SPDX-License-Identifier: MPL-2.0
//! Synthetic media and audio devices for deterministic playback tests.
//!
//! [`SimulatedBackend`] emits real FFmpeg frames with a regular cadence and
//! interleaved audio. [`SimulatedAudioHost`] opens sinks that consume queued
//! samples in real time as measured by a [`TimeSource`], usually a
//! [`ManualTimeSource`] that only moves when the decode loop sleeps or the
//! test advances it.

use super::audio::AudioFormat;
use super::audio_output::{samples_to_usecs, AudioControl, AudioHost, AudioSink};
use super::backend::{
    AudioChunk, BackendFactory, MediaBackend, PacketRead, StreamInfo, VideoReceive,
};
use super::session::init_ffmpeg;
use super::sync::TimeSource;
use crate::error::{Error, Result, VideoError};
use ffmpeg_next::color::{Primaries, Range, Space, TransferCharacteristic};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::{frame, Rational};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub use super::sync::ManualTimeSource;

/// Ticks per second of the simulated video time base.
const VIDEO_CLOCK_RATE: i32 = 90_000;

/// Color tagging of simulated frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorTagging {
    /// BT.709 SDR.
    Sdr,
    /// BT.2020 primaries with the PQ transfer function.
    Pq,
    /// BT.2020 primaries with the HLG transfer function.
    Hlg,
    /// No color information at all.
    Missing,
    /// PQ transfer with BT.709 primaries and matrix.
    Contradictory,
}

/// Description of a synthetic stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedStream {
    pub duration: Duration,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_format: Pixel,
    pub tagging: ColorTagging,
    /// Source audio format, or `None` for a silent file.
    pub audio: Option<AudioFormat>,
    /// Duration of one audio packet.
    pub audio_packet: Duration,
    /// Distance between keyframes, in frames.
    pub keyframe_interval: u32,
    pub seekable: bool,
}

impl Default for SimulatedStream {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(10),
            fps: 30,
            width: 320,
            height: 240,
            pixel_format: Pixel::NV12,
            tagging: ColorTagging::Sdr,
            audio: Some(AudioFormat::stereo(48_000)),
            audio_packet: Duration::from_millis(20),
            keyframe_interval: 30,
            seekable: true,
        }
    }
}

impl SimulatedStream {
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn without_audio(mut self) -> Self {
        self.audio = None;
        self
    }

    /// 10-bit frames tagged as `tagging`.
    pub fn hdr(mut self, tagging: ColorTagging) -> Self {
        self.pixel_format = Pixel::YUV420P10LE;
        self.tagging = tagging;
        self
    }

    pub fn with_pixel_format(mut self, format: Pixel) -> Self {
        self.pixel_format = format;
        self
    }

    pub fn frame_count(&self) -> u64 {
        (self.duration.as_secs_f64() * f64::from(self.fps)).round() as u64
    }

    fn ticks_per_frame(&self) -> i64 {
        i64::from(VIDEO_CLOCK_RATE) / i64::from(self.fps.max(1))
    }

    /// Returns a factory that opens this stream for any path.
    pub fn factory(self) -> BackendFactory {
        Box::new(move |_path, _config| {
            Ok(Box::new(SimulatedBackend::new(self.clone())?) as Box<dyn MediaBackend>)
        })
    }
}

/// Factory whose every open fails like a file without video.
pub fn failing_factory() -> BackendFactory {
    Box::new(|_path, _config| Err(Error::Video(VideoError::NoVideoStream)))
}

/// Synthetic demuxer and decoders.
pub struct SimulatedBackend {
    stream: SimulatedStream,
    info: StreamInfo,
    next_video: u64,
    next_audio: Duration,
    decoded: VecDeque<u64>,
    eof_sent: bool,
    audio_output: Option<AudioFormat>,
    seeks: Vec<f64>,
}

impl SimulatedBackend {
    pub fn new(stream: SimulatedStream) -> Result<Self> {
        init_ffmpeg()?;
        if stream.fps == 0 || stream.width == 0 || stream.height == 0 {
            return Err(Error::Video(VideoError::CorruptedFile));
        }
        let info = StreamInfo {
            duration_ms: stream.duration.as_millis() as i64,
            seekable: stream.seekable,
            has_audio: stream.audio.is_some(),
            frame_duration_secs: 1.0 / f64::from(stream.fps),
            video_time_base: Rational::new(1, VIDEO_CLOCK_RATE),
            width: stream.width,
            height: stream.height,
        };
        Ok(Self {
            stream,
            info,
            next_video: 0,
            next_audio: Duration::ZERO,
            decoded: VecDeque::new(),
            eof_sent: false,
            audio_output: None,
            seeks: Vec::new(),
        })
    }

    /// Targets of every seek performed so far, in seconds.
    pub fn seeks(&self) -> &[f64] {
        &self.seeks
    }

    fn video_time(&self, index: u64) -> f64 {
        index as f64 / f64::from(self.stream.fps)
    }

    fn make_frame(&self, index: u64) -> frame::Video {
        let mut frame = frame::Video::new(self.stream.pixel_format, self.stream.width, self.stream.height);
        for plane in 0..frame.planes() {
            frame.data_mut(plane).fill(0);
        }
        frame.set_pts(Some(index as i64 * self.stream.ticks_per_frame()));
        match self.stream.tagging {
            ColorTagging::Sdr => {
                frame.set_color_range(Range::MPEG);
                frame.set_color_primaries(Primaries::BT709);
                frame.set_color_transfer_characteristic(TransferCharacteristic::BT709);
                frame.set_color_space(Space::BT709);
            }
            ColorTagging::Pq => {
                frame.set_color_range(Range::MPEG);
                frame.set_color_primaries(Primaries::BT2020);
                frame.set_color_transfer_characteristic(TransferCharacteristic::SMPTE2084);
                frame.set_color_space(Space::BT2020NCL);
            }
            ColorTagging::Hlg => {
                frame.set_color_range(Range::MPEG);
                frame.set_color_primaries(Primaries::BT2020);
                frame.set_color_transfer_characteristic(TransferCharacteristic::ARIB_STD_B67);
                frame.set_color_space(Space::BT2020NCL);
            }
            ColorTagging::Missing => {
                frame.set_color_range(Range::Unspecified);
                frame.set_color_primaries(Primaries::Unspecified);
                frame.set_color_transfer_characteristic(TransferCharacteristic::Unspecified);
                frame.set_color_space(Space::Unspecified);
            }
            ColorTagging::Contradictory => {
                frame.set_color_range(Range::JPEG);
                frame.set_color_primaries(Primaries::BT709);
                frame.set_color_transfer_characteristic(TransferCharacteristic::SMPTE2084);
                frame.set_color_space(Space::BT709);
            }
        }
        frame
    }

    fn audio_chunk(&self, start: Duration, format: AudioFormat) -> AudioChunk {
        let frames = (self.stream.audio_packet.as_secs_f64() * f64::from(format.sample_rate)).round() as usize;
        AudioChunk {
            pts_secs: Some(start.as_secs_f64()),
            samples: vec![0.0; frames * usize::from(format.channels)],
        }
    }
}

impl MediaBackend for SimulatedBackend {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn receive_video_frame(&mut self) -> VideoReceive {
        match self.decoded.pop_front() {
            Some(index) => VideoReceive::Frame(self.make_frame(index)),
            None if self.eof_sent => VideoReceive::Exhausted,
            None => VideoReceive::NeedInput,
        }
    }

    fn read_packet(&mut self) -> PacketRead {
        let video_left = self.next_video < self.stream.frame_count();
        let audio_left = self.stream.audio.is_some() && self.next_audio < self.stream.duration;

        let video_first = match (video_left, audio_left) {
            (false, false) => return PacketRead::EndOfFile,
            (true, false) => true,
            (false, true) => false,
            (true, true) => self.video_time(self.next_video) <= self.next_audio.as_secs_f64(),
        };

        if video_first {
            self.decoded.push_back(self.next_video);
            self.next_video += 1;
            return PacketRead::VideoSent;
        }

        let start = self.next_audio;
        self.next_audio += self.stream.audio_packet;
        match self.audio_output {
            Some(format) => PacketRead::Audio(vec![self.audio_chunk(start, format)]),
            None => PacketRead::Skipped,
        }
    }

    fn send_video_eof(&mut self) -> Result<()> {
        self.eof_sent = true;
        Ok(())
    }

    fn seek(&mut self, target_secs: f64) -> Result<()> {
        if !self.stream.seekable {
            return Err(Error::Video(VideoError::DecodingFailed(
                "Seek failed: stream is not seekable".to_string(),
            )));
        }
        let target_frame = (target_secs.max(0.0) * f64::from(self.stream.fps)).floor() as u64;
        let interval = u64::from(self.stream.keyframe_interval.max(1));
        let keyframe = (target_frame / interval) * interval;
        let keyframe = keyframe.min(self.stream.frame_count().saturating_sub(1));

        self.next_video = keyframe;
        self.next_audio = Duration::from_secs_f64(self.video_time(keyframe));
        self.decoded.clear();
        self.eof_sent = false;
        self.seeks.push(target_secs);
        Ok(())
    }

    fn audio_input(&self) -> Option<AudioFormat> {
        self.stream.audio
    }

    fn set_audio_output(&mut self, format: Option<AudioFormat>) -> Result<()> {
        self.audio_output = format;
        Ok(())
    }
}

#[derive(Debug)]
struct DeviceState {
    format: AudioFormat,
    capacity: usize,
    queued: usize,
    accepted: u64,
    running: bool,
    failed: bool,
    last_tick: Duration,
}

/// Test handle onto an opened simulated device.
#[derive(Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<DeviceState>>,
    time: Arc<dyn TimeSource>,
}

impl std::fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDevice")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl SimulatedDevice {
    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Self::consume(&mut state, self.time.now());
        state
    }

    /// Plays queued samples for the time elapsed since the last look.
    fn consume(state: &mut DeviceState, now: Duration) {
        let elapsed = now.saturating_sub(state.last_tick);
        state.last_tick = now;
        if !state.running || state.failed {
            return;
        }
        let rate = f64::from(state.format.sample_rate) * f64::from(state.format.channels);
        let played = (elapsed.as_secs_f64() * rate).round() as usize;
        state.queued = state.queued.saturating_sub(played);
    }

    /// Simulates a device error reported by the audio backend.
    pub fn fail(&self) {
        self.lock().failed = true;
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn accepted_samples(&self) -> u64 {
        self.lock().accepted
    }

    pub fn format(&self) -> AudioFormat {
        self.lock().format
    }
}

struct SimulatedAudioSink {
    device: SimulatedDevice,
    control: Arc<AudioControl>,
}

impl AudioSink for SimulatedAudioSink {
    fn format(&self) -> AudioFormat {
        self.device.format()
    }

    fn capacity_samples(&self) -> usize {
        self.device.lock().capacity
    }

    fn free_samples(&self) -> usize {
        let state = self.device.lock();
        state.capacity - state.queued
    }

    fn write(&mut self, samples: &[f32]) -> usize {
        let mut state = self.device.lock();
        let count = samples.len().min(state.capacity - state.queued);
        state.queued += count;
        state.accepted += count as u64;
        count
    }

    fn processed_usecs(&self) -> i64 {
        let state = self.device.lock();
        samples_to_usecs(state.format, state.accepted)
    }

    fn is_active(&self) -> bool {
        !self.device.lock().failed && !self.control.has_failed()
    }

    fn clear(&mut self) {
        self.device.lock().queued = 0;
    }

    fn suspend(&mut self) {
        self.control.set_paused(true);
        self.device.lock().running = false;
    }

    fn resume(&mut self) {
        self.device.lock().running = true;
        self.control.set_paused(false);
    }
}

/// Audio host backed by simulated devices.
pub struct SimulatedAudioHost {
    time: Arc<dyn TimeSource>,
    supported: Option<Vec<AudioFormat>>,
    preferred: Option<AudioFormat>,
    fail_open: bool,
    opened: Arc<Mutex<Vec<SimulatedDevice>>>,
}

impl SimulatedAudioHost {
    /// A host accepting every format.
    pub fn new(time: Arc<dyn TimeSource>) -> Self {
        Self {
            time,
            supported: None,
            preferred: Some(AudioFormat::stereo(48_000)),
            fail_open: false,
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_supported(mut self, formats: Vec<AudioFormat>) -> Self {
        self.supported = Some(formats);
        self
    }

    pub fn with_preferred(mut self, format: Option<AudioFormat>) -> Self {
        self.preferred = format;
        self
    }

    /// Every open fails, as with a missing device.
    pub fn failing(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Handle onto the devices opened so far; stays valid after the host is moved.
    pub fn devices(&self) -> DeviceList {
        DeviceList(Arc::clone(&self.opened))
    }
}

/// Devices opened by a [`SimulatedAudioHost`], oldest first.
#[derive(Debug, Clone)]
pub struct DeviceList(Arc<Mutex<Vec<SimulatedDevice>>>);

impl DeviceList {
    pub fn last(&self) -> Option<SimulatedDevice> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AudioHost for SimulatedAudioHost {
    fn supports(&self, format: AudioFormat) -> bool {
        if self.fail_open || !format.is_valid() {
            return false;
        }
        self.supported
            .as_ref()
            .is_none_or(|formats| formats.contains(&format))
    }

    fn preferred_format(&self) -> Option<AudioFormat> {
        self.preferred
    }

    fn open(
        &self,
        format: AudioFormat,
        buffer: Duration,
        control: Arc<AudioControl>,
    ) -> Result<Box<dyn AudioSink>> {
        if self.fail_open {
            return Err(Error::Audio("No audio output device found".to_string()));
        }
        let frames = (buffer.as_secs_f64() * f64::from(format.sample_rate)).round() as usize;
        let capacity = (frames * usize::from(format.channels)).max(usize::from(format.channels));
        let device = SimulatedDevice {
            state: Arc::new(Mutex::new(DeviceState {
                format,
                capacity,
                queued: 0,
                accepted: 0,
                running: false,
                failed: false,
                last_tick: self.time.now(),
            })),
            time: Arc::clone(&self.time),
        };
        control.set_paused(true);
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(device.clone());
        Ok(Box::new(SimulatedAudioSink { device, control }))
    }
}
