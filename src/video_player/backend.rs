// SPDX-License-Identifier: MPL-2.0
//! Demuxer/decoder abstraction driven by the decode loop.
//!
//! [`super::session::MediaSession`] implements it on top of FFmpeg;
//! [`super::simulated::SimulatedBackend`] produces synthetic streams for
//! deterministic tests.

use super::audio::AudioFormat;
use crate::config::PlayerConfig;
use crate::error::Result;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{frame, Rational};
use std::path::Path;

/// Static properties of an opened media session.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub duration_ms: i64,
    pub seekable: bool,
    pub has_audio: bool,
    /// Duration of one video frame from the average frame rate.
    pub frame_duration_secs: f64,
    pub video_time_base: Rational,
    pub width: u32,
    pub height: u32,
}

/// Result of asking the video decoder for a frame.
pub enum VideoReceive {
    Frame(frame::Video),
    /// The decoder needs another packet.
    NeedInput,
    /// The decoder was drained and has nothing left.
    Exhausted,
    Failed(ffmpeg::Error),
}

impl std::fmt::Debug for VideoReceive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Frame(frame) => f
                .debug_struct("Frame")
                .field("format", &frame.format())
                .field("pts", &frame.pts())
                .finish(),
            Self::NeedInput => f.write_str("NeedInput"),
            Self::Exhausted => f.write_str("Exhausted"),
            Self::Failed(error) => f.debug_tuple("Failed").field(error).finish(),
        }
    }
}

/// Decoded and resampled audio ready for the device.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub pts_secs: Option<f64>,
    /// Interleaved f32 samples at the negotiated output format.
    pub samples: Vec<f32>,
}

/// Result of reading one packet from the container.
#[derive(Debug)]
pub enum PacketRead {
    /// A video packet was accepted by the decoder.
    VideoSent,
    /// The decoder rejected a video packet.
    VideoRejected(ffmpeg::Error),
    /// An audio packet was decoded into zero or more chunks.
    Audio(Vec<AudioChunk>),
    /// A packet of an unused stream, or audio with no output configured.
    Skipped,
    EndOfFile,
    Failed(ffmpeg::Error),
}

/// One open media container with its video and optional audio decoder.
pub trait MediaBackend: Send {
    fn info(&self) -> &StreamInfo;

    /// Receives the next decoded video frame, if one is ready.
    fn receive_video_frame(&mut self) -> VideoReceive;

    /// Reads one packet and routes it to its decoder.
    fn read_packet(&mut self) -> PacketRead;

    /// Sends the drain packet to the video decoder.
    fn send_video_eof(&mut self) -> Result<()>;

    /// Seeks the container to the keyframe at or before `target_secs` and
    /// flushes every decoder.
    fn seek(&mut self, target_secs: f64) -> Result<()>;

    /// Input format of the audio stream, if there is one.
    fn audio_input(&self) -> Option<AudioFormat>;

    /// Configures resampling to `format`; `None` stops audio decoding.
    fn set_audio_output(&mut self, format: Option<AudioFormat>) -> Result<()>;

    /// Name of the hardware device decoding video, if any.
    fn hardware_device(&self) -> Option<&str> {
        None
    }
}

/// Opens a backend for a path.
pub type BackendFactory =
    Box<dyn Fn(&Path, &PlayerConfig) -> Result<Box<dyn MediaBackend>> + Send>;
