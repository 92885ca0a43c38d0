// SPDX-License-Identifier: MPL-2.0
//! FFmpeg media session: demuxer, video decoder with optional hardware
//! surfaces, and audio decoder with resampling.

use super::audio::{AudioFormat, Resampler};
use super::backend::{AudioChunk, MediaBackend, PacketRead, StreamInfo, VideoReceive};
use super::hw_surface::{HwDeviceContext, SurfacePolicy};
use super::time_units::{frame_duration_secs, secs_to_micros, ticks_to_secs};
use crate::config::{PlayerConfig, FALLBACK_FRAME_DURATION_SECS};
use crate::error::{Error, Result, VideoError};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, decoder, format, frame, media, Rational};
use std::path::Path;
use std::sync::OnceLock;

static FFMPEG_INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Initializes FFmpeg once per process and limits its own logging to errors.
pub fn init_ffmpeg() -> Result<()> {
    FFMPEG_INIT
        .get_or_init(|| {
            ffmpeg::init().map_err(|e| format!("FFmpeg initialization failed: {e}"))?;
            // SAFETY: av_log_set_level is thread-safe and only affects logging.
            unsafe {
                ffmpeg::ffi::av_log_set_level(ffmpeg::ffi::AV_LOG_ERROR);
            }
            Ok(())
        })
        .clone()
        .map_err(Error::Io)
}

fn is_again(error: &ffmpeg::Error) -> bool {
    matches!(error, ffmpeg::Error::Other { errno } if *errno == ffmpeg::error::EAGAIN)
}

fn open_error(error: ffmpeg::Error) -> Error {
    let kind = match error {
        ffmpeg::Error::DecoderNotFound => VideoError::UnsupportedCodec(error.to_string()),
        ffmpeg::Error::InvalidData => VideoError::CorruptedFile,
        ffmpeg::Error::DemuxerNotFound => VideoError::UnsupportedFormat,
        ffmpeg::Error::StreamNotFound => VideoError::NoVideoStream,
        _ => VideoError::from_message(&error.to_string()),
    };
    Error::Video(kind)
}

struct AudioStream {
    index: usize,
    decoder: decoder::Audio,
    time_base: Rational,
    resampler: Option<Resampler>,
}

impl AudioStream {
    fn decode(&mut self, packet: &ffmpeg::Packet) -> Vec<AudioChunk> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Vec::new();
        };
        if let Err(error) = self.decoder.send_packet(packet) {
            tracing::debug!(%error, "audio packet rejected");
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut decoded = frame::Audio::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let pts_secs = ticks_to_secs(decoded.pts().or(decoded.timestamp()), self.time_base);
            match resampler.convert(&decoded) {
                Ok(samples) if !samples.is_empty() => chunks.push(AudioChunk { pts_secs, samples }),
                Ok(_) => {}
                Err(error) => tracing::debug!(%error, "audio frame dropped"),
            }
        }
        chunks
    }
}

/// One open container. Fields drop in declaration order: decoders before the
/// surface policy they point to, and before the hardware device.
pub struct MediaSession {
    video: decoder::Video,
    audio: Option<AudioStream>,
    input: format::context::Input,
    video_index: usize,
    info: StreamInfo,
    _policy: Box<SurfacePolicy>,
    device: Option<HwDeviceContext>,
}

// SAFETY: the session is created and used by the decode thread only; the
// FFmpeg contexts it owns are never shared.
unsafe impl Send for MediaSession {}

impl MediaSession {
    pub fn open(path: &Path, config: &PlayerConfig) -> Result<Self> {
        init_ffmpeg()?;

        let input = format::input(&path).map_err(open_error)?;

        let (video_index, video_time_base, frame_rate, video_params) = {
            let stream = input
                .streams()
                .best(media::Type::Video)
                .ok_or(Error::Video(VideoError::NoVideoStream))?;
            (
                stream.index(),
                stream.time_base(),
                stream.avg_frame_rate(),
                stream.parameters(),
            )
        };
        let audio_stream = input
            .streams()
            .best(media::Type::Audio)
            .map(|stream| (stream.index(), stream.time_base(), stream.parameters()));

        let policy = Box::new(SurfacePolicy {
            force_software_hdr: config.force_software_hdr,
            zero_copy: config.zero_copy,
        });
        let (video, device) = Self::open_video(video_params, config, &policy)?;

        let audio = audio_stream.and_then(|(index, time_base, params)| {
            let opened = codec::context::Context::from_parameters(params)
                .and_then(|context| context.decoder().audio());
            match opened {
                Ok(decoder) => Some(AudioStream {
                    index,
                    decoder,
                    time_base,
                    resampler: None,
                }),
                Err(error) => {
                    tracing::warn!(%error, "audio stream cannot be decoded, playing without audio");
                    None
                }
            }
        });

        let duration_us = input.duration();
        let duration_ms = if duration_us > 0 { duration_us / 1000 } else { 0 };
        // SAFETY: the input context is valid; pb may be null for custom I/O.
        let io_seekable = unsafe {
            let pb = (*input.as_ptr()).pb;
            !pb.is_null() && (*pb).seekable != 0
        };

        let info = StreamInfo {
            duration_ms,
            seekable: io_seekable && duration_ms > 0,
            has_audio: audio.is_some(),
            frame_duration_secs: frame_duration_secs(frame_rate)
                .unwrap_or(FALLBACK_FRAME_DURATION_SECS),
            video_time_base,
            width: video.width(),
            height: video.height(),
        };

        tracing::info!(
            path = %path.display(),
            duration_ms,
            width = info.width,
            height = info.height,
            has_audio = info.has_audio,
            device = device.as_ref().map(HwDeviceContext::name),
            "media session opened"
        );

        Ok(Self {
            video,
            audio,
            input,
            video_index,
            info,
            _policy: policy,
            device,
        })
    }

    /// Opens the video decoder on a hardware device when one is available,
    /// falling back to software decoding.
    fn open_video(
        params: codec::Parameters,
        config: &PlayerConfig,
        policy: &SurfacePolicy,
    ) -> Result<(decoder::Video, Option<HwDeviceContext>)> {
        if let Some(device) = HwDeviceContext::create_preferred(config.hardware_device.as_deref()) {
            let mut context =
                codec::context::Context::from_parameters(params.clone()).map_err(open_error)?;
            device.attach(&mut context, policy);
            match context.decoder().video() {
                Ok(video) => return Ok((video, Some(device))),
                Err(error) => tracing::warn!(
                    %error,
                    device = device.name(),
                    "hardware decoder unavailable, using software decoding"
                ),
            }
        } else {
            tracing::debug!("no hardware device available, using software decoding");
        }

        let context = codec::context::Context::from_parameters(params).map_err(open_error)?;
        let video = context.decoder().video().map_err(open_error)?;
        Ok((video, None))
    }

    /// Whether a hardware device was attached to the video decoder.
    pub fn is_hardware_accelerated(&self) -> bool {
        self.device.is_some()
    }
}

impl MediaBackend for MediaSession {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn receive_video_frame(&mut self) -> VideoReceive {
        let mut decoded = frame::Video::empty();
        match self.video.receive_frame(&mut decoded) {
            Ok(()) => VideoReceive::Frame(decoded),
            Err(ffmpeg::Error::Eof) => VideoReceive::Exhausted,
            Err(error) if is_again(&error) => VideoReceive::NeedInput,
            Err(error) => VideoReceive::Failed(error),
        }
    }

    fn read_packet(&mut self) -> PacketRead {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return PacketRead::EndOfFile,
            Err(error) => return PacketRead::Failed(error),
        }

        let index = packet.stream();
        if index == self.video_index {
            return match self.video.send_packet(&packet) {
                Ok(()) => PacketRead::VideoSent,
                Err(error) => PacketRead::VideoRejected(error),
            };
        }
        match self.audio.as_mut() {
            Some(audio) if audio.index == index && audio.resampler.is_some() => {
                PacketRead::Audio(audio.decode(&packet))
            }
            _ => PacketRead::Skipped,
        }
    }

    fn send_video_eof(&mut self) -> Result<()> {
        self.video.send_eof()?;
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn seek(&mut self, target_secs: f64) -> Result<()> {
        let timestamp = secs_to_micros(target_secs.max(0.0)) as i64;
        // RangeTo lets FFmpeg land on the keyframe before the target.
        self.input
            .seek(timestamp, ..timestamp)
            .map_err(|e| Error::Video(VideoError::DecodingFailed(format!("Seek failed: {e}"))))?;
        // SAFETY: the input context is valid and owned by this session.
        unsafe {
            ffmpeg::ffi::avformat_flush(self.input.as_mut_ptr());
        }
        self.video.flush();
        if let Some(audio) = self.audio.as_mut() {
            audio.decoder.flush();
        }
        Ok(())
    }

    fn audio_input(&self) -> Option<AudioFormat> {
        self.audio.as_ref().map(|audio| AudioFormat {
            sample_rate: audio.decoder.rate(),
            channels: audio.decoder.channels() as u16,
        })
    }

    fn set_audio_output(&mut self, format: Option<AudioFormat>) -> Result<()> {
        let Some(audio) = self.audio.as_mut() else {
            return Ok(());
        };
        audio.resampler = match format {
            Some(format) => Some(Resampler::new(&audio.decoder, format)?),
            None => None,
        };
        Ok(())
    }

    fn hardware_device(&self) -> Option<&str> {
        self.device.as_ref().map(HwDeviceContext::name)
    }
}
