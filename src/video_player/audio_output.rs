// SPDX-License-Identifier: MPL-2.0
//! Audio output using cpal for low-latency playback.
//!
//! The decode thread writes interleaved f32 samples into a bounded ring buffer
//! through the [`AudioSink`] trait; the device callback drains it. The sink
//! counts every accepted sample, which together with the queued amount gives
//! the audio clock.

use super::audio::AudioFormat;
use super::volume::Volume;
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Control flags shared between the facade, the decode thread and the device callback.
#[derive(Debug)]
pub struct AudioControl {
    /// Current volume (stored as u32 bits of f32 for atomic access).
    volume_bits: AtomicU32,
    muted: AtomicBool,
    paused: AtomicBool,
    /// Set by the stream error callback.
    failed: AtomicBool,
}

impl AudioControl {
    pub fn new(volume: Volume, muted: bool) -> Self {
        Self {
            volume_bits: AtomicU32::new(volume.to_bits()),
            muted: AtomicBool::new(muted),
            paused: AtomicBool::new(true),
            failed: AtomicBool::new(false),
        }
    }

    pub fn volume(&self) -> Volume {
        Volume::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: Volume) {
        self.volume_bits.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    /// Forgets a failure of a previous device before opening a new one.
    pub fn clear_failed(&self) {
        self.failed.store(false, Ordering::Release);
    }

    /// Gain applied to samples. Quadratic so the control feels linear to the ear.
    pub fn gain(&self) -> f32 {
        if self.is_muted() {
            return 0.0;
        }
        let volume = self.volume().value();
        volume * volume
    }
}

impl Default for AudioControl {
    fn default() -> Self {
        Self::new(Volume::default(), false)
    }
}

/// Decode-thread side of an audio device.
pub trait AudioSink: Send {
    /// Format the device was opened with.
    fn format(&self) -> AudioFormat;

    /// Ring buffer size in interleaved samples.
    fn capacity_samples(&self) -> usize;

    /// Free ring buffer space in interleaved samples.
    fn free_samples(&self) -> usize;

    /// Copies as many samples as fit and returns how many were accepted.
    fn write(&mut self, samples: &[f32]) -> usize;

    /// Cumulative duration of accepted audio since the sink was opened.
    fn processed_usecs(&self) -> i64;

    /// False once the device failed or was closed.
    fn is_active(&self) -> bool;

    /// Discards queued audio.
    fn clear(&mut self);

    /// Stops consuming samples; processed time stops advancing.
    fn suspend(&mut self);

    fn resume(&mut self);
}

/// Audio device discovery and opening.
pub trait AudioHost: Send {
    /// Returns true if the device accepts this format.
    fn supports(&self, format: AudioFormat) -> bool;

    /// Device preferred format, if a device exists.
    fn preferred_format(&self) -> Option<AudioFormat>;

    /// Opens a suspended sink with a ring buffer of `buffer` length.
    fn open(
        &self,
        format: AudioFormat,
        buffer: Duration,
        control: Arc<AudioControl>,
    ) -> Result<Box<dyn AudioSink>>;
}

/// Number of interleaved samples in `duration` of audio.
pub fn samples_for(format: AudioFormat, duration: Duration) -> usize {
    let frames = (duration.as_secs_f64() * f64::from(format.sample_rate)).round() as usize;
    frames * usize::from(format.channels.max(1))
}

/// Duration of `samples` interleaved samples, in microseconds.
pub fn samples_to_usecs(format: AudioFormat, samples: u64) -> i64 {
    let channels = u64::from(format.channels.max(1));
    let rate = u64::from(format.sample_rate.max(1));
    ((samples / channels) * 1_000_000 / rate) as i64
}

type RingBuffer = Arc<Mutex<VecDeque<f32>>>;

/// The system default output device.
#[derive(Default)]
pub struct CpalHost;

impl CpalHost {
    pub fn new() -> Self {
        Self
    }

    fn device() -> Option<cpal::Device> {
        cpal::default_host().default_output_device()
    }
}

impl AudioHost for CpalHost {
    fn supports(&self, format: AudioFormat) -> bool {
        let Some(device) = Self::device() else {
            return false;
        };
        let Ok(configs) = device.supported_output_configs() else {
            return false;
        };
        configs.into_iter().any(|cfg| {
            cfg.channels() == format.channels
                && format.sample_rate >= cfg.min_sample_rate()
                && format.sample_rate <= cfg.max_sample_rate()
        })
    }

    fn preferred_format(&self) -> Option<AudioFormat> {
        let config = Self::device()?.default_output_config().ok()?;
        Some(AudioFormat {
            sample_rate: config.sample_rate(),
            channels: config.channels(),
        })
    }

    fn open(
        &self,
        format: AudioFormat,
        buffer: Duration,
        control: Arc<AudioControl>,
    ) -> Result<Box<dyn AudioSink>> {
        let sink = CpalAudioSink::open(format, buffer, control)?;
        Ok(Box::new(sink))
    }
}

/// Ring-buffered cpal output stream.
pub struct CpalAudioSink {
    format: AudioFormat,
    capacity: usize,
    buffer: RingBuffer,
    accepted: AtomicU64,
    control: Arc<AudioControl>,
    stream: cpal::Stream,
}

// SAFETY: the stream handle is only used from the decode thread that owns the
// sink; the callback side shares nothing but the ring buffer and atomics.
unsafe impl Send for CpalAudioSink {}

impl CpalAudioSink {
    /// Opens the default device at `format`. The stream starts suspended.
    ///
    /// # Errors
    ///
    /// Returns an error if no device exists or the stream cannot be built.
    pub fn open(format: AudioFormat, buffer: Duration, control: Arc<AudioControl>) -> Result<Self> {
        let device = CpalHost::device()
            .ok_or_else(|| Error::Audio("No audio output device found".to_string()))?;
        let sample_format = device
            .default_output_config()
            .map_err(|e| Error::Audio(format!("Failed to get audio config: {e}")))?
            .sample_format();

        let config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: format.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let capacity = samples_for(format, buffer).max(usize::from(format.channels.max(1)));
        let ring: RingBuffer = Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));

        let stream = match sample_format {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config, Arc::clone(&ring), Arc::clone(&control))?
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config, Arc::clone(&ring), Arc::clone(&control))?
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config, Arc::clone(&ring), Arc::clone(&control))?
            }
            other => {
                return Err(Error::Audio(format!(
                    "Unsupported audio sample format: {other:?}"
                )))
            }
        };

        stream
            .play()
            .map_err(|e| Error::Audio(format!("Failed to start audio stream: {e}")))?;
        control.set_paused(true);

        tracing::info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            capacity,
            "audio output opened"
        );

        Ok(Self {
            format,
            capacity,
            buffer: ring,
            accepted: AtomicU64::new(0),
            control,
            stream,
        })
    }

    /// Builds an audio output stream for a specific sample format.
    fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        buffer: RingBuffer,
        control: Arc<AudioControl>,
    ) -> Result<cpal::Stream> {
        let error_control = Arc::clone(&control);
        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let silence = T::from_sample(0.0f32);
                    if control.is_paused() || control.has_failed() {
                        data.fill(silence);
                        return;
                    }

                    let gain = control.gain();
                    let Ok(mut buf) = buffer.lock() else {
                        data.fill(silence);
                        return;
                    };

                    for sample in data.iter_mut() {
                        *sample = match buf.pop_front() {
                            // Clamping to slightly below 1.0 prevents i16 overflow.
                            Some(value) => T::from_sample((value * gain).clamp(-1.0, 0.999_999_9)),
                            None => silence,
                        };
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio output stream error");
                    error_control.mark_failed();
                },
                None,
            )
            .map_err(|e| Error::Audio(format!("Failed to build audio stream: {e}")))
    }
}

impl AudioSink for CpalAudioSink {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn capacity_samples(&self) -> usize {
        self.capacity
    }

    fn free_samples(&self) -> usize {
        let queued = self
            .buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        self.capacity.saturating_sub(queued)
    }

    fn write(&mut self, samples: &[f32]) -> usize {
        let mut buf = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let count = samples.len().min(self.capacity.saturating_sub(buf.len()));
        buf.extend(&samples[..count]);
        drop(buf);
        self.accepted.fetch_add(count as u64, Ordering::AcqRel);
        count
    }

    fn processed_usecs(&self) -> i64 {
        samples_to_usecs(self.format, self.accepted.load(Ordering::Acquire))
    }

    fn is_active(&self) -> bool {
        !self.control.has_failed()
    }

    fn clear(&mut self) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn suspend(&mut self) {
        self.control.set_paused(true);
        if let Err(e) = self.stream.pause() {
            tracing::debug!(error = %e, "audio stream pause failed, callback outputs silence");
        }
    }

    fn resume(&mut self) {
        if let Err(e) = self.stream.play() {
            tracing::warn!(error = %e, "audio stream resume failed");
        }
        self.control.set_paused(false);
    }
}
