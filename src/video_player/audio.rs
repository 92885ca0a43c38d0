// SPDX-License-Identifier: MPL-2.0
//! Audio format negotiation, resampling and non-blocking device writes.

use super::audio_output::{AudioHost, AudioSink};
use super::sync::TimeSource;
use crate::config::{FREE_SPACE_POLL_INTERVAL_MS, MAX_FREE_SPACE_POLLS, STANDARD_SAMPLE_RATE};
use crate::error::{Error, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::sample::Type as SampleType;
use ffmpeg_next::format::Sample;
use ffmpeg_next::software::resampling;
use ffmpeg_next::ChannelLayout;
use std::time::Duration;

/// Sample rate and channel count of an audio stream or device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub const fn stereo(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 2,
        }
    }

    pub fn is_valid(self) -> bool {
        self.sample_rate > 0 && self.channels > 0
    }
}

/// Picks the device format for an input stream.
///
/// Tried in order: the input format itself, stereo at the input rate, stereo
/// at 44.1 kHz, then the device preferred format. A preferred format with
/// more than two channels is coerced to stereo.
pub fn negotiate_output_format(input: AudioFormat, host: &dyn AudioHost) -> Option<AudioFormat> {
    let candidates = [
        input,
        AudioFormat::stereo(input.sample_rate),
        AudioFormat::stereo(STANDARD_SAMPLE_RATE),
    ];
    if let Some(format) = candidates
        .into_iter()
        .filter(|format| format.is_valid())
        .find(|format| host.supports(*format))
    {
        return Some(format);
    }

    let preferred = host.preferred_format()?;
    let channels = if preferred.channels == 1 { 1 } else { 2 };
    let coerced = AudioFormat {
        sample_rate: preferred.sample_rate,
        channels,
    };
    if coerced != preferred {
        tracing::debug!(?preferred, ?coerced, "coercing device preferred audio format");
    }
    coerced.is_valid().then_some(coerced)
}

fn layout_for(channels: u16) -> ChannelLayout {
    match channels {
        1 => ChannelLayout::MONO,
        2 => ChannelLayout::STEREO,
        n => ChannelLayout::default(i32::from(n)),
    }
}

/// Converts decoded audio to packed f32 at the device format.
pub struct Resampler {
    context: resampling::Context,
    output: AudioFormat,
}

// SAFETY: the resampler is owned and used by the decode thread only.
unsafe impl Send for Resampler {}

impl Resampler {
    pub fn new(decoder: &ffmpeg::decoder::Audio, output: AudioFormat) -> Result<Self> {
        let input_layout = if decoder.channel_layout().is_empty() {
            ChannelLayout::default(i32::from(decoder.channels()))
        } else {
            decoder.channel_layout()
        };
        let context = resampling::Context::get(
            decoder.format(),
            input_layout,
            decoder.rate(),
            Sample::F32(SampleType::Packed),
            layout_for(output.channels),
            output.sample_rate,
        )
        .map_err(|e| Error::Audio(format!("Failed to create resampler: {e}")))?;
        Ok(Self { context, output })
    }

    /// Resamples one decoded frame into interleaved samples.
    pub fn convert(&mut self, frame: &ffmpeg::frame::Audio) -> Result<Vec<f32>> {
        let mut converted = ffmpeg::frame::Audio::empty();
        self.context
            .run(frame, &mut converted)
            .map_err(|e| Error::Audio(format!("Resampling failed: {e}")))?;
        Ok(extract_samples(&converted, self.output.channels))
    }
}

/// Extracts f32 samples from a packed f32 audio frame.
pub fn extract_samples(frame: &ffmpeg::frame::Audio, channels: u16) -> Vec<f32> {
    if frame.samples() == 0 {
        return Vec::new();
    }
    let data = frame.data(0);
    let sample_count = frame.samples() * usize::from(channels);
    data.chunks_exact(4)
        .take(sample_count)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect()
}

/// Writes to an [`AudioSink`] without blocking.
///
/// Whatever does not fit is kept as a remainder and written first on the next
/// call. The remainder never exceeds the sink capacity: past it, free space is
/// polled a bounded number of times and then the oldest samples are dropped.
#[derive(Debug, Default)]
pub struct RemainderWriter {
    remainder: Vec<f32>,
    dropped_samples: u64,
}

impl RemainderWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.remainder.len()
    }

    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }

    pub fn clear(&mut self) {
        self.remainder.clear();
    }

    /// Writes as much of the remainder as fits. Returns the number written.
    pub fn flush(&mut self, sink: &mut dyn AudioSink) -> usize {
        if self.remainder.is_empty() {
            return 0;
        }
        let channels = usize::from(sink.format().channels.max(1));
        let free = whole_frames(sink.free_samples(), channels);
        let count = whole_frames(free.min(self.remainder.len()), channels);
        if count == 0 {
            return 0;
        }
        let written = sink.write(&self.remainder[..count]);
        self.remainder.drain(..written);
        written
    }

    /// Queues `samples` behind any remainder and writes what fits.
    pub fn write(&mut self, sink: &mut dyn AudioSink, samples: &[f32], time: &dyn TimeSource) {
        self.flush(sink);
        let channels = usize::from(sink.format().channels.max(1));

        let mut tail = samples;
        if self.remainder.is_empty() {
            let free = whole_frames(sink.free_samples(), channels);
            let count = whole_frames(free.min(samples.len()), channels);
            let written = if count > 0 { sink.write(&samples[..count]) } else { 0 };
            tail = &samples[written..];
        }
        if tail.is_empty() {
            return;
        }
        self.remainder.extend_from_slice(tail);

        let capacity = sink.capacity_samples();
        let mut polls = 0;
        while self.remainder.len() > capacity && polls < MAX_FREE_SPACE_POLLS && sink.is_active() {
            time.sleep(Duration::from_millis(FREE_SPACE_POLL_INTERVAL_MS));
            self.flush(sink);
            polls += 1;
        }

        if self.remainder.len() > capacity {
            let excess = self.remainder.len() - capacity;
            let excess = excess.div_ceil(channels) * channels;
            let excess = excess.min(self.remainder.len());
            self.remainder.drain(..excess);
            self.dropped_samples += excess as u64;
            tracing::debug!(
                dropped = excess,
                total_dropped = self.dropped_samples,
                "audio remainder over capacity, dropping oldest samples"
            );
        }
    }
}

fn whole_frames(samples: usize, channels: usize) -> usize {
    samples - samples % channels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video_player::audio_output::AudioControl;
    use crate::video_player::sync::ManualTimeSource;
    use std::sync::Arc;

    struct FakeHost {
        supported: Vec<AudioFormat>,
        preferred: Option<AudioFormat>,
    }

    impl AudioHost for FakeHost {
        fn supports(&self, format: AudioFormat) -> bool {
            self.supported.contains(&format)
        }

        fn preferred_format(&self) -> Option<AudioFormat> {
            self.preferred
        }

        fn open(
            &self,
            _format: AudioFormat,
            _buffer: Duration,
            _control: Arc<AudioControl>,
        ) -> Result<Box<dyn AudioSink>> {
            Err(Error::Audio("not used".into()))
        }
    }

    /// Sink whose free space is scripted by the test.
    struct ScriptedSink {
        capacity: usize,
        queued: usize,
        written: Vec<f32>,
    }

    impl AudioSink for ScriptedSink {
        fn format(&self) -> AudioFormat {
            AudioFormat::stereo(48_000)
        }
        fn capacity_samples(&self) -> usize {
            self.capacity
        }
        fn free_samples(&self) -> usize {
            self.capacity - self.queued
        }
        fn write(&mut self, samples: &[f32]) -> usize {
            let count = samples.len().min(self.free_samples());
            self.written.extend_from_slice(&samples[..count]);
            self.queued += count;
            count
        }
        fn processed_usecs(&self) -> i64 {
            0
        }
        fn is_active(&self) -> bool {
            true
        }
        fn clear(&mut self) {
            self.queued = 0;
        }
        fn suspend(&mut self) {}
        fn resume(&mut self) {}
    }

    const SURROUND_48K: AudioFormat = AudioFormat {
        sample_rate: 48_000,
        channels: 6,
    };

    #[test]
    fn native_format_is_preferred() {
        let host = FakeHost {
            supported: vec![SURROUND_48K, AudioFormat::stereo(48_000)],
            preferred: None,
        };
        assert_eq!(negotiate_output_format(SURROUND_48K, &host), Some(SURROUND_48K));
    }

    #[test]
    fn falls_back_to_stereo_at_input_rate() {
        let host = FakeHost {
            supported: vec![AudioFormat::stereo(48_000), AudioFormat::stereo(44_100)],
            preferred: None,
        };
        assert_eq!(
            negotiate_output_format(SURROUND_48K, &host),
            Some(AudioFormat::stereo(48_000))
        );
    }

    #[test]
    fn falls_back_to_standard_rate() {
        let host = FakeHost {
            supported: vec![AudioFormat::stereo(44_100)],
            preferred: None,
        };
        assert_eq!(
            negotiate_output_format(AudioFormat::stereo(96_000), &host),
            Some(AudioFormat::stereo(44_100))
        );
    }

    #[test]
    fn falls_back_to_coerced_preferred_format() {
        let host = FakeHost {
            supported: vec![],
            preferred: Some(AudioFormat {
                sample_rate: 32_000,
                channels: 8,
            }),
        };
        assert_eq!(
            negotiate_output_format(AudioFormat::stereo(96_000), &host),
            Some(AudioFormat::stereo(32_000))
        );
    }

    #[test]
    fn no_device_means_no_format() {
        let host = FakeHost {
            supported: vec![],
            preferred: None,
        };
        assert_eq!(negotiate_output_format(AudioFormat::stereo(48_000), &host), None);
    }

    #[test]
    fn write_keeps_unwritten_remainder() {
        let time = ManualTimeSource::new();
        let mut sink = ScriptedSink {
            capacity: 8,
            queued: 4,
            written: Vec::new(),
        };
        let mut writer = RemainderWriter::new();
        writer.write(&mut sink, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &time);

        assert_eq!(sink.written, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(writer.pending(), 2);

        sink.queued = 0;
        writer.write(&mut sink, &[7.0, 8.0], &time);
        assert_eq!(sink.written, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(writer.pending(), 0);
    }

    #[test]
    fn writes_stay_frame_aligned() {
        let time = ManualTimeSource::new();
        let mut sink = ScriptedSink {
            capacity: 5,
            queued: 0,
            written: Vec::new(),
        };
        let mut writer = RemainderWriter::new();
        writer.write(&mut sink, &[0.1; 6], &time);
        assert_eq!(sink.written.len(), 4);
        assert_eq!(writer.pending(), 2);
    }

    #[test]
    fn remainder_is_bounded_by_capacity() {
        let time = ManualTimeSource::new();
        let mut sink = ScriptedSink {
            capacity: 4,
            queued: 4,
            written: Vec::new(),
        };
        let mut writer = RemainderWriter::new();
        let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();
        writer.write(&mut sink, &samples, &time);

        assert_eq!(writer.pending(), 4);
        assert_eq!(writer.dropped_samples(), 6);
        assert_eq!(
            time.now(),
            Duration::from_millis(FREE_SPACE_POLL_INTERVAL_MS * u64::from(MAX_FREE_SPACE_POLLS))
        );

        // The newest samples survive.
        sink.queued = 0;
        writer.flush(&mut sink);
        assert_eq!(sink.written, vec![6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn clear_discards_remainder() {
        let time = ManualTimeSource::new();
        let mut sink = ScriptedSink {
            capacity: 2,
            queued: 2,
            written: Vec::new(),
        };
        let mut writer = RemainderWriter::new();
        writer.write(&mut sink, &[1.0, 2.0], &time);
        assert_eq!(writer.pending(), 2);
        writer.clear();
        assert_eq!(writer.pending(), 0);
    }

    #[test]
    fn extract_samples_reads_packed_f32() {
        ffmpeg::init().expect("ffmpeg init");
        let mut frame = ffmpeg::frame::Audio::new(Sample::F32(SampleType::Packed), 2, ChannelLayout::STEREO);
        let bytes: Vec<u8> = [0.5f32, -0.5, 0.25, -0.25]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        frame.data_mut(0)[..bytes.len()].copy_from_slice(&bytes);
        assert_eq!(extract_samples(&frame, 2), vec![0.5, -0.5, 0.25, -0.25]);
    }
}
