// SPDX-License-Identifier: MPL-2.0
//! HDR to SDR tone mapping through an FFmpeg filter graph.
//!
//! The chain is fixed: optional downscale, `zscale` to linear light from
//! BT.2020 with the source's PQ or HLG curve, `tonemap=hable`, `zscale` back
//! to BT.709 and finally NV12. The graph is built lazily on the first HDR frame
//! and rebuilt only when the input geometry, format, transfer curve or
//! processing size changes, or after it has been poisoned by a rejected push.
//!
//! Frames are cloned before they are pushed so the graph never shares a buffer
//! with the decoder. An atomic in-flight counter bounds how many clones the
//! graph may hold; at the bound new frames are dropped before cloning.

use super::failure_run::{FailureReport, FailureRun};
use crate::config::HdrSettings;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::color::{Primaries, Range, Space, TransferCharacteristic};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::{filter, frame, Rational};
use std::sync::atomic::{AtomicU32, Ordering};

/// Sink errors logged individually before escalating.
const SINK_FAILURE_LOG_LIMIT: u32 = 5;

/// Returns true if the frame must go through the tone mapping graph.
///
/// 10-bit planar formats are always treated as HDR. Other formats qualify when
/// they carry a PQ or HLG transfer characteristic.
pub fn needs_tone_mapping(format: Pixel, transfer: TransferCharacteristic) -> bool {
    matches!(format, Pixel::YUV420P10LE | Pixel::P010LE)
        || matches!(
            transfer,
            TransferCharacteristic::SMPTE2084 | TransferCharacteristic::ARIB_STD_B67
        )
}

/// HDR transfer curve the graph linearizes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdrTransfer {
    Pq,
    Hlg,
}

impl HdrTransfer {
    /// HLG when the frame says so, PQ for everything else including missing
    /// or contradictory tags on 10-bit content.
    pub fn of(transfer: TransferCharacteristic) -> Self {
        match transfer {
            TransferCharacteristic::ARIB_STD_B67 => Self::Hlg,
            _ => Self::Pq,
        }
    }

    pub fn characteristic(self) -> TransferCharacteristic {
        match self {
            Self::Pq => TransferCharacteristic::SMPTE2084,
            Self::Hlg => TransferCharacteristic::ARIB_STD_B67,
        }
    }

    fn zscale_name(self) -> &'static str {
        match self {
            Self::Pq => "smpte2084",
            Self::Hlg => "arib-std-b67",
        }
    }
}

/// Stamps the color description the graph expects onto a frame.
///
/// Hardware transfers routinely lose these fields and the buffer source locks
/// its configuration on the first frame, so every frame gets identical values.
pub fn apply_hdr_metadata(frame: &mut frame::Video, transfer: HdrTransfer) {
    frame.set_color_range(Range::MPEG);
    frame.set_color_primaries(Primaries::BT2020);
    frame.set_color_transfer_characteristic(transfer.characteristic());
    frame.set_color_space(Space::BT2020NCL);
}

/// Size the tone mapping runs at.
///
/// A display smaller than the source wins, aspect preserved. Otherwise sources
/// above the ceiling are reduced to it along their long edge. `None` means no
/// downscale stage.
pub fn plan_processing_size(
    source: (u32, u32),
    display: Option<(u32, u32)>,
    ceiling: (u32, u32),
) -> Option<(u32, u32)> {
    let (width, height) = source;
    if width == 0 || height == 0 {
        return None;
    }
    // Integer math keeps exact ratios exact.
    let scale = |value: u32, num: u32, den: u32| -> u32 {
        (u64::from(value) * u64::from(num) / u64::from(den)) as u32
    };

    if let Some((dw, dh)) = display.filter(|(w, h)| *w > 0 && *h > 0) {
        if dw < width || dh < height {
            let size = if u64::from(dw) * u64::from(height) <= u64::from(dh) * u64::from(width) {
                (dw, scale(dw, height, width))
            } else {
                (scale(dh, width, height), dh)
            };
            return Some(even_size(size));
        }
    }

    let (cw, ch) = ceiling;
    if width > cw || height > ch {
        let size = if width > height {
            (cw, scale(cw, height, width))
        } else {
            (scale(ch, width, height), ch)
        };
        return Some(even_size(size));
    }

    None
}

/// NV12 needs even dimensions.
fn even_size((w, h): (u32, u32)) -> (u32, u32) {
    ((w & !1).max(2), (h & !1).max(2))
}

/// Builds the textual filter chain between the buffer source and sink.
pub fn filter_spec(processing_size: Option<(u32, u32)>, transfer: HdrTransfer) -> String {
    let mut spec = String::new();
    if let Some((w, h)) = processing_size {
        spec.push_str(&format!("scale=w={w}:h={h}:flags=fast_bilinear,"));
    }
    spec.push_str(&format!(
        "zscale=primariesin=bt2020:transferin={}:matrixin=bt2020nc:rangein=tv:transfer=linear:npl=100,",
        transfer.zscale_name()
    ));
    spec.push_str("tonemap=tonemap=hable:desat=0,");
    spec.push_str(
        "zscale=transferin=linear:primaries=bt709:transfer=bt709:matrix=bt709:range=tv,",
    );
    spec.push_str("format=pix_fmts=nv12");
    spec
}

/// Returns true when this FFmpeg build ships the filters the chain needs.
pub fn tone_mapping_available() -> bool {
    ["buffer", "buffersink", "zscale", "tonemap", "format"]
        .iter()
        .all(|name| filter::find(name).is_some())
}

/// Pushed-but-not-pulled frame counter.
#[derive(Debug, Default)]
pub struct InFlightCounter(AtomicU32);

impl InFlightCounter {
    pub fn current(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements without wrapping below zero.
    pub fn decrement(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }
}

/// Identity of a configured graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphKey {
    pub width: u32,
    pub height: u32,
    pub format: Pixel,
    pub transfer: HdrTransfer,
    pub processing_size: Option<(u32, u32)>,
}

/// Result of feeding one frame to the tone mapper.
pub enum ToneMapOutcome {
    /// An 8-bit NV12 frame is ready.
    Output(frame::Video),
    /// The graph accepted the frame but has nothing to emit yet.
    NeedMore,
    /// The in-flight bound was reached. The frame was dropped before cloning.
    Backpressure,
    /// Rebuilding was refused because the live graph still holds frames.
    Refused,
    /// The graph rejected the frame or failed to configure and was discarded.
    Poisoned(String),
    /// The sink returned an error. The graph is kept.
    SinkError(String),
}

impl std::fmt::Debug for ToneMapOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Output(frame) => f
                .debug_struct("Output")
                .field("format", &frame.format())
                .field("pts", &frame.pts())
                .finish(),
            Self::NeedMore => f.write_str("NeedMore"),
            Self::Backpressure => f.write_str("Backpressure"),
            Self::Refused => f.write_str("Refused"),
            Self::Poisoned(reason) => f.debug_tuple("Poisoned").field(reason).finish(),
            Self::SinkError(message) => f.debug_tuple("SinkError").field(message).finish(),
        }
    }
}

struct LiveGraph {
    graph: filter::Graph,
    key: GraphKey,
}

// SAFETY: the graph is created, fed and dropped by the decode thread only.
unsafe impl Send for LiveGraph {}

impl LiveGraph {
    fn build(key: GraphKey, time_base: Rational) -> Result<Self, ffmpeg::Error> {
        let mut graph = filter::Graph::new();
        let buffer = filter::find("buffer").ok_or(ffmpeg::Error::FilterNotFound)?;
        let buffersink = filter::find("buffersink").ok_or(ffmpeg::Error::FilterNotFound)?;

        let args = format!(
            "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect=1/1",
            key.width,
            key.height,
            ffmpeg::ffi::AVPixelFormat::from(key.format) as i32,
            time_base.numerator(),
            time_base.denominator().max(1),
        );
        graph.add(&buffer, "in", &args)?;
        graph.add(&buffersink, "out", "")?;
        if let Some(mut out) = graph.get("out") {
            out.set_pixel_format(Pixel::NV12);
        }

        graph
            .output("in", 0)?
            .input("out", 0)?
            .parse(&filter_spec(key.processing_size, key.transfer))?;
        graph.validate()?;

        Ok(Self { graph, key })
    }

    fn push(&mut self, frame: &frame::Video) -> Result<(), ffmpeg::Error> {
        let mut source = self.graph.get("in").ok_or(ffmpeg::Error::FilterNotFound)?;
        source.source().add(frame)
    }

    fn pull(&mut self, out: &mut frame::Video) -> Result<(), ffmpeg::Error> {
        let mut sink = self.graph.get("out").ok_or(ffmpeg::Error::FilterNotFound)?;
        sink.sink().frame(out)
    }
}

/// Lazily built HDR tone mapping stage.
pub struct HdrToneMapper {
    graph: Option<LiveGraph>,
    in_flight: InFlightCounter,
    max_in_flight: u32,
    ceiling: (u32, u32),
    display_size: Option<(u32, u32)>,
    sink_failures: FailureRun,
    /// Set after a refused rebuild; the next attempt discards the stale graph.
    stale: bool,
}

impl HdrToneMapper {
    pub fn new(settings: &HdrSettings) -> Self {
        Self {
            graph: None,
            in_flight: InFlightCounter::default(),
            max_in_flight: settings.max_in_flight(),
            ceiling: (settings.ceiling_width, settings.ceiling_height),
            display_size: None,
            sink_failures: FailureRun::new(SINK_FAILURE_LOG_LIMIT),
            stale: false,
        }
    }

    pub fn set_display_size(&mut self, size: Option<(u32, u32)>) {
        self.display_size = size;
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.current()
    }

    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight
    }

    pub fn is_configured(&self) -> bool {
        self.graph.is_some()
    }

    /// Drops the graph and any frames it holds.
    pub fn reset(&mut self) {
        self.graph = None;
        self.in_flight.reset();
        self.stale = false;
    }

    fn poison(&mut self, reason: &str) -> ToneMapOutcome {
        tracing::warn!(reason, "HDR filter graph poisoned, rebuilding on next frame");
        self.reset();
        ToneMapOutcome::Poisoned(reason.to_string())
    }

    /// Pulls and discards whatever the live graph can still emit.
    fn drain_stale(&mut self) {
        let Some(live) = self.graph.as_mut() else {
            return;
        };
        let mut scratch = frame::Video::empty();
        while self.in_flight.current() > 0 && live.pull(&mut scratch).is_ok() {
            self.in_flight.decrement();
        }
    }

    /// Makes sure a graph matching `key` is live.
    fn ensure_graph(&mut self, key: GraphKey, time_base: Rational) -> Result<(), ToneMapOutcome> {
        if self.graph.as_ref().is_some_and(|live| live.key == key) {
            return Ok(());
        }

        if self.graph.is_some() {
            self.drain_stale();
            if self.in_flight.current() > 0 {
                if self.stale {
                    self.poison("frames stuck across geometry change");
                } else {
                    tracing::debug!(
                        in_flight = self.in_flight.current(),
                        "refusing HDR graph rebuild while frames are in flight"
                    );
                    self.stale = true;
                    return Err(ToneMapOutcome::Refused);
                }
            }
        }

        match LiveGraph::build(key, time_base) {
            Ok(live) => {
                tracing::debug!(
                    width = key.width,
                    height = key.height,
                    format = ?key.format,
                    transfer = ?key.transfer,
                    processing_size = ?key.processing_size,
                    "HDR tone mapping graph configured"
                );
                self.graph = Some(live);
                self.in_flight.reset();
                self.stale = false;
                Ok(())
            }
            Err(err) => Err(self.poison(&format!("configure failed: {err}"))),
        }
    }

    /// Feeds one HDR frame. The caller's frame is stamped with HDR metadata but
    /// never handed to the graph itself.
    pub fn process(&mut self, frame: &mut frame::Video, time_base: Rational) -> ToneMapOutcome {
        if self.in_flight.current() >= self.max_in_flight {
            // The new frame is dropped uncloned; a frame already queued may still come out.
            let mut out = frame::Video::empty();
            if let Some(live) = self.graph.as_mut() {
                if live.pull(&mut out).is_ok() {
                    self.in_flight.decrement();
                    return ToneMapOutcome::Output(out);
                }
            }
            return ToneMapOutcome::Backpressure;
        }

        let transfer = HdrTransfer::of(frame.color_transfer_characteristic());
        let key = GraphKey {
            width: frame.width(),
            height: frame.height(),
            format: frame.format(),
            transfer,
            processing_size: plan_processing_size(
                (frame.width(), frame.height()),
                self.display_size,
                self.ceiling,
            ),
        };
        if let Err(outcome) = self.ensure_graph(key, time_base) {
            return outcome;
        }

        apply_hdr_metadata(frame, transfer);
        let clone = frame.clone();

        let pushed = match self.graph.as_mut() {
            Some(live) => live.push(&clone),
            None => Err(ffmpeg::Error::FilterNotFound),
        };
        if let Err(err) = pushed {
            return self.poison(&format!("push rejected: {err}"));
        }
        self.in_flight.increment();

        let mut out = frame::Video::empty();
        let pulled = match self.graph.as_mut() {
            Some(live) => live.pull(&mut out),
            None => Err(ffmpeg::Error::FilterNotFound),
        };
        match pulled {
            Ok(()) => {
                self.in_flight.decrement();
                self.sink_failures.record_success();
                ToneMapOutcome::Output(out)
            }
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                ToneMapOutcome::NeedMore
            }
            Err(ffmpeg::Error::Eof) => ToneMapOutcome::NeedMore,
            Err(err) => {
                let message = err.to_string();
                match self.sink_failures.record_failure() {
                    FailureReport::Transient => {
                        tracing::warn!(error = %message, attempt = self.sink_failures.count(), "HDR filter sink error");
                    }
                    FailureReport::Persistent => {
                        tracing::warn!(error = %message, "HDR filter sink errors persisting");
                    }
                    FailureReport::Suppressed => {}
                }
                ToneMapOutcome::SinkError(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CEILING: (u32, u32) = (1920, 1080);

    #[test]
    fn ten_bit_formats_need_tone_mapping() {
        assert!(needs_tone_mapping(
            Pixel::YUV420P10LE,
            TransferCharacteristic::Unspecified
        ));
        assert!(needs_tone_mapping(
            Pixel::P010LE,
            TransferCharacteristic::BT709
        ));
    }

    #[test]
    fn pq_or_hlg_transfer_needs_tone_mapping() {
        assert!(needs_tone_mapping(Pixel::NV12, TransferCharacteristic::SMPTE2084));
        assert!(needs_tone_mapping(
            Pixel::NV12,
            TransferCharacteristic::ARIB_STD_B67
        ));
        assert!(!needs_tone_mapping(Pixel::NV12, TransferCharacteristic::BT709));
        assert!(!needs_tone_mapping(
            Pixel::YUV420P,
            TransferCharacteristic::Unspecified
        ));
    }

    #[test]
    fn small_source_is_not_scaled() {
        assert_eq!(plan_processing_size((1280, 720), None, CEILING), None);
        assert_eq!(plan_processing_size((1920, 1080), None, CEILING), None);
    }

    #[test]
    fn large_landscape_source_is_capped_by_width() {
        assert_eq!(
            plan_processing_size((3840, 2160), None, CEILING),
            Some((1920, 1080))
        );
    }

    #[test]
    fn large_portrait_source_is_capped_by_height() {
        assert_eq!(
            plan_processing_size((2160, 3840), None, CEILING),
            Some((606, 1080))
        );
    }

    #[test]
    fn smaller_display_wins_and_keeps_aspect() {
        assert_eq!(
            plan_processing_size((3840, 2160), Some((960, 720)), CEILING),
            Some((960, 540))
        );
        assert_eq!(
            plan_processing_size((3840, 2160), Some((1280, 360)), CEILING),
            Some((640, 360))
        );
    }

    #[test]
    fn larger_display_falls_back_to_ceiling() {
        assert_eq!(
            plan_processing_size((3840, 2160), Some((5120, 2880)), CEILING),
            Some((1920, 1080))
        );
    }

    #[test]
    fn degenerate_sizes_plan_nothing() {
        assert_eq!(plan_processing_size((0, 1080), None, CEILING), None);
        assert_eq!(
            plan_processing_size((3840, 2160), Some((0, 0)), CEILING),
            Some((1920, 1080))
        );
    }

    #[test]
    fn filter_spec_orders_stages() {
        let spec = filter_spec(Some((1920, 1080)), HdrTransfer::Pq);
        let scale = spec.find("scale=w=1920").unwrap_or(usize::MAX);
        let linearize = spec.find("transfer=linear").unwrap_or(usize::MAX);
        let tonemap = spec.find("tonemap=hable").unwrap_or(usize::MAX);
        let regamma = spec.find("transfer=bt709").unwrap_or(usize::MAX);
        let pack = spec.find("pix_fmts=nv12").unwrap_or(usize::MAX);
        assert!(scale < linearize);
        assert!(linearize < tonemap);
        assert!(tonemap < regamma);
        assert!(regamma < pack);
        assert!(spec.contains("desat=0"));
    }

    #[test]
    fn filter_spec_without_downscale_starts_with_zscale() {
        assert!(filter_spec(None, HdrTransfer::Pq).starts_with("zscale="));
    }

    #[test]
    fn filter_spec_linearizes_with_the_source_curve() {
        assert!(filter_spec(None, HdrTransfer::Pq).contains("transferin=smpte2084"));
        let hlg = filter_spec(None, HdrTransfer::Hlg);
        assert!(hlg.contains("transferin=arib-std-b67"));
        assert!(!hlg.contains("smpte2084"));
    }

    #[test]
    fn transfer_curve_follows_the_frame_tag() {
        assert_eq!(
            HdrTransfer::of(TransferCharacteristic::ARIB_STD_B67),
            HdrTransfer::Hlg
        );
        assert_eq!(HdrTransfer::of(TransferCharacteristic::SMPTE2084), HdrTransfer::Pq);
        assert_eq!(HdrTransfer::of(TransferCharacteristic::Unspecified), HdrTransfer::Pq);
        assert_eq!(HdrTransfer::of(TransferCharacteristic::Linear), HdrTransfer::Pq);
    }

    #[test]
    fn in_flight_counter_never_underflows() {
        let counter = InFlightCounter::default();
        counter.decrement();
        assert_eq!(counter.current(), 0);
        counter.increment();
        counter.increment();
        counter.decrement();
        assert_eq!(counter.current(), 1);
        counter.reset();
        assert_eq!(counter.current(), 0);
    }

    #[test]
    fn metadata_is_stamped_on_frame() {
        ffmpeg::init().expect("ffmpeg init");
        let mut frame = frame::Video::new(Pixel::YUV420P10LE, 64, 64);
        apply_hdr_metadata(&mut frame, HdrTransfer::Pq);
        assert_eq!(frame.color_range(), Range::MPEG);
        assert_eq!(frame.color_primaries(), Primaries::BT2020);
        assert_eq!(
            frame.color_transfer_characteristic(),
            TransferCharacteristic::SMPTE2084
        );
        assert_eq!(frame.color_space(), Space::BT2020NCL);
    }

    #[test]
    fn ten_bit_frames_come_out_as_nv12() {
        ffmpeg::init().expect("ffmpeg init");
        if !tone_mapping_available() {
            eprintln!("Skipping: FFmpeg build lacks zscale/tonemap");
            return;
        }
        let mut mapper = HdrToneMapper::new(&HdrSettings::default());
        let mut outputs = 0;
        for i in 0..4 {
            let mut frame = frame::Video::new(Pixel::YUV420P10LE, 128, 72);
            frame.set_pts(Some(i * 33));
            match mapper.process(&mut frame, Rational::new(1, 1000)) {
                ToneMapOutcome::Output(out) => {
                    assert_eq!(out.format(), Pixel::NV12);
                    outputs += 1;
                }
                ToneMapOutcome::NeedMore | ToneMapOutcome::Backpressure => {}
                other => panic!("unexpected outcome: {other:?}"),
            }
            assert!(mapper.in_flight() <= mapper.max_in_flight());
        }
        assert!(outputs > 0);
    }

    #[test]
    fn hlg_frames_keep_their_curve() {
        ffmpeg::init().expect("ffmpeg init");
        let mut frame = frame::Video::new(Pixel::YUV420P10LE, 64, 64);
        frame.set_color_transfer_characteristic(TransferCharacteristic::ARIB_STD_B67);
        let transfer = HdrTransfer::of(frame.color_transfer_characteristic());
        apply_hdr_metadata(&mut frame, transfer);
        assert_eq!(
            frame.color_transfer_characteristic(),
            TransferCharacteristic::ARIB_STD_B67
        );
        assert_eq!(frame.color_primaries(), Primaries::BT2020);
    }

    #[test]
    fn hlg_frames_come_out_as_nv12() {
        ffmpeg::init().expect("ffmpeg init");
        if !tone_mapping_available() {
            eprintln!("Skipping: FFmpeg build lacks zscale/tonemap");
            return;
        }
        let mut mapper = HdrToneMapper::new(&HdrSettings::default());
        let mut outputs = 0;
        for i in 0..4 {
            let mut frame = frame::Video::new(Pixel::YUV420P10LE, 128, 72);
            frame.set_pts(Some(i * 33));
            frame.set_color_transfer_characteristic(TransferCharacteristic::ARIB_STD_B67);
            match mapper.process(&mut frame, Rational::new(1, 1000)) {
                ToneMapOutcome::Output(out) => {
                    assert_eq!(out.format(), Pixel::NV12);
                    outputs += 1;
                }
                ToneMapOutcome::NeedMore | ToneMapOutcome::Backpressure => {}
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert!(outputs > 0);
    }

    #[test]
    fn outputs_keep_the_timestamp_of_the_frame_they_came_from() {
        ffmpeg::init().expect("ffmpeg init");
        if !tone_mapping_available() {
            eprintln!("Skipping: FFmpeg build lacks zscale/tonemap");
            return;
        }
        let mut mapper = HdrToneMapper::new(&HdrSettings::default());
        let mut queued = std::collections::VecDeque::new();
        let mut outputs = 0;
        for i in 0..8 {
            let pts = i * 33;
            let mut frame = frame::Video::new(Pixel::YUV420P10LE, 128, 72);
            frame.set_pts(Some(pts));
            // At the bound the frame is dropped and an earlier one may come out.
            if mapper.in_flight() < mapper.max_in_flight() {
                queued.push_back(pts);
            }
            match mapper.process(&mut frame, Rational::new(1, 1000)) {
                ToneMapOutcome::Output(out) => {
                    assert_eq!(out.pts(), queued.pop_front());
                    outputs += 1;
                }
                ToneMapOutcome::NeedMore | ToneMapOutcome::Backpressure => {}
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert!(outputs > 0);
    }

    #[test]
    fn contradictory_metadata_does_not_break_graph() {
        ffmpeg::init().expect("ffmpeg init");
        if !tone_mapping_available() {
            eprintln!("Skipping: FFmpeg build lacks zscale/tonemap");
            return;
        }
        let mut mapper = HdrToneMapper::new(&HdrSettings::default());
        let mut frame = frame::Video::new(Pixel::YUV420P10LE, 128, 72);
        frame.set_pts(Some(0));
        frame.set_color_primaries(Primaries::BT709);
        frame.set_color_transfer_characteristic(TransferCharacteristic::Linear);
        frame.set_color_range(Range::JPEG);
        let outcome = mapper.process(&mut frame, Rational::new(1, 1000));
        assert!(matches!(
            outcome,
            ToneMapOutcome::Output(_) | ToneMapOutcome::NeedMore
        ));
    }

    #[test]
    fn full_graph_applies_backpressure_before_cloning() {
        let mut mapper = HdrToneMapper::new(&HdrSettings::default());
        for _ in 0..mapper.max_in_flight() {
            mapper.in_flight.increment();
        }
        ffmpeg::init().expect("ffmpeg init");
        let mut frame = frame::Video::new(Pixel::YUV420P10LE, 64, 64);
        assert!(matches!(
            mapper.process(&mut frame, Rational::new(1, 1000)),
            ToneMapOutcome::Backpressure
        ));
        assert!(!mapper.is_configured());
    }
}
