// SPDX-License-Identifier: MPL-2.0
//! Audio/Video synchronization for media playback.
//!
//! Audio is the master clock whenever an audio stream exists, its base is set
//! and the device is active. Otherwise a wall clock anchored on a video frame
//! takes over.
//!
//! # Synchronization Strategy
//!
//! Every decoded video frame is compared against the master clock:
//!
//! ```text
//!   delay = video_pts - master
//!
//!   delay < -late_drop (outside grace)  -> drop before any transform work
//!   delay > early_sleep                 -> sleep one frame, then present
//!   delay < -catch_up                   -> present, re-anchor once per epoch
//!   otherwise                           -> present
//! ```
//!
//! The grace window after play, resume and seek never drops, so a clock that
//! initializes slightly ahead of video cannot prevent playback from starting.

use super::audio_output::{samples_to_usecs, AudioSink};
use super::time_units::{micros_to_secs, millis_to_secs};
use crate::config::{SyncSettings, FALLBACK_FRAME_DURATION_SECS};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Reference instant for the monotonic clock. All readings are relative to it.
static REFERENCE_INSTANT: OnceLock<Instant> = OnceLock::new();

/// Source of monotonic time for the decode thread.
pub trait TimeSource: Send + Sync {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;

    /// Suspends the caller for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Real monotonic time.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl TimeSource for MonotonicClock {
    fn now(&self) -> Duration {
        let reference = REFERENCE_INSTANT.get_or_init(Instant::now);
        Instant::now().duration_since(*reference)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Manually driven time. Sleeping advances the clock instead of blocking.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now_us: AtomicU64,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn advance(&self, duration: Duration) {
        self.now_us
            .fetch_add(duration.as_micros() as u64, Ordering::AcqRel);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Duration {
        Duration::from_micros(self.now_us.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Sync thresholds in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncThresholds {
    pub late_drop: f64,
    pub early_sleep: f64,
    pub grace_window: f64,
    pub catch_up: f64,
}

impl Default for SyncThresholds {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for SyncThresholds {
    fn from(settings: &SyncSettings) -> Self {
        let settings = settings.sanitized();
        Self {
            late_drop: millis_to_secs(i64::from(settings.late_drop_ms)),
            early_sleep: millis_to_secs(i64::from(settings.early_sleep_ms)),
            grace_window: millis_to_secs(i64::from(settings.grace_window_ms)),
            catch_up: millis_to_secs(i64::from(settings.catch_up_ms)),
        }
    }
}

/// What to do with a decoded video frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncDecision {
    /// Too late; discard before any transform or copy work.
    Drop,
    /// Present the frame, optionally pacing first and re-anchoring the clock.
    Present {
        sleep: Option<Duration>,
        rebase: bool,
    },
}

/// Decides the fate of a frame that is `delay` seconds ahead of the master
/// clock (negative when behind).
pub fn decide(
    delay: f64,
    in_grace: bool,
    rebase_available: bool,
    frame_duration: f64,
    thresholds: &SyncThresholds,
) -> SyncDecision {
    if !in_grace && delay < -thresholds.late_drop {
        return SyncDecision::Drop;
    }

    let sleep = (delay > thresholds.early_sleep).then(|| {
        let secs = if frame_duration.is_finite() && frame_duration > 0.0 {
            frame_duration
        } else {
            FALLBACK_FRAME_DURATION_SECS
        };
        Duration::from_secs_f64(secs)
    });

    let behind = delay < -thresholds.catch_up || (in_grace && delay < -thresholds.late_drop);
    SyncDecision::Present {
        sleep,
        rebase: rebase_available && behind,
    }
}

/// Clock state owned by the decode thread.
#[derive(Debug, Default, Clone)]
pub struct ClockState {
    audio_base: Option<f64>,
    processed_snapshot_us: i64,
    /// Highest audio clock value returned since the base was last set.
    audio_high_water: Option<f64>,
    start_pts: Option<f64>,
    start_time: Duration,
    epoch_start: Option<Duration>,
    rebased_in_epoch: bool,
    paused_at: Option<Duration>,
}

impl ClockState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets every anchor. Used on open, seek and restart.
    pub fn reset(&mut self) {
        *self = Self {
            epoch_start: self.epoch_start,
            ..Self::default()
        };
    }

    pub fn audio_base(&self) -> Option<f64> {
        self.audio_base
    }

    /// Sets the audio base and snapshots the device's processed counter.
    pub fn set_audio_base(&mut self, pts: f64, processed_usecs: i64) {
        self.audio_base = Some(pts);
        self.processed_snapshot_us = processed_usecs;
        self.audio_high_water = None;
    }

    pub fn clear_audio_base(&mut self) {
        self.audio_base = None;
        self.audio_high_water = None;
    }

    pub fn is_video_anchored(&self) -> bool {
        self.start_pts.is_some()
    }

    /// Anchors the wall clock so that `pts` corresponds to `now`.
    pub fn anchor_video(&mut self, pts: f64, now: Duration) {
        self.start_pts = Some(pts);
        self.start_time = now;
    }

    /// Audible audio position: base plus consumed time minus queued audio.
    pub fn audio_clock(&mut self, sink: &dyn AudioSink) -> Option<f64> {
        let base = self.audio_base?;
        let format = sink.format();
        let capacity = sink.capacity_samples();
        let free = sink.free_samples().min(capacity);
        let queued_us = samples_to_usecs(format, (capacity - free) as u64);
        let delta_us = (sink.processed_usecs() - self.processed_snapshot_us).max(0);

        let mut clock = base + micros_to_secs((delta_us - queued_us) as f64);
        if let Some(high_water) = self.audio_high_water {
            clock = clock.max(high_water);
        }
        self.audio_high_water = Some(clock);
        Some(clock)
    }

    /// Wall clock: anchor pts plus time elapsed since the anchor.
    pub fn wall_clock(&self, now: Duration) -> Option<f64> {
        let start_pts = self.start_pts?;
        let elapsed = now.saturating_sub(self.start_time);
        Some(start_pts + elapsed.as_secs_f64())
    }

    /// The audio clock when it is usable, else the wall clock.
    pub fn master_clock(&mut self, sink: Option<&dyn AudioSink>, now: Duration) -> Option<f64> {
        if let Some(sink) = sink.filter(|sink| sink.is_active()) {
            if let Some(clock) = self.audio_clock(sink) {
                return Some(clock);
            }
        }
        self.wall_clock(now)
    }

    /// Starts a new timing epoch: the grace window restarts and one rebase is
    /// available again.
    pub fn start_epoch(&mut self, now: Duration) {
        self.epoch_start = Some(now);
        self.rebased_in_epoch = false;
    }

    pub fn in_grace(&self, now: Duration, thresholds: &SyncThresholds) -> bool {
        self.epoch_start
            .is_some_and(|start| now.saturating_sub(start).as_secs_f64() < thresholds.grace_window)
    }

    pub fn rebase_available(&self) -> bool {
        !self.rebased_in_epoch
    }

    /// Re-anchors the wall clock on a frame that fell behind. Counts as the
    /// epoch's single rebase.
    pub fn rebase(&mut self, pts: f64, now: Duration) {
        self.anchor_video(pts, now);
        self.rebased_in_epoch = true;
    }

    pub fn pause(&mut self, now: Duration) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    /// Shifts the wall anchor by the paused duration and starts a new epoch.
    pub fn resume(&mut self, now: Duration) {
        if let Some(paused_at) = self.paused_at.take() {
            self.start_time += now.saturating_sub(paused_at);
        }
        self.start_epoch(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video_player::audio::AudioFormat;

    struct FixedSink {
        capacity: usize,
        free: usize,
        processed_us: i64,
        active: bool,
    }

    impl AudioSink for FixedSink {
        fn format(&self) -> AudioFormat {
            AudioFormat {
                sample_rate: 1_000,
                channels: 1,
            }
        }
        fn capacity_samples(&self) -> usize {
            self.capacity
        }
        fn free_samples(&self) -> usize {
            self.free
        }
        fn write(&mut self, _samples: &[f32]) -> usize {
            0
        }
        fn processed_usecs(&self) -> i64 {
            self.processed_us
        }
        fn is_active(&self) -> bool {
            self.active
        }
        fn clear(&mut self) {}
        fn suspend(&mut self) {}
        fn resume(&mut self) {}
    }

    fn sink(processed_ms: i64, queued_ms: usize) -> FixedSink {
        // 1 kHz mono: one sample per millisecond.
        FixedSink {
            capacity: 500,
            free: 500 - queued_ms,
            processed_us: processed_ms * 1_000,
            active: true,
        }
    }

    const FRAME: f64 = 1.0 / 30.0;

    #[test]
    fn thresholds_default_to_configured_values() {
        let thresholds = SyncThresholds::default();
        assert!((thresholds.late_drop - 0.3).abs() < 1e-9);
        assert!((thresholds.early_sleep - 0.2).abs() < 1e-9);
        assert!((thresholds.grace_window - 0.5).abs() < 1e-9);
        assert!((thresholds.catch_up - 0.2).abs() < 1e-9);
    }

    #[test]
    fn on_time_frame_is_presented_without_sleep() {
        let decision = decide(0.05, false, true, FRAME, &SyncThresholds::default());
        assert_eq!(
            decision,
            SyncDecision::Present {
                sleep: None,
                rebase: false
            }
        );
    }

    #[test]
    fn very_late_frame_is_dropped_outside_grace() {
        let decision = decide(-0.4, false, true, FRAME, &SyncThresholds::default());
        assert_eq!(decision, SyncDecision::Drop);
    }

    #[test]
    fn very_late_frame_is_kept_inside_grace_and_rebases() {
        let decision = decide(-0.4, true, true, FRAME, &SyncThresholds::default());
        assert_eq!(
            decision,
            SyncDecision::Present {
                sleep: None,
                rebase: true
            }
        );
    }

    #[test]
    fn early_frame_sleeps_one_frame() {
        let decision = decide(0.25, false, true, FRAME, &SyncThresholds::default());
        assert_eq!(
            decision,
            SyncDecision::Present {
                sleep: Some(Duration::from_secs_f64(FRAME)),
                rebase: false
            }
        );
    }

    #[test]
    fn unknown_frame_rate_sleeps_fallback_duration() {
        let decision = decide(1.0, false, true, 0.0, &SyncThresholds::default());
        assert_eq!(
            decision,
            SyncDecision::Present {
                sleep: Some(Duration::from_secs_f64(FALLBACK_FRAME_DURATION_SECS)),
                rebase: false
            }
        );
    }

    #[test]
    fn behind_frame_rebases_only_when_available() {
        let thresholds = SyncThresholds::default();
        assert_eq!(
            decide(-0.25, false, true, FRAME, &thresholds),
            SyncDecision::Present {
                sleep: None,
                rebase: true
            }
        );
        assert_eq!(
            decide(-0.25, false, false, FRAME, &thresholds),
            SyncDecision::Present {
                sleep: None,
                rebase: false
            }
        );
    }

    #[test]
    fn wall_clock_follows_anchor() {
        let mut clock = ClockState::new();
        assert_eq!(clock.wall_clock(Duration::from_secs(1)), None);
        clock.anchor_video(2.0, Duration::from_secs(10));
        let now = Duration::from_millis(10_500);
        assert!((clock.wall_clock(now).unwrap_or_default() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn audio_clock_subtracts_queued_audio() {
        let mut clock = ClockState::new();
        clock.set_audio_base(5.0, 1_000_000);

        // 400 ms accepted since the snapshot, 100 ms still queued.
        let value = clock.audio_clock(&sink(1_400, 100)).unwrap_or_default();
        assert!((value - 5.3).abs() < 1e-6, "clock was {value}");
    }

    #[test]
    fn audio_clock_ignores_counter_going_backwards() {
        let mut clock = ClockState::new();
        clock.set_audio_base(1.0, 2_000_000);
        let value = clock.audio_clock(&sink(1_000, 0)).unwrap_or_default();
        assert!((value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn audio_clock_is_monotonic_until_rebased() {
        let mut clock = ClockState::new();
        clock.set_audio_base(0.0, 0);

        let first = clock.audio_clock(&sink(300, 0)).unwrap_or_default();
        // The device reports more free space than before; queued grows.
        let second = clock.audio_clock(&sink(300, 200)).unwrap_or_default();
        assert!(second >= first);

        // A new base after a seek may move the clock backwards.
        clock.set_audio_base(0.0, 300_000);
        let rebased = clock.audio_clock(&sink(300, 0)).unwrap_or_default();
        assert!(rebased < first);
    }

    #[test]
    fn free_space_beyond_capacity_is_clamped() {
        let mut clock = ClockState::new();
        clock.set_audio_base(1.0, 0);
        let mut broken = sink(100, 0);
        broken.free = 10_000;
        let value = clock.audio_clock(&broken).unwrap_or_default();
        assert!((value - 1.1).abs() < 1e-6);
    }

    #[test]
    fn master_clock_falls_back_to_wall_clock() {
        let mut clock = ClockState::new();
        clock.anchor_video(3.0, Duration::ZERO);
        clock.set_audio_base(10.0, 0);

        let mut inactive = sink(0, 0);
        inactive.active = false;
        let now = Duration::from_secs(1);
        assert_eq!(clock.master_clock(Some(&inactive), now), Some(4.0));
        assert_eq!(clock.master_clock(None, now), Some(4.0));
        assert_eq!(clock.master_clock(Some(&sink(0, 0)), now), Some(10.0));
    }

    #[test]
    fn one_rebase_per_epoch() {
        let mut clock = ClockState::new();
        clock.start_epoch(Duration::ZERO);
        assert!(clock.rebase_available());
        clock.rebase(1.0, Duration::from_secs(1));
        assert!(!clock.rebase_available());
        clock.start_epoch(Duration::from_secs(2));
        assert!(clock.rebase_available());
    }

    #[test]
    fn grace_window_starts_with_epoch() {
        let thresholds = SyncThresholds::default();
        let mut clock = ClockState::new();
        assert!(!clock.in_grace(Duration::ZERO, &thresholds));
        clock.start_epoch(Duration::from_secs(1));
        assert!(clock.in_grace(Duration::from_millis(1_400), &thresholds));
        assert!(!clock.in_grace(Duration::from_millis(1_600), &thresholds));
    }

    #[test]
    fn resume_shifts_wall_anchor_by_pause() {
        let mut clock = ClockState::new();
        clock.anchor_video(0.0, Duration::ZERO);
        clock.pause(Duration::from_secs(1));
        clock.resume(Duration::from_secs(4));
        let value = clock.wall_clock(Duration::from_secs(5)).unwrap_or_default();
        assert!((value - 2.0).abs() < 1e-9);
    }

    #[test]
    fn manual_time_source_advances_on_sleep() {
        let time = ManualTimeSource::new();
        time.sleep(Duration::from_millis(30));
        time.advance(Duration::from_millis(20));
        assert_eq!(time.now(), Duration::from_millis(50));
    }
}
