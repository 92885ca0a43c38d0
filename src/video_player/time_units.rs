// SPDX-License-Identifier: MPL-2.0
//! Time unit conversion utilities for video playback.
//!
//! The pipeline keeps timestamps in three units:
//! - stream ticks (`i64`, in the stream's time base) as produced by FFmpeg
//! - seconds (`f64`) for clock and sync arithmetic
//! - milliseconds (`i64`) for the observable position and duration

use ffmpeg_next::Rational;

/// Microseconds per second as f64 for calculations.
pub const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Milliseconds per second as f64 for calculations.
pub const MILLIS_PER_SECOND: f64 = 1_000.0;

/// Converts seconds to microseconds.
///
/// # Examples
///
/// ```
/// use vidlens::video_player::time_units::secs_to_micros;
///
/// assert_eq!(secs_to_micros(1.0), 1_000_000.0);
/// assert_eq!(secs_to_micros(0.5), 500_000.0);
/// ```
#[inline]
pub fn secs_to_micros(secs: f64) -> f64 {
    secs * MICROS_PER_SECOND
}

/// Converts microseconds to seconds.
///
/// # Examples
///
/// ```
/// use vidlens::video_player::time_units::micros_to_secs;
///
/// assert_eq!(micros_to_secs(1_000_000.0), 1.0);
/// ```
#[inline]
pub fn micros_to_secs(micros: f64) -> f64 {
    micros / MICROS_PER_SECOND
}

/// Converts seconds to whole milliseconds, rounding to nearest.
///
/// # Examples
///
/// ```
/// use vidlens::video_player::time_units::secs_to_millis;
///
/// assert_eq!(secs_to_millis(1.5), 1500);
/// assert_eq!(secs_to_millis(0.0004), 0);
/// ```
#[inline]
pub fn secs_to_millis(secs: f64) -> i64 {
    (secs * MILLIS_PER_SECOND).round() as i64
}

/// Converts milliseconds to seconds.
#[inline]
pub fn millis_to_secs(millis: i64) -> f64 {
    millis as f64 / MILLIS_PER_SECOND
}

/// Converts a stream timestamp to seconds.
///
/// Returns `None` for a missing timestamp or a degenerate time base. A
/// timestamp of zero is valid.
///
/// # Examples
///
/// ```
/// use ffmpeg_next::Rational;
/// use vidlens::video_player::time_units::ticks_to_secs;
///
/// assert_eq!(ticks_to_secs(Some(90_000), Rational::new(1, 90_000)), Some(1.0));
/// assert_eq!(ticks_to_secs(None, Rational::new(1, 1000)), None);
/// ```
#[inline]
pub fn ticks_to_secs(ticks: Option<i64>, time_base: Rational) -> Option<f64> {
    let ticks = ticks?;
    if time_base.denominator() == 0 || time_base.numerator() == 0 {
        return None;
    }
    Some(ticks as f64 * f64::from(time_base.numerator()) / f64::from(time_base.denominator()))
}

/// Frame duration from an average frame rate, `None` when the rate is unknown.
#[inline]
pub fn frame_duration_secs(avg_frame_rate: Rational) -> Option<f64> {
    if avg_frame_rate.numerator() <= 0 || avg_frame_rate.denominator() <= 0 {
        return None;
    }
    Some(f64::from(avg_frame_rate.denominator()) / f64::from(avg_frame_rate.numerator()))
}
