// SPDX-License-Identifier: MPL-2.0
//! Centralized default values for all configuration constants.
//!
//! This module serves as the single source of truth for default values
//! used across the player. Constants are organized by category.
//!
//! # Categories
//!
//! - **Volume**: Audio playback volume settings
//! - **Sync**: Late-drop, early-sleep, grace and catch-up thresholds
//! - **Seek**: Timestamp tolerance used when comparing against a seek target
//! - **HDR**: Filter graph backpressure and processing size ceiling
//! - **Audio Buffer**: Device ring buffer length and standard fallback rate
//! - **Diagnostics**: Consecutive failure thresholds

// ==========================================================================
// Volume Defaults
// ==========================================================================

/// Default playback volume (0.0 to 1.0).
pub const DEFAULT_VOLUME: f32 = 1.0;

/// Minimum volume level.
pub const MIN_VOLUME: f32 = 0.0;

/// Maximum volume level.
pub const MAX_VOLUME: f32 = 1.0;

// ==========================================================================
// Sync Defaults
// ==========================================================================

/// Frames later than this behind the master clock are dropped (milliseconds).
pub const DEFAULT_LATE_DROP_MS: u32 = 300;

/// Frames earlier than this ahead of the master clock pace the decode thread (milliseconds).
pub const DEFAULT_EARLY_SLEEP_MS: u32 = 200;

/// No frame is dropped during this window after play, resume or seek (milliseconds).
pub const DEFAULT_GRACE_WINDOW_MS: u32 = 500;

/// Frames behind by more than this may trigger the one-time clock re-base (milliseconds).
pub const DEFAULT_CATCH_UP_MS: u32 = 200;

/// Lower bound for every sync threshold (milliseconds).
pub const MIN_SYNC_THRESHOLD_MS: u32 = 10;

/// Upper bound for every sync threshold (milliseconds).
pub const MAX_SYNC_THRESHOLD_MS: u32 = 5_000;

/// Frame duration assumed when the stream does not report a frame rate (seconds).
pub const FALLBACK_FRAME_DURATION_SECS: f64 = 1.0 / 30.0;

// ==========================================================================
// Seek Defaults
// ==========================================================================

/// Tolerance when comparing a decoded timestamp with a seek target (seconds).
pub const SEEK_TOLERANCE_SECS: f64 = 0.0005;

// ==========================================================================
// HDR Defaults
// ==========================================================================

/// Default bound on frames pushed into the HDR filter graph but not yet pulled.
pub const DEFAULT_HDR_MAX_IN_FLIGHT: u32 = 2;

/// Minimum in-flight bound.
pub const MIN_HDR_MAX_IN_FLIGHT: u32 = 1;

/// Maximum in-flight bound.
pub const MAX_HDR_MAX_IN_FLIGHT: u32 = 8;

/// Width of the intermediate processing size ceiling for large HDR sources.
pub const DEFAULT_HDR_CEILING_WIDTH: u32 = 1920;

/// Height of the intermediate processing size ceiling for large HDR sources.
pub const DEFAULT_HDR_CEILING_HEIGHT: u32 = 1080;

// ==========================================================================
// Audio Buffer Defaults
// ==========================================================================

/// Default device ring buffer length (milliseconds).
pub const DEFAULT_AUDIO_BUFFER_MS: u32 = 750;

/// Minimum ring buffer length (milliseconds).
pub const MIN_AUDIO_BUFFER_MS: u32 = 100;

/// Maximum ring buffer length (milliseconds).
pub const MAX_AUDIO_BUFFER_MS: u32 = 4_000;

/// Standard sample rate tried when the input rate is not supported by the device.
pub const STANDARD_SAMPLE_RATE: u32 = 44_100;

/// Number of short free-space polls before an overflowing remainder is trimmed.
pub const MAX_FREE_SPACE_POLLS: u32 = 5;

/// Interval between free-space polls (milliseconds).
pub const FREE_SPACE_POLL_INTERVAL_MS: u64 = 5;

// ==========================================================================
// Diagnostics Defaults
// ==========================================================================

/// Consecutive failures logged individually before escalating to a warning.
pub const TRANSIENT_FAILURE_LOG_LIMIT: u32 = 3;

// ==========================================================================
// Compile-time Validation
// ==========================================================================

const _: () = {
    // Volume validation
    assert!(MIN_VOLUME >= 0.0);
    assert!(MAX_VOLUME > MIN_VOLUME);
    assert!(DEFAULT_VOLUME >= MIN_VOLUME);
    assert!(DEFAULT_VOLUME <= MAX_VOLUME);

    // Sync validation
    assert!(MIN_SYNC_THRESHOLD_MS > 0);
    assert!(MAX_SYNC_THRESHOLD_MS > MIN_SYNC_THRESHOLD_MS);
    assert!(DEFAULT_LATE_DROP_MS >= MIN_SYNC_THRESHOLD_MS);
    assert!(DEFAULT_LATE_DROP_MS <= MAX_SYNC_THRESHOLD_MS);
    assert!(DEFAULT_EARLY_SLEEP_MS >= MIN_SYNC_THRESHOLD_MS);
    assert!(DEFAULT_GRACE_WINDOW_MS <= MAX_SYNC_THRESHOLD_MS);
    assert!(DEFAULT_CATCH_UP_MS <= DEFAULT_LATE_DROP_MS);

    // HDR validation
    assert!(MIN_HDR_MAX_IN_FLIGHT > 0);
    assert!(MAX_HDR_MAX_IN_FLIGHT >= MIN_HDR_MAX_IN_FLIGHT);
    assert!(DEFAULT_HDR_MAX_IN_FLIGHT >= MIN_HDR_MAX_IN_FLIGHT);
    assert!(DEFAULT_HDR_MAX_IN_FLIGHT <= MAX_HDR_MAX_IN_FLIGHT);
    assert!(DEFAULT_HDR_CEILING_WIDTH > 0);
    assert!(DEFAULT_HDR_CEILING_HEIGHT > 0);

    // Audio buffer validation
    assert!(MIN_AUDIO_BUFFER_MS > 0);
    assert!(MAX_AUDIO_BUFFER_MS >= MIN_AUDIO_BUFFER_MS);
    assert!(DEFAULT_AUDIO_BUFFER_MS >= MIN_AUDIO_BUFFER_MS);
    assert!(DEFAULT_AUDIO_BUFFER_MS <= MAX_AUDIO_BUFFER_MS);
    assert!(STANDARD_SAMPLE_RATE > 0);

    assert!(TRANSIENT_FAILURE_LOG_LIMIT > 0);
};
