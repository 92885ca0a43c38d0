// SPDX-License-Identifier: MPL-2.0
//! Volume domain type for audio playback.
//!
//! This module provides a type-safe wrapper for volume values,
//! ensuring they are always within the valid range (0.0–1.0).

use crate::config::{DEFAULT_VOLUME, MAX_VOLUME, MIN_VOLUME};

/// Volume level, guaranteed to be within valid range (0.0–1.0).
///
/// # Example
///
/// ```
/// use vidlens::video_player::Volume;
///
/// let vol = Volume::new(0.5);
/// assert_eq!(vol.value(), 0.5);
///
/// // Values outside range are clamped
/// let too_loud = Volume::new(2.0);
/// assert_eq!(too_loud.value(), 1.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Volume(f32);

impl Volume {
    /// Creates a new volume level, clamping to valid range. NaN maps to the minimum.
    #[must_use]
    pub fn new(volume: f32) -> Self {
        if volume.is_nan() {
            return Self(MIN_VOLUME);
        }
        Self(volume.clamp(MIN_VOLUME, MAX_VOLUME))
    }

    /// Returns the volume value as f32.
    #[must_use]
    pub fn value(self) -> f32 {
        self.0
    }

    /// Bit pattern for storage in an `AtomicU32`.
    #[must_use]
    pub fn to_bits(self) -> u32 {
        self.0.to_bits()
    }

    /// Restores a volume stored with [`Volume::to_bits`].
    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        Self::new(f32::from_bits(bits))
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self(DEFAULT_VOLUME)
    }
}
