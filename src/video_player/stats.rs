// SPDX-License-Identifier: MPL-2.0
//! Presentation counters shared with the facade.

use std::sync::atomic::{AtomicU64, Ordering};

/// Why a decoded video frame did not reach the presentation slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Behind the master clock by more than the late-drop threshold.
    Late,
    /// The presentation slot was still occupied.
    SlotBusy,
    /// Before the seek target, held for audio, or from a superseded seek.
    Seek,
    /// Invalid geometry or planes, or a failed transfer or conversion.
    Invalid,
    /// Refused or held back by the tone mapping graph.
    Filter,
}

/// Lock-free counters updated by the decode thread.
#[derive(Debug, Default)]
pub struct PlaybackStats {
    presented: AtomicU64,
    tone_mapped: AtomicU64,
    late: AtomicU64,
    slot_busy: AtomicU64,
    seek: AtomicU64,
    invalid: AtomicU64,
    filter: AtomicU64,
    audio_samples_dropped: AtomicU64,
}

/// Point-in-time copy of [`PlaybackStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub presented: u64,
    /// Frames that came out of the HDR tone mapping graph.
    pub tone_mapped: u64,
    pub late: u64,
    pub slot_busy: u64,
    pub seek: u64,
    pub invalid: u64,
    pub filter: u64,
    pub audio_samples_dropped: u64,
}

impl StatsSnapshot {
    pub fn dropped(&self) -> u64 {
        self.late + self.slot_busy + self.seek + self.invalid + self.filter
    }
}

impl PlaybackStats {
    pub fn record_presented(&self) {
        self.presented.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tone_mapped(&self) {
        self.tone_mapped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a dropped frame and returns how many frames were dropped for
    /// the same reason so far.
    pub fn record_drop(&self, reason: DropReason) -> u64 {
        let counter = match reason {
            DropReason::Late => &self.late,
            DropReason::SlotBusy => &self.slot_busy,
            DropReason::Seek => &self.seek,
            DropReason::Invalid => &self.invalid,
            DropReason::Filter => &self.filter,
        };
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn set_audio_samples_dropped(&self, samples: u64) {
        self.audio_samples_dropped.store(samples, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            presented: self.presented.load(Ordering::Relaxed),
            tone_mapped: self.tone_mapped.load(Ordering::Relaxed),
            late: self.late.load(Ordering::Relaxed),
            slot_busy: self.slot_busy.load(Ordering::Relaxed),
            seek: self.seek.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            filter: self.filter.load(Ordering::Relaxed),
            audio_samples_dropped: self.audio_samples_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_are_counted_per_reason() {
        let stats = PlaybackStats::default();
        assert_eq!(stats.record_drop(DropReason::Late), 1);
        assert_eq!(stats.record_drop(DropReason::Late), 2);
        stats.record_drop(DropReason::SlotBusy);
        stats.record_presented();
        stats.record_tone_mapped();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.tone_mapped, 1);
        assert_eq!(snapshot.late, 2);
        assert_eq!(snapshot.slot_busy, 1);
        assert_eq!(snapshot.presented, 1);
        assert_eq!(snapshot.dropped(), 3);
    }
}
