// SPDX-License-Identifier: MPL-2.0
//! Seek coordination between the facade and the decode thread.
//!
//! The facade only bumps the generation and records the target. The decode
//! thread notices the new generation, performs the demuxer seek and then arms
//! the per-stream pending flags itself, so a frame decoded before the seek can
//! never clear a gate meant for frames after it.

use crate::config::SEEK_TOLERANCE_SECS;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Observable phase of the seek state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekPhase {
    Idle,
    /// Requested by the facade, not yet picked up by the decode thread.
    Requested,
    /// Waiting for the first video frame at or after the target.
    DrainingVideo,
    /// Video settled, waiting for audio.
    DrainingAudio,
    Settled,
}

/// Result of checking a frame against the seek gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// No seek in progress for this stream.
    Pass,
    /// Frame is before the target (or has no pts); discard it.
    Discard,
    /// First frame at or after the target; the stream has settled.
    Settled,
}

/// Lock-free seek state shared by the facade and the decode thread.
#[derive(Debug, Default)]
pub struct SeekCoordinator {
    generation: AtomicU64,
    /// Generation the decode thread last acted on.
    handled: AtomicU64,
    target_ms: AtomicI64,
    video_pending: AtomicBool,
    audio_pending: AtomicBool,
    hold_video: AtomicBool,
    settled: AtomicBool,
}

impl SeekCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a seek request. Returns the new generation.
    pub fn request(&self, target_ms: i64) -> u64 {
        self.target_ms.store(target_ms.max(0), Ordering::Release);
        self.settled.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn target_ms(&self) -> i64 {
        self.target_ms.load(Ordering::Acquire)
    }

    pub fn target_secs(&self) -> f64 {
        self.target_ms() as f64 / 1000.0
    }

    /// Returns the pending generation if a request was not acted on yet.
    pub fn take_request(&self) -> Option<u64> {
        let generation = self.generation();
        let handled = self.handled.swap(generation, Ordering::AcqRel);
        (handled != generation).then_some(generation)
    }

    pub fn has_pending_request(&self) -> bool {
        self.handled.load(Ordering::Acquire) != self.generation()
    }

    /// Arms the gates after the demuxer seek. Called by the decode thread only.
    pub fn begin(&self, has_audio: bool) {
        self.video_pending.store(true, Ordering::Release);
        self.audio_pending.store(has_audio, Ordering::Release);
        self.hold_video.store(has_audio, Ordering::Release);
        self.settled.store(false, Ordering::Release);
    }

    /// Drops every gate, e.g. when the session closes.
    pub fn cancel(&self) {
        self.video_pending.store(false, Ordering::Release);
        self.audio_pending.store(false, Ordering::Release);
        self.hold_video.store(false, Ordering::Release);
        self.handled.store(self.generation(), Ordering::Release);
    }

    pub fn is_video_pending(&self) -> bool {
        self.video_pending.load(Ordering::Acquire)
    }

    pub fn is_audio_pending(&self) -> bool {
        self.audio_pending.load(Ordering::Acquire)
    }

    /// True while video must wait for audio to settle.
    pub fn is_holding_video(&self) -> bool {
        if !self.hold_video.load(Ordering::Acquire) {
            return false;
        }
        if self.is_audio_pending() {
            return true;
        }
        self.hold_video.store(false, Ordering::Release);
        false
    }

    /// Releases the hold without audio, e.g. when the audio device failed.
    pub fn release_audio(&self) {
        self.audio_pending.store(false, Ordering::Release);
        self.hold_video.store(false, Ordering::Release);
        self.update_settled();
    }

    fn passes_target(&self, pts: Option<f64>) -> bool {
        pts.is_some_and(|pts| pts + SEEK_TOLERANCE_SECS >= self.target_secs())
    }

    fn update_settled(&self) {
        if !self.is_video_pending() && !self.is_audio_pending() {
            self.settled.store(true, Ordering::Release);
        }
    }

    /// Gates a decoded video frame.
    pub fn admit_video(&self, pts: Option<f64>) -> Admission {
        if !self.is_video_pending() {
            return Admission::Pass;
        }
        if !self.passes_target(pts) {
            return Admission::Discard;
        }
        self.video_pending.store(false, Ordering::Release);
        self.update_settled();
        Admission::Settled
    }

    /// Gates a decoded audio frame.
    pub fn admit_audio(&self, pts: Option<f64>) -> Admission {
        if !self.is_audio_pending() {
            return Admission::Pass;
        }
        if !self.passes_target(pts) {
            return Admission::Discard;
        }
        self.audio_pending.store(false, Ordering::Release);
        self.update_settled();
        Admission::Settled
    }

    pub fn phase(&self) -> SeekPhase {
        if self.has_pending_request() {
            SeekPhase::Requested
        } else if self.is_video_pending() {
            SeekPhase::DrainingVideo
        } else if self.is_audio_pending() {
            SeekPhase::DrainingAudio
        } else if self.settled.load(Ordering::Acquire) {
            SeekPhase::Settled
        } else {
            SeekPhase::Idle
        }
    }
}
