// SPDX-License-Identifier: MPL-2.0
//! Playback state and observable player properties.
//!
//! The presentation side reads properties through [`ObservableState`] getters
//! and listens for [`PlayerEvent`]s. Setters compare before writing so that an
//! event is emitted exactly once per actual change and never for a no-op.

use super::volume::Volume;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// Capacity of the event channel. Slow subscribers observe `Lagged` instead of
/// blocking the decode thread.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Playback state visible to the presentation side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// No playback. Initial state, and the state after stop or end of stream.
    #[default]
    Stopped,
    /// Actively decoding and presenting frames.
    Playing,
    /// Playback suspended at the current position.
    Paused,
}

impl PlaybackState {
    /// Returns true if the video is currently playing.
    pub fn is_playing(self) -> bool {
        matches!(self, Self::Playing)
    }

    /// Returns true if the video is paused.
    pub fn is_paused(self) -> bool {
        matches!(self, Self::Paused)
    }

    /// Returns true if the video is stopped.
    pub fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Change notifications emitted by the player.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    SourceChanged(Option<PathBuf>),
    PositionChanged(i64),
    DurationChanged(i64),
    StateChanged(PlaybackState),
    SeekableChanged(bool),
    /// Dimensions of the presented frames changed.
    SizeChanged { width: u32, height: u32 },
    VolumeChanged(f32),
    MutedChanged(bool),
    /// Playback reached the end of the stream.
    EndOfStream,
    /// A fatal session error or a persistent device failure.
    Error(String),
}

#[derive(Debug, Clone, Default)]
struct Properties {
    source: Option<PathBuf>,
    duration_ms: i64,
    state: PlaybackState,
    seekable: bool,
    size: Option<(u32, u32)>,
    volume: Volume,
    muted: bool,
}

/// Observable player properties shared between the facade and the decode thread.
#[derive(Debug)]
pub struct ObservableState {
    properties: Mutex<Properties>,
    position_ms: AtomicI64,
    events: broadcast::Sender<PlayerEvent>,
}

impl Default for ObservableState {
    fn default() -> Self {
        Self::new(Volume::default(), false)
    }
}

impl ObservableState {
    #[must_use]
    pub fn new(volume: Volume, muted: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            properties: Mutex::new(Properties {
                volume,
                muted,
                ..Properties::default()
            }),
            position_ms: AtomicI64::new(0),
            events,
        }
    }

    /// Subscribes to future change events.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    fn properties(&self) -> MutexGuard<'_, Properties> {
        self.properties
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PlayerEvent) {
        // No subscriber is not an error.
        let _ = self.events.send(event);
    }

    /// Applies `update` under the lock and emits the returned event, if any,
    /// after the lock is released.
    fn update(&self, update: impl FnOnce(&mut Properties) -> Option<PlayerEvent>) -> bool {
        let event = {
            let mut props = self.properties();
            update(&mut props)
        };
        match event {
            Some(event) => {
                self.emit(event);
                true
            }
            None => false,
        }
    }

    pub fn source(&self) -> Option<PathBuf> {
        self.properties().source.clone()
    }

    pub fn set_source(&self, source: Option<PathBuf>) -> bool {
        self.update(|p| {
            if p.source == source {
                return None;
            }
            p.source.clone_from(&source);
            Some(PlayerEvent::SourceChanged(source))
        })
    }

    /// Current position in milliseconds. Lock-free.
    pub fn position_ms(&self) -> i64 {
        self.position_ms.load(Ordering::Acquire)
    }

    /// Publishes a new position. Negative values are clamped to zero.
    pub fn set_position_ms(&self, ms: i64) -> bool {
        let ms = ms.max(0);
        let previous = self.position_ms.swap(ms, Ordering::AcqRel);
        if previous == ms {
            return false;
        }
        self.emit(PlayerEvent::PositionChanged(ms));
        true
    }

    pub fn duration_ms(&self) -> i64 {
        self.properties().duration_ms
    }

    pub fn set_duration_ms(&self, ms: i64) -> bool {
        let ms = ms.max(0);
        self.update(|p| {
            if p.duration_ms == ms {
                return None;
            }
            p.duration_ms = ms;
            Some(PlayerEvent::DurationChanged(ms))
        })
    }

    pub fn state(&self) -> PlaybackState {
        self.properties().state
    }

    pub fn set_state(&self, state: PlaybackState) -> bool {
        self.update(|p| {
            if p.state == state {
                return None;
            }
            p.state = state;
            Some(PlayerEvent::StateChanged(state))
        })
    }

    pub fn is_seekable(&self) -> bool {
        self.properties().seekable
    }

    pub fn set_seekable(&self, seekable: bool) -> bool {
        self.update(|p| {
            if p.seekable == seekable {
                return None;
            }
            p.seekable = seekable;
            Some(PlayerEvent::SeekableChanged(seekable))
        })
    }

    /// Dimensions of the last presented frame.
    pub fn size(&self) -> Option<(u32, u32)> {
        self.properties().size
    }

    pub fn set_size(&self, width: u32, height: u32) -> bool {
        self.update(|p| {
            if p.size == Some((width, height)) {
                return None;
            }
            p.size = Some((width, height));
            Some(PlayerEvent::SizeChanged { width, height })
        })
    }

    /// Forgets the frame size without emitting, so the next session reports its own.
    pub fn clear_size(&self) {
        self.properties().size = None;
    }

    pub fn volume(&self) -> Volume {
        self.properties().volume
    }

    pub fn set_volume(&self, volume: Volume) -> bool {
        self.update(|p| {
            if (p.volume.value() - volume.value()).abs() < f32::EPSILON {
                return None;
            }
            p.volume = volume;
            Some(PlayerEvent::VolumeChanged(volume.value()))
        })
    }

    pub fn is_muted(&self) -> bool {
        self.properties().muted
    }

    pub fn set_muted(&self, muted: bool) -> bool {
        self.update(|p| {
            if p.muted == muted {
                return None;
            }
            p.muted = muted;
            Some(PlayerEvent::MutedChanged(muted))
        })
    }

    pub fn notify_end_of_stream(&self) {
        self.emit(PlayerEvent::EndOfStream);
    }

    pub fn notify_error(&self, message: impl Into<String>) {
        self.emit(PlayerEvent::Error(message.into()));
    }
}
