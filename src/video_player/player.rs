// SPDX-License-Identifier: MPL-2.0
//! Player facade.
//!
//! [`VideoPlayer`] is the only type callers need: it owns the decode thread,
//! forwards commands to it and exposes the observable properties. Every
//! method returns immediately; effects show up as property changes and
//! [`PlayerEvent`]s.

use super::audio_output::{AudioControl, AudioHost, CpalHost};
use super::backend::{BackendFactory, MediaBackend};
use super::decoder::{Command, DecodeLoop, Shared};
use super::handoff::{FrameSink, PresentedFrame};
use super::session::MediaSession;
use super::state::{ObservableState, PlaybackState, PlayerEvent};
use super::stats::StatsSnapshot;
use super::sync::{MonotonicClock, TimeSource};
use super::volume::Volume;
use crate::config::{self, PlayerConfig};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::broadcast;

const DECODE_THREAD_NAME: &str = "vidlens-decode";

/// Hardware-accelerated video player.
pub struct VideoPlayer {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl VideoPlayer {
    /// Creates a player that decodes with FFmpeg and plays audio on the
    /// default cpal device.
    ///
    /// # Errors
    ///
    /// Returns an error if the decode thread cannot be spawned.
    /// Volume and mute changes are saved to the default settings file.
    pub fn new(config: PlayerConfig) -> Result<Self> {
        let factory: BackendFactory = Box::new(|path: &Path, config: &PlayerConfig| {
            Ok(Box::new(MediaSession::open(path, config)?) as Box<dyn MediaBackend>)
        });
        let (player, mut decode) = Self::with_parts(
            config,
            factory,
            Box::new(CpalHost::new()),
            Arc::new(MonotonicClock),
        );
        if let Some(path) = config::default_config_path() {
            decode.persist_settings_to(path);
        }
        player.start(decode)
    }

    /// Creates a player around custom parts and runs its loop on a thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the decode thread cannot be spawned.
    pub fn spawn_with(
        config: PlayerConfig,
        factory: BackendFactory,
        host: Box<dyn AudioHost>,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        let (player, decode) = Self::with_parts(config, factory, host, time);
        player.start(decode)
    }

    fn start(mut self, decode: DecodeLoop) -> Result<Self> {
        let thread = std::thread::Builder::new()
            .name(DECODE_THREAD_NAME.to_string())
            .spawn(move || decode.run())
            .map_err(|e| Error::Io(format!("Failed to spawn decode thread: {e}")))?;
        self.thread = Some(thread);
        Ok(self)
    }

    /// Creates a player and returns its decode loop without starting a
    /// thread, so the caller can step it deterministically.
    pub fn with_parts(
        config: PlayerConfig,
        factory: BackendFactory,
        host: Box<dyn AudioHost>,
        time: Arc<dyn TimeSource>,
    ) -> (Self, DecodeLoop) {
        let volume = Volume::new(config.volume);
        let control = Arc::new(AudioControl::new(volume, config.muted));
        let shared = Arc::new(Shared::new(
            ObservableState::new(volume, config.muted),
            control,
        ));
        let decode = DecodeLoop::new(Arc::clone(&shared), config, factory, host, time);
        (
            Self {
                shared,
                thread: None,
            },
            decode,
        )
    }

    /// Opens a new source. The previous session is closed first; playback
    /// starts only if play was requested.
    pub fn set_source(&self, path: impl Into<PathBuf>) {
        self.shared.push(Command::Open(path.into()));
    }

    pub fn play(&self) {
        self.shared.push(Command::Play);
    }

    pub fn pause(&self) {
        self.shared.push(Command::Pause);
    }

    /// Stops playback and rewinds the reported position to zero.
    pub fn stop(&self) {
        self.shared.push(Command::Stop);
    }

    /// Requests a seek. Ignored for non-seekable sources; the target is
    /// clamped to the stream duration. The newest request wins.
    pub fn seek(&self, position_ms: i64) {
        let state = &self.shared.state;
        if !state.is_seekable() {
            tracing::debug!(position_ms, "seek ignored, source is not seekable");
            return;
        }
        let target = position_ms.clamp(0, state.duration_ms().max(0));
        let generation = self.shared.seek.request(target);
        state.set_position_ms(target);
        tracing::debug!(target, generation, "seek requested");
        self.shared.notify();
    }

    /// Sets the output volume, clamped to `[0, 1]`. Changes are persisted.
    pub fn set_volume(&self, volume: f32) {
        let volume = Volume::new(volume);
        self.shared.audio.set_volume(volume);
        if self.shared.state.set_volume(volume) {
            self.persist_audio();
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.shared.audio.set_muted(muted);
        if self.shared.state.set_muted(muted) {
            self.persist_audio();
        }
    }

    fn persist_audio(&self) {
        let state = &self.shared.state;
        self.shared.push(Command::PersistAudio {
            volume: state.volume().value(),
            muted: state.is_muted(),
        });
    }

    /// Size of the display surface, used to cap the HDR processing size.
    pub fn set_display_size(&self, size: Option<(u32, u32)>) {
        self.shared.push(Command::DisplaySize(size));
    }

    /// Registers the renderer notified whenever a frame is staged.
    pub fn set_frame_sink(&self, sink: Option<Arc<dyn FrameSink>>) {
        self.shared.slot.set_sink(sink);
    }

    /// Takes the staged frame, freeing the slot for the next one.
    pub fn take_pending_frame(&self) -> Option<PresentedFrame> {
        self.shared.slot.take()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.shared.state.subscribe()
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state.state()
    }

    pub fn position_ms(&self) -> i64 {
        self.shared.state.position_ms()
    }

    pub fn duration_ms(&self) -> i64 {
        self.shared.state.duration_ms()
    }

    pub fn source(&self) -> Option<PathBuf> {
        self.shared.state.source()
    }

    pub fn is_seekable(&self) -> bool {
        self.shared.state.is_seekable()
    }

    /// Size of the last presented frame.
    pub fn size(&self) -> Option<(u32, u32)> {
        self.shared.state.size()
    }

    pub fn volume(&self) -> f32 {
        self.shared.state.volume().value()
    }

    pub fn is_muted(&self) -> bool {
        self.shared.state.is_muted()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Drop for VideoPlayer {
    fn drop(&mut self) {
        self.shared.shutdown();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("decode thread panicked");
            }
        }
    }
}
