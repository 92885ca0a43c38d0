// SPDX-License-Identifier: MPL-2.0
//! Video playback engine.
//!
//! FFmpeg demuxes and decodes on a dedicated decode thread, using hardware
//! surfaces when a device is available. HDR frames are tone mapped to SDR
//! through a filter graph, audio is resampled into a cpal ring buffer, and
//! video is paced against the audio clock (or a wall clock when there is no
//! audio). Presentable frames are handed to the renderer through a single
//! slot: while a frame is waiting to be taken, newer frames are dropped.

pub mod audio;
pub mod audio_output;
pub mod backend;
mod decoder;
pub mod failure_run;
pub mod handoff;
pub mod hdr_filter;
pub mod hw_surface;
mod player;
pub mod seek;
pub mod session;
pub mod simulated;
mod state;
pub mod stats;
pub mod sync;
pub mod time_units;
mod volume;

pub use audio::{negotiate_output_format, AudioFormat};
pub use decoder::{DecodeLoop, DecodePhase, StepOutcome};
pub use failure_run::{FailureReport, FailureRun};
pub use handoff::{FrameData, FrameFormat, FrameSink, Plane, PresentedFrame, SurfaceFrame, SurfaceHandle};
pub use hw_surface::{negotiate_pixel_format, negotiate_surface_format, SurfacePolicy};
pub use player::VideoPlayer;
pub use state::{PlaybackState, PlayerEvent};
pub use stats::{DropReason, StatsSnapshot};
pub use sync::{decide, SyncDecision, SyncThresholds};
pub use volume::Volume;
