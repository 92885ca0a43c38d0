// SPDX-License-Identifier: MPL-2.0
//! `vidlens` is a hardware-accelerated video decode-and-present pipeline.
//!
//! It decodes with FFmpeg on a dedicated thread, tone maps HDR sources to SDR,
//! plays audio through cpal and paces video against the audio clock. Frames
//! are handed to a renderer through a single presentation slot.

#![doc(html_root_url = "https://docs.rs/vidlens/0.1.0")]

pub mod config;
pub mod error;
pub mod logging;
pub mod video_player;
