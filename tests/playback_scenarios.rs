// SPDX-License-Identifier: MPL-2.0
//! End-to-end playback scenarios on synthetic media.
//!
//! The decode loop is stepped by hand against a manual clock, so every run is
//! deterministic and needs neither media files nor audio hardware.

use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use vidlens::config::PlayerConfig;
use vidlens::video_player::simulated::{
    failing_factory, ColorTagging, DeviceList, ManualTimeSource, SimulatedAudioHost,
    SimulatedStream,
};
use vidlens::video_player::hdr_filter::tone_mapping_available;
use vidlens::video_player::{
    DecodeLoop, FrameFormat, PlaybackState, PlayerEvent, PresentedFrame, StepOutcome, VideoPlayer,
};

const MAX_STEPS: usize = 50_000;

struct Harness {
    player: VideoPlayer,
    decode: DecodeLoop,
    devices: DeviceList,
}

impl Harness {
    fn new(stream: SimulatedStream) -> Self {
        Self::with_host(stream, |host| host)
    }

    fn with_host(
        stream: SimulatedStream,
        configure: impl FnOnce(SimulatedAudioHost) -> SimulatedAudioHost,
    ) -> Self {
        let time = Arc::new(ManualTimeSource::new());
        let host = configure(SimulatedAudioHost::new(time.clone()));
        let devices = host.devices();
        let (player, decode) =
            VideoPlayer::with_parts(PlayerConfig::default(), stream.factory(), Box::new(host), time);
        Self {
            player,
            decode,
            devices,
        }
    }

    fn open_and_play(&mut self) {
        self.player.set_source("clip.mp4");
        self.player.play();
        self.decode.step();
    }

    /// Steps and consumes frames until `done` returns true for a step outcome.
    fn run_while(
        &mut self,
        mut done: impl FnMut(StepOutcome, &[PresentedFrame]) -> bool,
    ) -> Vec<PresentedFrame> {
        let mut frames = Vec::new();
        for _ in 0..MAX_STEPS {
            let outcome = self.decode.step();
            if let Some(frame) = self.player.take_pending_frame() {
                frames.push(frame);
            }
            if done(outcome, &frames) {
                return frames;
            }
        }
        panic!("scenario did not finish within {MAX_STEPS} steps");
    }

    fn run_to_end(&mut self) -> Vec<PresentedFrame> {
        self.run_while(|outcome, _| outcome == StepOutcome::EndOfStream)
    }

    fn run_frames(&mut self, count: usize) -> Vec<PresentedFrame> {
        self.run_while(|_, frames| frames.len() >= count)
    }
}

fn drain(events: &mut broadcast::Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
    let mut drained = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => drained.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => return drained,
        }
    }
}

#[test]
fn cold_open_plays_to_the_end() {
    let mut harness = Harness::new(SimulatedStream::default());
    let mut events = harness.player.subscribe();
    harness.open_and_play();
    assert_eq!(harness.player.state(), PlaybackState::Playing);
    assert_eq!(harness.player.duration_ms(), 10_000);

    let frames = harness.run_to_end();

    assert!(frames.len() > 250, "only {} frames presented", frames.len());
    assert!(frames.windows(2).all(|pair| pair[0].pts_secs < pair[1].pts_secs));
    assert!(frames.iter().all(|frame| frame.format == FrameFormat::Nv12));
    assert_eq!(harness.player.state(), PlaybackState::Stopped);
    assert_eq!(harness.player.position_ms(), 10_000);
    assert_eq!(harness.player.size(), Some((320, 240)));
    assert!(harness.devices.last().is_some_and(|device| !device.is_running()));

    // Stepping past the end must not repeat the end-of-stream transition.
    for _ in 0..10 {
        harness.decode.step();
    }
    let events = drain(&mut events);
    let ends = events
        .iter()
        .filter(|event| **event == PlayerEvent::EndOfStream)
        .count();
    let stops = events
        .iter()
        .filter(|event| **event == PlayerEvent::StateChanged(PlaybackState::Stopped))
        .count();
    assert_eq!(ends, 1);
    assert_eq!(stops, 1);
}

#[test]
fn video_waits_for_audio_before_the_first_frame() {
    let mut harness = Harness::new(SimulatedStream::default());
    harness.open_and_play();

    let frames = harness.run_frames(1);

    // The frame at zero is held back until audio settles.
    assert!(frames[0].pts_secs > 0.0);
    let device = harness.devices.last().expect("audio device opened");
    assert!(device.accepted_samples() > 0);
}

#[test]
fn seek_near_the_end_lands_on_target() {
    let mut harness = Harness::new(SimulatedStream::default());
    harness.open_and_play();
    harness.run_frames(10);

    harness.player.seek(9_500);
    assert_eq!(harness.player.position_ms(), 9_500);

    let frames = harness.run_to_end();
    assert!(!frames.is_empty());
    assert!(frames.iter().all(|frame| frame.pts_secs >= 9.5 - 0.001));
    assert_eq!(harness.player.position_ms(), 10_000);
    assert!(harness.player.stats().seek > 0);
}

#[test]
fn clock_never_runs_backwards_across_a_seek() {
    let mut harness = Harness::new(SimulatedStream::default());
    harness.open_and_play();
    harness.run_frames(30);
    assert!(harness.player.position_ms() > 0);

    harness.player.seek(5_000);
    let mut last: Option<i64> = None;
    let mut presented = 0;
    for _ in 0..MAX_STEPS {
        let outcome = harness.decode.step();
        let _ = harness.player.take_pending_frame();
        if outcome == StepOutcome::Presented {
            presented += 1;
        }
        if presented == 0 {
            continue;
        }
        let position = harness.player.position_ms();
        if let Some(last) = last {
            assert!(position >= last, "clock went from {last} ms back to {position} ms");
        } else {
            assert!(position >= 4_999, "settled at {position} ms");
        }
        last = Some(position);
        if presented >= 90 {
            break;
        }
    }

    assert_eq!(presented, 90);
    assert!(last.is_some_and(|position| position > 7_000));
    assert!(harness
        .devices
        .last()
        .is_some_and(|device| device.is_running() && device.accepted_samples() > 0));
}

#[test]
fn newest_seek_wins() {
    let mut harness = Harness::new(SimulatedStream::default().without_audio());
    harness.open_and_play();
    harness.run_frames(3);

    harness.player.seek(2_000);
    harness.player.seek(6_000);
    let frames = harness.run_frames(1);

    assert!(frames[0].pts_secs >= 6.0 - 0.001);
}

#[test]
fn seek_targets_are_clamped() {
    let mut harness = Harness::new(SimulatedStream::default().without_audio());
    harness.open_and_play();

    harness.player.seek(25_000);
    assert_eq!(harness.player.position_ms(), 10_000);
    harness.player.seek(-100);
    assert_eq!(harness.player.position_ms(), 0);
}

#[test]
fn stop_is_idempotent_and_play_restarts() {
    let mut harness = Harness::new(SimulatedStream::default().without_audio());
    harness.open_and_play();
    harness.run_frames(20);

    let mut events = harness.player.subscribe();
    harness.player.stop();
    harness.player.stop();
    assert_eq!(harness.decode.step(), StepOutcome::Idle);

    let stops = drain(&mut events)
        .into_iter()
        .filter(|event| *event == PlayerEvent::StateChanged(PlaybackState::Stopped))
        .count();
    assert_eq!(stops, 1);
    assert_eq!(harness.player.position_ms(), 0);
    assert!(harness.player.take_pending_frame().is_none());

    harness.player.play();
    let frames = harness.run_frames(1);
    assert!(frames[0].pts_secs < 0.1, "restarted at {}", frames[0].pts_secs);
}

#[test]
fn play_after_end_of_stream_restarts() {
    let mut harness = Harness::new(SimulatedStream::default().with_duration(std::time::Duration::from_secs(1)));
    harness.open_and_play();
    harness.run_to_end();

    harness.player.play();
    let frames = harness.run_to_end();
    assert!(frames.len() > 20);
    assert!(frames[0].pts_secs < 0.2);
}

#[test]
fn pause_halts_decoding() {
    let mut harness = Harness::new(SimulatedStream::default());
    harness.open_and_play();
    harness.run_frames(5);

    harness.player.pause();
    assert_eq!(harness.decode.step(), StepOutcome::Idle);
    assert_eq!(harness.player.state(), PlaybackState::Paused);
    assert!(harness.devices.last().is_some_and(|device| !device.is_running()));

    harness.player.play();
    harness.run_frames(1);
    assert!(harness.devices.last().is_some_and(|device| device.is_running()));
}

#[test]
fn single_slot_drops_unconsumed_frames() {
    let mut harness = Harness::new(SimulatedStream::default().without_audio());
    harness.open_and_play();

    let mut presented = 0;
    for _ in 0..200 {
        if harness.decode.step() == StepOutcome::Presented {
            presented += 1;
        }
    }

    assert_eq!(presented, 1);
    let stats = harness.player.stats();
    assert_eq!(stats.presented, 1);
    assert!(stats.slot_busy > 0);
    assert!(harness.player.take_pending_frame().is_some());
}

#[test]
fn hdr_sources_only_produce_sdr_frames() {
    let tone_mapping = tone_mapping_available();
    for tagging in [
        ColorTagging::Pq,
        ColorTagging::Hlg,
        ColorTagging::Missing,
        ColorTagging::Contradictory,
    ] {
        let stream = SimulatedStream::default()
            .with_duration(std::time::Duration::from_secs(2))
            .hdr(tagging);
        let mut harness = Harness::new(stream);
        harness.open_and_play();

        let frames = harness.run_to_end();
        let stats = harness.player.stats();

        assert!(
            frames.iter().all(|frame| frame.format == FrameFormat::Nv12),
            "{tagging:?} produced a non-NV12 frame"
        );
        assert!(!frames.is_empty(), "{tagging:?} presented nothing");
        assert_eq!(stats.presented, frames.len() as u64);
        if tone_mapping {
            assert!(stats.tone_mapped > 0, "{tagging:?} bypassed the tone mapper");
            assert!(stats.tone_mapped >= stats.presented);
        }
    }
}

#[test]
fn non_presentable_formats_are_converted() {
    let stream = SimulatedStream::default()
        .without_audio()
        .with_pixel_format(ffmpeg_next::format::Pixel::RGB24);
    let mut harness = Harness::new(stream);
    harness.open_and_play();

    let frames = harness.run_frames(3);
    assert!(frames.iter().all(|frame| frame.format == FrameFormat::Nv12));
}

#[test]
fn failing_open_reports_an_error() {
    let time = Arc::new(ManualTimeSource::new());
    let (player, mut decode) = VideoPlayer::with_parts(
        PlayerConfig::default(),
        failing_factory(),
        Box::new(SimulatedAudioHost::new(time.clone())),
        time,
    );
    let mut events = player.subscribe();

    player.set_source("broken.mp4");
    assert_eq!(decode.step(), StepOutcome::Idle);

    let events = drain(&mut events);
    assert!(events.iter().any(|event| matches!(event, PlayerEvent::Error(_))));
    assert_eq!(player.state(), PlaybackState::Stopped);
    assert_eq!(player.duration_ms(), 0);
    assert!(!player.is_seekable());
}

#[test]
fn unsupported_audio_formats_play_video_only() {
    let mut harness = Harness::with_host(SimulatedStream::default(), |host| {
        host.with_supported(Vec::new()).with_preferred(None)
    });
    harness.open_and_play();

    let frames = harness.run_to_end();
    assert!(frames.len() > 250);
    assert!(harness.devices.is_empty());
    assert_eq!(harness.player.position_ms(), 10_000);
}

#[test]
fn missing_audio_device_plays_video_only() {
    let mut harness = Harness::with_host(SimulatedStream::default(), SimulatedAudioHost::failing);
    harness.open_and_play();

    let frames = harness.run_to_end();
    assert!(frames.len() > 250);
    assert!(harness.devices.is_empty());
}

#[test]
fn audio_device_failure_falls_back_to_the_wall_clock() {
    let mut harness = Harness::new(SimulatedStream::default());
    harness.open_and_play();
    harness.run_frames(30);

    let mut events = harness.player.subscribe();
    harness
        .devices
        .last()
        .expect("audio device opened")
        .fail();

    let frames = harness.run_to_end();
    assert!(frames.len() > 200);
    assert!(drain(&mut events)
        .iter()
        .any(|event| matches!(event, PlayerEvent::Error(_))));
    assert_eq!(harness.player.position_ms(), 10_000);
}

#[test]
fn reopening_replaces_the_session() {
    let mut harness = Harness::new(SimulatedStream::default().without_audio());
    harness.open_and_play();
    harness.run_frames(5);

    harness.player.set_source("other.mp4");
    harness.decode.step();

    assert_eq!(harness.player.state(), PlaybackState::Stopped);
    assert_eq!(harness.player.position_ms(), 0);
    assert!(harness.player.take_pending_frame().is_none());
    assert_eq!(
        harness.player.source().as_deref(),
        Some(std::path::Path::new("other.mp4"))
    );
}
