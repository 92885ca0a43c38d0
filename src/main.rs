// SPDX-License-Identifier: MPL-2.0
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use vidlens::config;
use vidlens::logging::{init_logging, LogConfig};
use vidlens::video_player::{FrameSink, PlayerEvent, VideoPlayer};

const HELP: &str = "\
Usage: vidlens <FILE> [--seek MS] [--volume V] [--force-software-hdr]

Plays FILE headlessly and reports playback statistics.";

struct Args {
    file: String,
    seek_ms: Option<i64>,
    volume: Option<f32>,
    force_software_hdr: bool,
}

fn parse_args() -> Result<Args, pico_args::Error> {
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        println!("{HELP}");
        std::process::exit(0);
    }
    let force_software_hdr = args.contains("--force-software-hdr");
    let seek_ms = args.opt_value_from_str("--seek")?;
    let volume = args.opt_value_from_str("--volume")?;
    let file = args.free_from_str()?;
    Ok(Args {
        file,
        seek_ms,
        volume,
        force_software_hdr,
    })
}

/// Wakes the main task whenever a frame is staged.
struct NotifySink(Arc<Notify>);

impl FrameSink for NotifySink {
    fn frame_ready(&self, _width: u32, _height: u32) {
        self.0.notify_one();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging(&LogConfig::default())?;

    let args = match parse_args() {
        Ok(args) => args,
        Err(error) => {
            eprintln!("{error}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    let mut config = config::load().unwrap_or_else(|error| {
        tracing::warn!(%error, "failed to load settings, using defaults");
        Default::default()
    });
    config.force_software_hdr |= args.force_software_hdr;
    if let Some(volume) = args.volume {
        config.volume = volume;
    }

    let player = VideoPlayer::new(config)?;
    let frames = Arc::new(Notify::new());
    player.set_frame_sink(Some(Arc::new(NotifySink(Arc::clone(&frames)))));
    let mut events = player.subscribe();

    player.set_source(&args.file);
    player.play();

    let mut seek_pending = args.seek_ms;
    loop {
        tokio::select! {
            () = frames.notified() => {
                // Consuming frees the slot for the next one.
                let _ = player.take_pending_frame();
            }
            event = events.recv() => match event {
                Ok(PlayerEvent::DurationChanged(duration)) => {
                    tracing::info!(duration_ms = duration, "source opened");
                }
                Ok(event @ PlayerEvent::SeekableChanged(_)) => {
                    seek_when_ready(&player, &event, &mut seek_pending);
                }
                Ok(PlayerEvent::SizeChanged { width, height }) => {
                    tracing::info!(width, height, "frame size");
                }
                Ok(PlayerEvent::EndOfStream) => break,
                Ok(PlayerEvent::Error(message)) => {
                    tracing::error!(%message, "playback error");
                    if player.duration_ms() == 0 {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    let stats = player.stats();
    tracing::info!(
        presented = stats.presented,
        tone_mapped = stats.tone_mapped,
        dropped = stats.dropped(),
        late = stats.late,
        slot_busy = stats.slot_busy,
        seek = stats.seek,
        invalid = stats.invalid,
        filter = stats.filter,
        audio_samples_dropped = stats.audio_samples_dropped,
        "playback finished"
    );
    Ok(())
}

/// Issues the `--seek` request once the source accepts seeks.
fn seek_when_ready(player: &VideoPlayer, event: &PlayerEvent, pending: &mut Option<i64>) {
    if !matches!(event, PlayerEvent::SeekableChanged(true)) {
        return;
    }
    if let Some(target) = pending.take() {
        tracing::debug!(target, "applying initial seek");
        player.seek(target);
    }
}
