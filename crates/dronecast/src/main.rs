mod cli;

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, info_span, warn};

use dronecast_core::{
    DecodeErrorPolicy, DecodedFrame, DecoderBackend, FfmpegOptions, StreamConfig, StreamSession,
    StreamStatus,
};

/// How often the watch loop polls the session.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How often frame cadence is reported.
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();

    match cli.command {
        cli::Command::Watch {
            address,
            first_frame_timeout_secs,
            poll_interval_ms,
            strict,
            snapshot,
            duration_secs,
            decoder,
            ffmpeg,
            frame_width,
            frame_height,
        } => {
            info!(%address, first_frame_timeout_secs, strict, ?decoder, ?duration_secs, "starting watch");

            let config = StreamConfig {
                first_frame_timeout: Duration::from_secs(first_frame_timeout_secs),
                poll_interval: Duration::from_millis(poll_interval_ms),
                decode_error_policy: if strict {
                    DecodeErrorPolicy::Fail
                } else {
                    DecodeErrorPolicy::Skip
                },
                decoder: match decoder {
                    cli::Decoder::Datagram => DecoderBackend::Datagram,
                    cli::Decoder::Ffmpeg => DecoderBackend::Ffmpeg(FfmpegOptions {
                        program: ffmpeg,
                        frame_width,
                        frame_height,
                    }),
                },
                ..StreamConfig::new(address)
            };

            let span = info_span!("watch", %address);
            let mut session = StreamSession::in_span(config, span);
            session
                .start()
                .with_context(|| format!("failed to start stream on {address}"))?;

            let outcome = watch(&session, duration_secs.map(Duration::from_secs));
            let latest = session.read_latest_frame();

            if !session.stop_and_wait() {
                warn!("decoder thread was detached during shutdown");
            }

            if let (Some(path), Some(frame)) = (&snapshot, &latest) {
                save_snapshot(frame, path)?;
            } else if snapshot.is_some() {
                warn!("no frame received, snapshot not written");
            }

            outcome
        }
    }
}

/// Poll the session until it fails, ends, or `duration` elapses.
fn watch(session: &StreamSession, duration: Option<Duration>) -> Result<()> {
    let started = Instant::now();
    let mut last_report = started;
    let mut last_sequence = None;
    let mut fresh_frames = 0u32;

    loop {
        if duration.is_some_and(|d| started.elapsed() >= d) {
            info!("watch duration elapsed");
            return Ok(());
        }

        match session.status() {
            Some(StreamStatus::Failed(e)) => bail!("stream failed: {e}"),
            Some(StreamStatus::Ended) => {
                info!("stream ended");
                return Ok(());
            }
            _ => {}
        }

        if let Some(frame) = session.read_latest_frame() {
            if last_sequence != Some(frame.sequence) {
                last_sequence = Some(frame.sequence);
                fresh_frames += 1;
            }
        }

        if last_report.elapsed() >= REPORT_INTERVAL {
            let stats = session.stats().unwrap_or_default();
            info!(
                fps = fresh_frames as f64 / last_report.elapsed().as_secs_f64(),
                decoded = stats.frames_decoded,
                overwritten = stats.frames_overwritten,
                skipped = stats.units_skipped,
                status = ?session.status(),
                "stream report"
            );
            fresh_frames = 0;
            last_report = Instant::now();
        }

        thread::sleep(POLL_INTERVAL);
    }
}

fn save_snapshot(frame: &DecodedFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("failed to create snapshot directory")?;
    }

    frame
        .image
        .save(path)
        .with_context(|| format!("failed to write snapshot {}", path.display()))?;

    info!(
        ?path,
        sequence = frame.sequence,
        width = frame.width(),
        height = frame.height(),
        "snapshot written"
    );
    Ok(())
}
