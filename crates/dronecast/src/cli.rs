use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use dronecast_core::StreamAddress;

#[derive(Parser)]
#[command(name = "dronecast", about = "Low-latency UDP video receiver")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Receive a stream and report frame cadence and stream health.
    Watch {
        /// Address to receive on, e.g. udp://@0.0.0.0:8899.
        #[arg(short, long, default_value_t = StreamAddress::default())]
        address: StreamAddress,

        /// Seconds to wait for the first decodable frame.
        #[arg(long, default_value_t = 5)]
        first_frame_timeout_secs: u64,

        /// How often the decoder checks for a stop request while the stream is silent.
        #[arg(long, default_value_t = 100)]
        poll_interval_ms: u64,

        /// Stop on the first undecodable datagram instead of skipping it.
        #[arg(long)]
        strict: bool,

        /// Write the newest frame to this PNG on exit.
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Stop after this many seconds (default: run until the stream fails).
        #[arg(short, long)]
        duration_secs: Option<u64>,

        /// How the stream on the wire is decoded.
        #[arg(long, value_enum, default_value_t = Decoder::Datagram)]
        decoder: Decoder,

        /// ffmpeg executable used by `--decoder ffmpeg`.
        #[arg(long, default_value = "ffmpeg")]
        ffmpeg: PathBuf,

        /// Width frames are scaled to by `--decoder ffmpeg`.
        #[arg(long, default_value_t = 960)]
        frame_width: u32,

        /// Height frames are scaled to by `--decoder ffmpeg`.
        #[arg(long, default_value_t = 720)]
        frame_height: u32,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Decoder {
    /// One compressed image (JPEG) per datagram.
    Datagram,
    /// A video stream such as a drone's H.264 feed, decoded by ffmpeg.
    Ffmpeg,
}
