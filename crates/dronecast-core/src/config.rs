use std::path::PathBuf;
use std::time::Duration;

use crate::address::StreamAddress;

/// How long the decoder waits for the first frame before giving up.
pub const DEFAULT_FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);
/// Longest the worker goes without checking its stop flag.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Bound on `stop_and_wait` before the worker thread is detached.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);
/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// What the worker does with a unit that fails to decode once the stream is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeErrorPolicy {
    /// Log, count and keep reading. Lost or truncated datagrams are expected on UDP.
    #[default]
    Skip,
    /// Stop the worker and report the error through the session status.
    Fail,
}

/// Output size ffmpeg scales decoded video to; a drone's 720p-class stream.
pub const DEFAULT_FFMPEG_FRAME_SIZE: (u32, u32) = (960, 720);

/// Settings for decoding through an external ffmpeg process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegOptions {
    /// Executable to launch; looked up on `PATH` when not absolute.
    pub program: PathBuf,
    /// Every decoded frame is scaled to this size so frames have a fixed length.
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Default for FfmpegOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            frame_width: DEFAULT_FFMPEG_FRAME_SIZE.0,
            frame_height: DEFAULT_FFMPEG_FRAME_SIZE.1,
        }
    }
}

/// How encoded units on the wire become frames.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DecoderBackend {
    /// Each datagram is one compressed image (JPEG from a webcam sender).
    #[default]
    Datagram,
    /// A video stream (e.g. H.264 from a drone) demuxed and decoded by ffmpeg.
    Ffmpeg(FfmpegOptions),
}

/// Parameters for a stream session.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Address to receive the encoded stream on.
    pub address: StreamAddress,
    /// Deadline for the first decoded frame. Later reads are not time-bounded.
    pub first_frame_timeout: Duration,
    /// Wake-up interval for observing a stop request while the transport is silent.
    pub poll_interval: Duration,
    /// Bound used by `stop_and_wait` and when a session is dropped.
    pub shutdown_timeout: Duration,
    pub decode_error_policy: DecodeErrorPolicy,
    /// Receive buffer size; larger datagrams are skipped or fail per `decode_error_policy`.
    pub max_datagram_size: usize,
    pub decoder: DecoderBackend,
}

impl StreamConfig {
    pub fn new(address: StreamAddress) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            address: StreamAddress::default(),
            first_frame_timeout: DEFAULT_FIRST_FRAME_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            decode_error_policy: DecodeErrorPolicy::default(),
            max_datagram_size: MAX_UDP_PAYLOAD,
            decoder: DecoderBackend::default(),
        }
    }
}
