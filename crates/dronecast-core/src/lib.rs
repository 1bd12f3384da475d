//! Receive a low-latency UDP video stream on a background thread and keep
//! only the newest decoded frame for a polling consumer.

pub mod address;
pub mod config;
pub mod error;
pub mod session;
pub mod video;

pub use address::{Protocol, StreamAddress};
pub use config::{DecodeErrorPolicy, DecoderBackend, FfmpegOptions, StreamConfig};
pub use error::{SessionError, StreamAddressError, StreamDecodeError};
pub use session::{SessionState, StreamSession};
pub use video::decoder::{UdpImageOpener, UdpImageSource};
pub use video::ffmpeg::{FfmpegOpener, FfmpegSource};
pub use video::frame::DecodedFrame;
pub use video::slot::FrameSlot;
pub use video::source::{FrameSource, SourceError, SourceEvent, SourceOpener};
pub use video::worker::{StopHandle, StreamStats, StreamStatus};
