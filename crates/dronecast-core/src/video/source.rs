use std::time::Duration;

use image::RgbImage;
use thiserror::Error;

use crate::address::StreamAddress;
use crate::config::StreamConfig;
use crate::error::SessionError;

/// Outcome of asking a source for its next unit.
#[derive(Debug)]
pub enum SourceEvent {
    /// A unit was received and decoded.
    Frame { image: RgbImage, encoded_len: usize },
    /// Nothing arrived within the wait.
    Pending,
    /// The source has no more units and never will.
    Ended,
}

#[derive(Debug, Error)]
pub enum SourceError {
    /// One unit could not be decoded; the transport itself is fine.
    #[error("failed to decode {len}-byte unit: {reason}")]
    Corrupt { len: usize, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A demuxing/decoding layer that turns a byte stream into discrete frames.
///
/// Owned by exactly one decoder worker for its whole life.
pub trait FrameSource: Send {
    /// Wait at most `wait` for the next unit and decode it.
    fn next_frame(&mut self, wait: Duration) -> Result<SourceEvent, SourceError>;

    /// Release the underlying transport. Called once when the worker exits.
    fn close(&mut self);
}

/// Creates a fresh [`FrameSource`] every time a session starts.
///
/// Runs on the caller's thread, so bind and launch failures surface from
/// `start()`.
pub trait SourceOpener: Send + Sync {
    fn open(
        &self,
        address: &StreamAddress,
        config: &StreamConfig,
    ) -> Result<Box<dyn FrameSource>, SessionError>;
}
