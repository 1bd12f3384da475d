use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn, Span};

use super::frame::DecodedFrame;
use super::slot::FrameSlot;
use super::source::{FrameSource, SourceError, SourceEvent};
use crate::config::{DecodeErrorPolicy, StreamConfig};
use crate::error::StreamDecodeError;

const THREAD_NAME: &str = "dronecast-decoder";

/// Health of a decoder worker, as last published by the worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    /// Waiting for the first decodable frame.
    Connecting,
    /// At least one frame has been decoded.
    Streaming,
    /// The worker exited after a stop request.
    Stopped,
    /// The source ran out after producing frames.
    Ended,
    Failed(StreamDecodeError),
}

impl StreamStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, StreamStatus::Failed(_))
    }

    pub fn error(&self) -> Option<&StreamDecodeError> {
        match self {
            StreamStatus::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Counters for one worker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames_decoded: u64,
    /// Frames replaced in the slot before any reader saw them.
    pub frames_overwritten: u64,
    /// Undecodable units dropped under [`DecodeErrorPolicy::Skip`].
    pub units_skipped: u64,
}

/// State shared between the worker thread and the control thread.
struct Shared {
    slot: FrameSlot,
    status: Mutex<StreamStatus>,
    frames_decoded: AtomicU64,
    units_skipped: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            slot: FrameSlot::new(),
            status: Mutex::new(StreamStatus::Connecting),
            frames_decoded: AtomicU64::new(0),
            units_skipped: AtomicU64::new(0),
        }
    }

    fn status(&self) -> StreamStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_status(&self, status: StreamStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn stats(&self) -> StreamStats {
        StreamStats {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_overwritten: self.slot.overwritten(),
            units_skipped: self.units_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Publishes a panic as a failed status, then disconnects the exit channel.
struct ExitGuard {
    shared: Arc<Shared>,
    _exited: Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("decoder thread panicked");
            self.shared
                .set_status(StreamStatus::Failed(StreamDecodeError::WorkerPanicked));
        }
    }
}

/// A running decoder thread and the slot it publishes into.
pub(crate) struct WorkerHandle {
    shared: Arc<Shared>,
    thread: JoinHandle<()>,
    exited: Receiver<()>,
}

impl WorkerHandle {
    /// Launch a worker that owns `source` until it exits.
    pub(crate) fn spawn(
        source: Box<dyn FrameSource>,
        config: StreamConfig,
        span: Span,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared::new());
        let (exit_tx, exited) = crossbeam_channel::bounded(0);

        let thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(THREAD_NAME.to_string())
                .spawn(move || {
                    let _enter = span.enter();
                    let guard = ExitGuard {
                        shared,
                        _exited: exit_tx,
                    };
                    let status = decode_loop(source, &guard.shared, &config);
                    guard.shared.set_status(status);
                })?
        };

        Ok(Self {
            shared,
            thread,
            exited,
        })
    }

    pub(crate) fn read(&self) -> Option<Arc<DecodedFrame>> {
        self.shared.slot.read()
    }

    pub(crate) fn status(&self) -> StreamStatus {
        self.shared.status()
    }

    pub(crate) fn stats(&self) -> StreamStats {
        self.shared.stats()
    }

    /// Raise the stop flag. The thread exits after its current receive.
    pub(crate) fn request_stop(self) -> StopHandle {
        self.shared.slot.mark_stopped();
        StopHandle {
            shared: self.shared,
            thread: self.thread,
            exited: self.exited,
        }
    }
}

/// Returned by `stop()` so callers can optionally wait for the worker to
/// release its source.
#[must_use = "drop the handle to detach, or call wait() for confirmed teardown"]
pub struct StopHandle {
    shared: Arc<Shared>,
    thread: JoinHandle<()>,
    exited: Receiver<()>,
}

impl StopHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the worker has exited or `timeout` elapses. Returns whether
    /// the worker exited; on timeout the thread is detached.
    pub fn wait(self, timeout: Duration) -> bool {
        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.thread.join().is_err() {
                    warn!("decoder thread exited by panic");
                }
                debug!(status = ?self.shared.status(), "decoder thread joined");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(?timeout, "decoder thread did not exit in time, detaching");
                false
            }
        }
    }

    /// Status the worker published last; final once the worker has exited.
    pub fn status(&self) -> StreamStatus {
        self.shared.status()
    }

    pub fn stats(&self) -> StreamStats {
        self.shared.stats()
    }
}

fn decode_loop(
    mut source: Box<dyn FrameSource>,
    shared: &Shared,
    config: &StreamConfig,
) -> StreamStatus {
    info!(
        first_frame_timeout = ?config.first_frame_timeout,
        poll_interval = ?config.poll_interval,
        policy = ?config.decode_error_policy,
        "decoder worker started"
    );

    let started = Instant::now();
    let mut sequence: u64 = 0;

    let status = loop {
        if shared.slot.is_stopped() {
            info!(frames = sequence, "stop requested, decoder worker exiting");
            break StreamStatus::Stopped;
        }

        // Only the first frame has a deadline; after that the poll interval
        // just bounds how long a stop request can go unnoticed.
        let wait = if sequence == 0 {
            let elapsed = started.elapsed();
            if elapsed >= config.first_frame_timeout {
                error!(?elapsed, "no decodable frame before first-frame timeout");
                break StreamStatus::Failed(StreamDecodeError::NotEnoughFrames);
            }
            (config.first_frame_timeout - elapsed).min(config.poll_interval)
        } else {
            config.poll_interval
        };

        match source.next_frame(wait) {
            Ok(SourceEvent::Frame { image, encoded_len }) => {
                if sequence == 0 {
                    info!(
                        width = image.width(),
                        height = image.height(),
                        elapsed = ?started.elapsed(),
                        "first frame decoded"
                    );
                    shared.set_status(StreamStatus::Streaming);
                }
                shared.slot.write(DecodedFrame {
                    image,
                    sequence,
                    received_at: Instant::now(),
                    encoded_len,
                });
                shared.frames_decoded.fetch_add(1, Ordering::Relaxed);
                sequence += 1;
            }
            Ok(SourceEvent::Pending) => {}
            Ok(SourceEvent::Ended) => {
                if sequence == 0 {
                    error!("source ended before producing a frame");
                    break StreamStatus::Failed(StreamDecodeError::NotEnoughFrames);
                }
                info!(frames = sequence, "source ended");
                break StreamStatus::Ended;
            }
            Err(SourceError::Corrupt { len, reason }) => match config.decode_error_policy {
                DecodeErrorPolicy::Skip => {
                    let skipped = shared.units_skipped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(len, %reason, skipped, "skipping undecodable unit");
                }
                DecodeErrorPolicy::Fail => {
                    error!(len, %reason, "undecodable unit, decoder worker exiting");
                    break StreamStatus::Failed(StreamDecodeError::Corrupt(reason));
                }
            },
            Err(SourceError::Io(e)) => {
                error!(%e, "stream transport failed");
                break StreamStatus::Failed(StreamDecodeError::Transport(e.to_string()));
            }
        }
    };

    source.close();
    status
}
