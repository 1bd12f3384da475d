use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::frame::DecodedFrame;

#[derive(Default)]
struct SlotState {
    frame: Option<Arc<DecodedFrame>>,
    /// Whether any reader has seen `frame` yet.
    delivered: bool,
}

/// Single-item, overwrite-on-write holder for the newest decoded frame.
///
/// One writer (the decoder worker) and any number of readers. Each `write` and
/// `read` is its own short critical section; nothing is queued, so a reader
/// that falls behind simply misses frames.
#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
    stopped: AtomicBool,
    overwritten: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored frame. A previous frame no reader has seen is dropped.
    pub fn write(&self, frame: DecodedFrame) {
        let frame = Arc::new(frame);
        let mut state = self.lock();
        if state.frame.is_some() && !state.delivered {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        state.frame = Some(frame);
        state.delivered = false;
    }

    /// The most recent frame, or `None` if nothing has been written yet.
    /// The slot keeps the frame, so repeated reads return the same one.
    pub fn read(&self) -> Option<Arc<DecodedFrame>> {
        let mut state = self.lock();
        let frame = state.frame.clone();
        if frame.is_some() {
            state.delivered = true;
        }
        frame
    }

    pub fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Frames replaced before any reader saw them.
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }

    // The state is replaced wholesale under the lock, so a panicking holder
    // cannot leave it half-written.
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
