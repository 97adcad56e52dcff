//! Lookahead buffers: the fixed-depth ring each `TickProducer` fills ahead
//! of consumption. Consumption is always non-blocking (`try_pop`); filling
//! is always a dedicated blocking thread gated on a condvar, never the
//! consumer's thread.
//!
//! No hysteresis: there is no separate high/low watermark. The fill thread
//! blocks whenever the buffer is at capacity and wakes on the first popped
//! slot, which is the simplest backpressure law that cannot sawtooth.

mod audio;
mod video;

pub use audio::{AudioFrameData, AudioLookaheadBuffer};
pub use video::{VideoFrameData, VideoLookaheadBuffer};

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

/// Generic fixed-capacity ring shared by the video and audio lookahead
/// buffers. Not exported directly — `VideoLookaheadBuffer` and
/// `AudioLookaheadBuffer` wrap it with their element type.
struct Ring<T> {
    inner: Mutex<RingState<T>>,
    not_full: Condvar,
}

struct RingState<T> {
    queue: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

impl<T> Ring<T> {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RingState {
                queue: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
            }),
            not_full: Condvar::new(),
        }
    }

    /// Blocks the calling (fill) thread until there is room, then pushes.
    /// Returns `Err(())` if the buffer was closed while waiting.
    fn push_blocking(&self, item: T) -> Result<(), ()> {
        let mut state = self.inner.lock().unwrap();
        loop {
            if state.closed {
                return Err(());
            }
            if state.queue.len() < state.capacity {
                state.queue.push_back(item);
                return Ok(());
            }
            state = self.not_full.wait(state).unwrap();
        }
    }

    /// Non-blocking pop for the consumer (tick thread). Never waits.
    fn try_pop(&self) -> Option<T> {
        let mut state = self.inner.lock().unwrap();
        let item = state.queue.pop_front();
        if item.is_some() {
            drop(state);
            self.not_full.notify_one();
        }
        item
    }

    fn depth(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    fn capacity(&self) -> usize {
        self.inner.lock().unwrap().capacity
    }

    fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.not_full.notify_all();
    }
}

/// Shared handle type used by both buffer flavors so the fill thread and
/// tick thread each hold an `Arc` without needing unsafe aliasing.
type Shared<T> = Arc<Ring<T>>;
