//! Background teardown for retired A/B slots.
//!
//! The old A is handed to a reaping job for background teardown so the
//! tick thread never blocks on a decoder close. The tick thread only ever
//! calls [`Reaper::retire`], which is a non-blocking send into a bounded
//! channel; the actual `TickProducer::stop()` + drop (which joins the
//! fill thread) happens on a dedicated worker thread.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};

use crate::pipeline::ab_slot::Slot;

/// Handle the tick thread holds to hand off a retiring `Slot`. Cloned
/// nowhere — one `Reaper` per channel session, owned by the same code that
/// owns the `PipelineManager`.
pub struct Reaper {
    tx: SyncSender<Slot>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl Reaper {
    /// Spawns the background worker. `capacity` bounds how many retiring
    /// slots may be queued before `retire` itself would have to block —
    /// in practice at most one is ever in flight (one swap at a time), so
    /// a small capacity is intentional, not a real limit.
    pub fn spawn(capacity: usize) -> Self {
        let (tx, rx): (SyncSender<Slot>, Receiver<Slot>) = sync_channel(capacity.max(1));
        let worker = std::thread::Builder::new()
            .name("air-reaper".into())
            .spawn(move || {
                for slot in rx {
                    if let Some(producer) = slot.producer {
                        producer.stop();
                        drop(producer);
                    }
                }
            })
            .expect("failed to spawn reaper thread");
        Self {
            tx,
            worker: Some(worker),
        }
    }

    /// Hands a retired slot to the reaper. Never blocks the tick thread in
    /// practice: if the bounded channel is somehow full, the slot is
    /// dropped inline rather than stalling the caller — dropping a
    /// `TickProducer` still stops its fill thread via `Drop`, just not on
    /// this dedicated worker.
    pub fn retire(&self, slot: Slot) {
        if let Err(TrySendError::Full(slot)) = self.tx.try_send(slot) {
            tracing::warn!("reaper queue full, dropping retired slot inline");
            drop(slot);
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            // Closing `tx` (implicit on drop of `self.tx`, which happens
            // after this runs) ends the worker's receive loop; join it so
            // the session doesn't outlive its own teardown.
            drop(std::mem::replace(&mut self.tx, sync_channel(1).0));
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SegmentId;
    use std::sync::Arc;

    fn empty_slot() -> Slot {
        Slot {
            segment_id: SegmentId::from("s"),
            video: Arc::new(crate::buffer::VideoLookaheadBuffer::new(1)),
            audio: Arc::new(crate::buffer::AudioLookaheadBuffer::new(1)),
            producer: None,
            start_tick: 0,
            is_pad: false,
        }
    }

    #[test]
    fn retire_does_not_block_and_drains() {
        let reaper = Reaper::spawn(4);
        for _ in 0..4 {
            reaper.retire(empty_slot());
        }
        drop(reaper);
    }
}
