//! The double-buffered A/B slot: exactly one producer is "active" (its
//! frames are being popped onto the program output) and at most one is
//! "preview" (primed and waiting to become active at the next seam/fence).
//! Swapping the pointer is the entire mechanism for a seamless transition
//! — the mux sink never sees a PID reset or a restart, only a change in
//! which buffer the tick loop reads from.

use std::sync::Arc;

use crate::buffer::{AudioLookaheadBuffer, VideoLookaheadBuffer};
use crate::ids::SegmentId;
use crate::producer::TickProducer;

/// One producer's buffers plus the bookkeeping the tick loop needs to know
/// which plan segment it corresponds to.
pub struct Slot {
    pub segment_id: SegmentId,
    pub video: Arc<VideoLookaheadBuffer>,
    pub audio: Arc<AudioLookaheadBuffer>,
    /// `None` for a PAD slot: PAD airs from the session-lifetime
    /// `PadProducer` via a persistent buffer, so there is no decoder to own
    /// or reap.
    pub producer: Option<TickProducer>,
    /// Output tick at which this slot began airing, or at which it is
    /// scheduled to begin if it is currently in preview.
    pub start_tick: u64,
    /// PAD is always eligible to swap in regardless of buffer depth (the
    /// segment-swap eligibility gate applies only to CONTENT); PAD's
    /// persistent buffer never genuinely "underflows".
    pub is_pad: bool,
}

/// Holds at most one active and one preview slot. `expected_next_block_id`
/// (see `air-core::pipeline::boundary`) is stamped only when a prepared
/// result is actually taken into `preview` — never when preparation merely
/// starts — so a `SeamPreparer` that is still working never appears to own
/// the preview slot it hasn't finished yet.
#[derive(Default)]
pub struct AbSlot {
    active: Option<Slot>,
    preview: Option<Slot>,
}

impl AbSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&Slot> {
        self.active.as_ref()
    }

    pub fn preview(&self) -> Option<&Slot> {
        self.preview.as_ref()
    }

    pub fn has_preview(&self) -> bool {
        self.preview.is_some()
    }

    /// Installs a freshly-primed slot as preview. Replaces any existing
    /// preview (the old one, if present, is returned so the reaper can
    /// stop its producer rather than leaking it).
    pub fn arm_preview(&mut self, slot: Slot) -> Option<Slot> {
        self.preview.replace(slot)
    }

    /// Commits the preview slot to active at a seam/fence tick. The
    /// previously active slot, if any, is returned for the reaper to retire.
    /// Returns `None` in the `preview` position if there was nothing armed
    /// — callers must already have verified `has_preview()` before relying
    /// on the swap actually changing anything.
    pub fn commit_preview(&mut self) -> Option<Slot> {
        let retiring = self.active.take();
        self.active = self.preview.take();
        retiring
    }

    /// Directly installs a slot as active with no prior preview, used only
    /// for the very first segment of a session.
    pub fn install_active(&mut self, slot: Slot) {
        self.active = Some(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `Slot` owns a live `TickProducer`, so swap/commit behavior against
    // real slots is covered at the integration level in
    // `pipeline::manager`'s tests; this module only covers the empty
    // starting state of the bookkeeping itself.

    #[test]
    fn starts_with_no_active_or_preview() {
        let slot = AbSlot::new();
        assert!(slot.active().is_none());
        assert!(!slot.has_preview());
    }
}
