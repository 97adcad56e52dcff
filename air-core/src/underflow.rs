//! Underflow cause classification for the pad-and-hold policy. A pad frame
//! is always synthesized *above* the buffer, never written into it, so the
//! buffer's own depth accounting is never polluted by pad frames.

/// Why the current output tick is being filled with a pad frame instead of
/// content. Recorded on every pad-fill for the evidence stream and as-run
/// writer; never inferred after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnderflowCause {
    /// The lookahead buffer for the airing segment has genuinely drained:
    /// the fill thread could not keep up (slow decode, slow source).
    BufferTrulyEmpty,
    /// The producer for the next segment/block exists but has not yet been
    /// admitted into the A/B slot (still priming, or gated behind a fence
    /// that hasn't arrived).
    ProducerGated,
    /// A content tick (CT) was scheduled but the segment plan skipped it —
    /// e.g. a zero-duration segment or a plan that undershoots its block's
    /// declared duration.
    CtSlotSkipped,
    /// The frame popped from the buffer carries a presentation time that
    /// does not match the tick being emitted; rather than present a
    /// mis-timed frame, pad is substituted and the frame is requeued for
    /// diagnostics, not for replay.
    FrameCtMismatch,
    /// The plan's total content duration fell short of the block's
    /// declared duration and pad is filling the deficit at the tail.
    ContentDeficitFill,
}

impl UnderflowCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BufferTrulyEmpty => "BUFFER_TRULY_EMPTY",
            Self::ProducerGated => "PRODUCER_GATED",
            Self::CtSlotSkipped => "CT_SLOT_SKIPPED",
            Self::FrameCtMismatch => "FRAME_CT_MISMATCH",
            Self::ContentDeficitFill => "CONTENT_DEFICIT_FILL",
        }
    }
}

impl std::fmt::Display for UnderflowCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `INV-NO-PAD-WHILE-DEPTH-HIGH`'s default depth floor: a `BufferTrulyEmpty`
/// pad emitted while the active segment's buffer depth is at or above this
/// many frames is a flow-control bug, not a transient underflow.
pub const DEPTH_HIGH_FLOOR: usize = 10;

/// Checks that padding is never selected while the lookahead buffer for
/// the airing segment still has depth at or above the configured floor. A
/// violation is a bug in the swap/admission logic, not a transient
/// condition, so callers should treat `Some(_)` as a logged invariant
/// failure rather than a recoverable error.
pub fn check_no_pad_while_depth_high(
    cause: UnderflowCause,
    buffer_depth: usize,
    min_depth_floor: usize,
) -> Option<String> {
    if cause == UnderflowCause::BufferTrulyEmpty && buffer_depth >= min_depth_floor {
        return Some(format!(
            "pad emitted while buffer depth high: cause={cause} depth={buffer_depth} floor={min_depth_floor}"
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_violation_when_depth_below_floor() {
        assert!(check_no_pad_while_depth_high(UnderflowCause::BufferTrulyEmpty, 5, DEPTH_HIGH_FLOOR).is_none());
    }

    #[test]
    fn violation_when_depth_at_or_above_floor() {
        assert!(check_no_pad_while_depth_high(UnderflowCause::BufferTrulyEmpty, DEPTH_HIGH_FLOOR, DEPTH_HIGH_FLOOR).is_some());
        assert!(check_no_pad_while_depth_high(UnderflowCause::BufferTrulyEmpty, DEPTH_HIGH_FLOOR + 5, DEPTH_HIGH_FLOOR).is_some());
    }

    #[test]
    fn other_causes_never_trigger_the_invariant() {
        assert!(check_no_pad_while_depth_high(UnderflowCause::ProducerGated, 100, 0).is_none());
    }
}
