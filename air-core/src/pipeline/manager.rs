//! The Pipeline Manager: the A/B state machine tick loop. This is the
//! component the rest of `air-core` exists to serve — the tick thread
//! calls [`PipelineManager::tick`] once per output period and nothing
//! else ever pops from the active slot's buffers.

use crate::buffer::{AudioFrameData, VideoFrameData};
use crate::clock::MasterClock;
use crate::error::PipelineError;
use crate::evidence::{EvidenceEmitter, EvidencePayload, EvidenceSink, NullEvidenceSink};
use crate::ids::BlockId;
use crate::pad::PadProducer;
use crate::pipeline::ab_slot::{AbSlot, Slot};
use crate::pipeline::boundary::BoundaryState;
use crate::pipeline::reaper::Reaper;
use crate::underflow::{check_no_pad_while_depth_high, UnderflowCause};

/// One tick's worth of output, always exactly one video frame and one
/// audio frame regardless of how it was produced.
pub struct TickOutput {
    pub tick: i64,
    pub video: VideoFrameData,
    pub audio: AudioFrameData,
    pub from_pad: bool,
    pub underflow_cause: Option<UnderflowCause>,
}

/// Bounds how long [`PipelineManager`] will hold `DEGRADED_TAKE_MODE`
/// (last-good-frame-plus-silence) before giving up and falling back to
/// standby pad, expressed in output ticks so the manager never needs a
/// wall-clock read mid-tick.
#[derive(Debug, Clone, Copy)]
pub struct ManagerLimits {
    pub hold_max_ticks: i64,
    /// `INV-NO-PAD-WHILE-DEPTH-HIGH` depth floor: a `BufferTrulyEmpty` pad
    /// emitted while the active segment's buffer depth is at or above this
    /// is logged as a flow-control bug rather than an expected underflow.
    /// Defaults to [`crate::underflow::DEPTH_HIGH_FLOOR`].
    pub min_depth_floor: usize,
    /// Minimum active-buffer video frame depth a CONTENT successor must
    /// have reached before it is eligible to swap in at its fence. PAD is
    /// always eligible regardless of this value. Distinct from
    /// `min_depth_floor`, which governs the depth-high diagnostic, not
    /// swap eligibility.
    pub min_video_prime_frames: usize,
}

/// The minimum the manager needs to know about the block that is about to
/// be committed into the B slot, stamped the moment a `SeamPreparer`'s
/// result is *taken* into preview — never when preparation merely starts.
/// This is the preroll ownership authority that keeps a fence swap from
/// ever acting on a block other than the one actually primed in B: the
/// plan queue is input supply only and never sets this itself.
#[derive(Debug, Clone)]
struct CommittedSuccessor {
    block_id: BlockId,
    fence_tick: i64,
}

pub struct PipelineManager {
    clock: MasterClock,
    pad: PadProducer,
    ab: AbSlot,
    session_frame_index: i64,
    boundary: BoundaryState,
    limits: ManagerLimits,
    expected_next_block_id: Option<CommittedSuccessor>,
    evidence: EvidenceEmitter,
    sink: Box<dyn EvidenceSink>,
    degraded_since_tick: Option<i64>,
    last_good_video: Option<VideoFrameData>,
    reaper: Reaper,
}

impl PipelineManager {
    pub fn new(clock: MasterClock, pad: PadProducer, limits: ManagerLimits, evidence: EvidenceEmitter) -> Self {
        Self {
            clock,
            pad,
            ab: AbSlot::new(),
            session_frame_index: 0,
            boundary: BoundaryState::Pending,
            limits,
            expected_next_block_id: None,
            evidence,
            sink: Box::new(NullEvidenceSink),
            degraded_since_tick: None,
            last_good_video: None,
            reaper: Reaper::spawn(2),
        }
    }

    pub fn attach_evidence_sink(&mut self, sink: Box<dyn EvidenceSink>) {
        self.sink = sink;
    }

    pub fn session_frame_index(&self) -> i64 {
        self.session_frame_index
    }

    pub fn boundary_state(&self) -> BoundaryState {
        self.boundary
    }

    /// Installs the very first segment of a session directly as active,
    /// with no prior preview. Used only once, at session start.
    pub fn install_first(&mut self, slot: Slot) {
        self.ab.install_active(slot);
        self.boundary = BoundaryState::Taken;
    }

    /// Arms a prepared slot as the committed successor. This is the
    /// *only* place `expected_next_block_id` is stamped — submitting
    /// work to a `SeamPreparer` must never call this before the
    /// preparer's result is in hand.
    pub fn commit_successor(&mut self, slot: Slot, block_id: BlockId, fence_tick: i64) -> Result<(), PipelineError> {
        if self.boundary.is_terminal() {
            return Err(PipelineError::TerminalBoundary);
        }
        if !self.boundary.can_transition_to(BoundaryState::ArmedWaitingFence)
            && self.boundary != BoundaryState::ArmedWaitingFence
        {
            // Preparing -> ArmedWaitingFence is the only forward edge into
            // this state; Pending callers must transition through
            // Preparing first via `begin_preparing`.
            return Err(PipelineError::InvariantViolation(format!(
                "cannot arm committed successor from boundary state {:?}",
                self.boundary
            )));
        }
        self.ab.arm_preview(slot);
        self.expected_next_block_id = Some(CommittedSuccessor { block_id, fence_tick });
        self.boundary = BoundaryState::ArmedWaitingFence;
        Ok(())
    }

    /// Moves the boundary into `Preparing`, ready to accept a
    /// `commit_successor` once a `SeamPreparer` result is in hand. Legal
    /// from `Pending` (the session's first transition) or `Taken` (every
    /// transition after the first, once the previous block/segment is
    /// airing) -- any other state is a no-op rather than an error, since
    /// callers may call this defensively before every seam.
    pub fn begin_preparing(&mut self) -> Result<(), PipelineError> {
        if self.boundary.is_terminal() {
            return Err(PipelineError::TerminalBoundary);
        }
        if self.boundary != BoundaryState::Pending && self.boundary != BoundaryState::Taken {
            return Ok(());
        }
        self.boundary = BoundaryState::Preparing;
        Ok(())
    }

    /// Current wall-clock time per this session's `MasterClock`, for
    /// callers that need to stamp evidence they did not generate here
    /// (`air-core::pipeline::runner`'s `BlockStart`/`SegmentEnd`).
    pub fn now_utc_us(&self) -> i64 {
        self.clock.now_utc_us()
    }

    /// Stamps and submits an evidence event the manager itself did not
    /// generate (`Hello`, `BlockStart`, `SegmentEnd`), through the same
    /// emitter/sink `BlockFence`/`ChannelTerminated` use, so sequence
    /// numbers stay contiguous regardless of which layer narrates.
    pub fn emit_evidence(&mut self, payload: EvidencePayload) {
        let now = self.clock.now_utc_us();
        let event = self.evidence.emit(now, payload);
        self.sink.submit(event);
    }

    pub fn fail_terminal(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!(reason = %reason, "pipeline boundary failed terminally");
        self.boundary = BoundaryState::FailedTerminal;
        let now = self.clock.now_utc_us();
        let event = self.evidence.emit(now, EvidencePayload::ChannelTerminated { reason });
        self.sink.submit(event);
    }

    /// Runs one iteration of the tick loop: sleeps to the tick's monotonic
    /// deadline, performs a pending swap if this tick is at or past the
    /// committed successor's fence, pops one frame pair (or pads), and
    /// advances `session_frame_index` by exactly one. Never blocks on
    /// decode or I/O beyond the deadline sleep.
    pub fn tick(&mut self) -> TickOutput {
        let n = self.session_frame_index;
        self.clock.sleep_until_tick(n);

        if let Some(successor) = &self.expected_next_block_id {
            if n >= successor.fence_tick {
                self.perform_swap(n);
            }
        }

        let (video, audio, from_pad, cause) = self.pop_or_pad(n);

        if let Some(c) = cause {
            let depth = self
                .ab
                .active()
                .map(|s| s.video.depth())
                .unwrap_or(0);
            if let Some(violation) = check_no_pad_while_depth_high(c, depth, self.limits.min_depth_floor) {
                tracing::error!(violation = %violation, tick = n, "underflow invariant violated");
            }
        }

        if !from_pad {
            self.last_good_video = Some(video.clone());
            self.degraded_since_tick = None;
        }

        self.session_frame_index += 1;

        TickOutput {
            tick: n,
            video,
            audio,
            from_pad,
            underflow_cause: cause,
        }
    }

    fn perform_swap(&mut self, tick: i64) {
        let successor = self.expected_next_block_id.take();
        let Some(successor) = successor else { return };

        let preview_ready = self
            .ab
            .preview()
            .map(|s| s.is_pad || s.video.depth() >= self.limits.min_video_prime_frames.max(1))
            .unwrap_or(false);

        if !preview_ready {
            // Ownership violation or an unprimed successor at the fence:
            // fail closed and continue on whichever block is actually in
            // preview, never delay the fence.
            tracing::warn!(
                expected_block = %successor.block_id,
                tick,
                "committed successor not ready at fence; entering degraded hold"
            );
            self.degraded_since_tick.get_or_insert(tick);
            self.expected_next_block_id = Some(successor);
            return;
        }

        self.boundary = BoundaryState::Taking;
        if let Some(retiring) = self.ab.commit_preview() {
            // Handed to the reaper so the tick thread never blocks on the
            // outgoing decoder's teardown.
            self.reaper.retire(retiring);
        }
        self.boundary = BoundaryState::Taken;

        let now = self.clock.now_utc_us();
        let event = self.evidence.emit(
            now,
            EvidencePayload::BlockFence {
                block_id: successor.block_id,
                swap_tick: tick,
                fence_tick: successor.fence_tick,
                truncated_by_fence: tick > successor.fence_tick,
            },
        );
        self.sink.submit(event);
    }

    /// Whether the manager has been holding `DEGRADED_TAKE_MODE` (last
    /// good frame + silence) longer than `HOLD_MAX_MS` worth of ticks.
    pub fn degraded_hold_exceeded(&self, tick: i64) -> bool {
        match self.degraded_since_tick {
            Some(since) => tick - since > self.limits.hold_max_ticks,
            None => false,
        }
    }

    fn pop_or_pad(&self, tick: i64) -> (VideoFrameData, AudioFrameData, bool, Option<UnderflowCause>) {
        let Some(active) = self.ab.active() else {
            return (
                self.pad.pad_video_frame(tick),
                self.pad.pad_audio_frame(tick),
                true,
                Some(UnderflowCause::ProducerGated),
            );
        };

        let video = active.video.try_pop_frame();
        let audio = active.audio.try_pop_samples();

        match (video, audio) {
            (Some(v), Some(a)) => (v, a, false, None),
            _ => {
                if self.degraded_hold_exceeded(tick) {
                    (
                        self.pad.pad_video_frame(tick),
                        self.pad.pad_audio_frame(tick),
                        true,
                        Some(UnderflowCause::BufferTrulyEmpty),
                    )
                } else if let Some(held) = &self.last_good_video {
                    // DEGRADED_TAKE_MODE: hold the last good video frame,
                    // silence the audio, keep cadence.
                    (held.clone(), self.pad.pad_audio_frame(tick), true, Some(UnderflowCause::BufferTrulyEmpty))
                } else {
                    (
                        self.pad.pad_video_frame(tick),
                        self.pad.pad_audio_frame(tick),
                        true,
                        Some(UnderflowCause::BufferTrulyEmpty),
                    )
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{push_frame_blocking, push_samples_blocking, AudioLookaheadBuffer, VideoLookaheadBuffer};
    use crate::clock::{RationalFps, SessionEpoch};
    use crate::ids::{ChannelId, SegmentId};
    use std::sync::Arc;

    fn manager() -> PipelineManager {
        let epoch = SessionEpoch::capture_now(0);
        let fps = RationalFps::new(30, 1).unwrap();
        let clock = MasterClock::new(epoch, fps, 250_000);
        let pad = PadProducer::new(crate::producer::OutputFormat {
            width: 4,
            height: 4,
            fps,
            sample_rate: 48_000,
            channels: 2,
        });
        let limits = ManagerLimits {
            hold_max_ticks: 5,
            min_depth_floor: crate::underflow::DEPTH_HIGH_FLOOR,
            min_video_prime_frames: 0,
        };
        let evidence = EvidenceEmitter::new(ChannelId::from("ch1"));
        PipelineManager::new(clock, pad, limits, evidence)
    }

    fn filled_slot(id: &str, start_tick: u64) -> Slot {
        let video = Arc::new(VideoLookaheadBuffer::new(8));
        let audio = Arc::new(AudioLookaheadBuffer::new(8));
        for i in 0..4 {
            push_frame_blocking(
                &video.handle(),
                crate::buffer::VideoFrameData { plane: Arc::from(vec![1u8; 4]), pts_us: i * 33_333, duration_us: 33_333 },
            )
            .unwrap();
            push_samples_blocking(
                &audio.handle(),
                crate::buffer::AudioFrameData {
                    samples: Arc::from(vec![0.1f32; 4]),
                    channels: 2,
                    sample_rate: 48_000,
                    pts_us: i * 33_333,
                    duration_us: 33_333,
                },
            )
            .unwrap();
        }
        Slot { segment_id: SegmentId::from(id), video, audio, producer: None, start_tick, is_pad: false }
    }

    fn empty_slot(id: &str, start_tick: u64, is_pad: bool) -> Slot {
        Slot {
            segment_id: SegmentId::from(id),
            video: Arc::new(VideoLookaheadBuffer::new(8)),
            audio: Arc::new(AudioLookaheadBuffer::new(8)),
            producer: None,
            start_tick,
            is_pad,
        }
    }

    #[test]
    fn ticks_without_active_slot_emit_pad() {
        let mut mgr = manager();
        let out = mgr.tick();
        assert!(out.from_pad);
        assert_eq!(out.underflow_cause, Some(UnderflowCause::ProducerGated));
        assert_eq!(mgr.session_frame_index(), 1);
    }

    #[test]
    fn active_slot_with_depth_emits_content_not_pad() {
        let mut mgr = manager();
        mgr.install_first(filled_slot("s1", 0));
        let out = mgr.tick();
        assert!(!out.from_pad);
        assert_eq!(out.video.pts_us, 0);
    }

    #[test]
    fn session_frame_index_advances_exactly_one_per_tick() {
        let mut mgr = manager();
        mgr.install_first(filled_slot("s1", 0));
        for expected in 0..4 {
            let out = mgr.tick();
            assert_eq!(out.tick, expected);
        }
        assert_eq!(mgr.session_frame_index(), 4);
    }

    #[test]
    fn swap_at_fence_promotes_preview_to_active() {
        let mut mgr = manager();
        mgr.install_first(filled_slot("s1", 0));
        mgr.begin_preparing().unwrap();
        mgr.commit_successor(filled_slot("s2", 2), BlockId::from("b2"), 2).unwrap();

        let out0 = mgr.tick();
        assert_eq!(out0.video.plane.len(), 4);
        let _out1 = mgr.tick();
        let out2 = mgr.tick();
        // tick 2 is the fence tick -- frame emitted must come from the
        // swapped-in slot (freshly filled, same synthetic pts sequence
        // starting at 0 again since `filled_slot` always starts its
        // buffer's pts at 0).
        assert!(!out2.from_pad);
        assert_eq!(out2.video.pts_us, 0);
    }

    #[test]
    fn unprimed_content_successor_holds_degraded_instead_of_swapping() {
        let mut mgr = manager();
        mgr.limits.min_video_prime_frames = 1;
        mgr.install_first(filled_slot("s1", 0));
        mgr.begin_preparing().unwrap();
        // Zero-depth CONTENT successor (is_pad: false) at an already-past
        // fence must not be committed -- the manager stays on A and holds
        // degraded rather than swapping into an unprimed decoder.
        let starved = empty_slot("s2", 0, false);
        mgr.commit_successor(starved, BlockId::from("b2"), 0).unwrap();

        let out = mgr.tick();
        assert!(out.from_pad);
        assert_eq!(mgr.boundary_state(), BoundaryState::ArmedWaitingFence);
        // The committed successor is still pending -- a later tick with a
        // primed buffer would still be eligible to swap.
    }

    #[test]
    fn pad_successor_is_always_eligible_even_at_zero_depth() {
        let mut mgr = manager();
        mgr.limits.min_video_prime_frames = 1;
        mgr.install_first(filled_slot("s1", 0));
        mgr.begin_preparing().unwrap();
        let pad_slot = empty_slot("pad", 0, true);
        mgr.commit_successor(pad_slot, BlockId::from("b2"), 0).unwrap();

        let _ = mgr.tick();
        assert_eq!(mgr.boundary_state(), BoundaryState::Taken);
    }

    #[test]
    fn a_second_swap_after_the_first_is_taken_succeeds() {
        let mut mgr = manager();
        mgr.install_first(filled_slot("s1", 0));
        mgr.begin_preparing().unwrap();
        mgr.commit_successor(filled_slot("s2", 2), BlockId::from("b2"), 2).unwrap();
        for _ in 0..3 {
            mgr.tick();
        }
        assert_eq!(mgr.boundary_state(), BoundaryState::Taken);

        // Without the `Taken -> Preparing` transition this would fail with
        // InvariantViolation, since `begin_preparing` would be a no-op and
        // `commit_successor` would reject arming from `Taken`.
        mgr.begin_preparing().unwrap();
        mgr.commit_successor(filled_slot("s3", 4), BlockId::from("b3"), 5).unwrap();
        for _ in 0..3 {
            mgr.tick();
        }
        assert_eq!(mgr.boundary_state(), BoundaryState::Taken);
    }
}
