//! `ChannelRunner`: the session-level scheduler that turns a queue of
//! `BlockPlan`s into the submit/poll/commit sequence `PipelineManager` and
//! `SeamPreparer` need. `PipelineManager` itself knows nothing about a
//! plan queue -- it only knows how to hold one active slot, swap to a
//! committed successor at a fence, and pad when nothing is ready. Something
//! has to decide *when* to submit the next segment's `PrepareRequest* and
//! *when* the preparer's result has actually earned `commit_successor`;
//! that is this module's entire job.
//!
//! The runner owns no thread of its own: [`ChannelRunner::run_once`] is
//! meant to be called from the same tick thread that would otherwise call
//! `PipelineManager::tick` directly, once per output period. Everything it
//! does beyond that single call is non-blocking (queue bookkeeping, a
//! channel `try_recv` via `SeamPreparer::poll`), so the hard real-time
//! constraint on the tick thread is preserved.

use std::collections::VecDeque;

use crate::clock::MasterClock;
use crate::error::PipelineError;
use crate::evidence::{EvidencePayload, TransitionStatus};
use crate::ids::{BlockId, ChannelId, SegmentId};
use crate::pipeline::boundary::BoundaryState;
use crate::pipeline::manager::{ManagerLimits, PipelineManager, TickOutput};
use crate::pipeline::seam_preparer::{required_headroom_ticks, PrepareRequest, SeamPreparer};
use crate::plan::BlockPlan;
use crate::producer::OutputFormat;

/// A seam submitted to the `SeamPreparer` but not yet polled back.
struct PendingSeam {
    block_id: BlockId,
    segment_id: SegmentId,
    fence_tick: i64,
    /// `Some` when this seam crosses into a new block (its first segment);
    /// `None` when it is merely the next segment within the current block.
    /// Carried through to `ArmedSeam` so `finalize_swap` knows which kind
    /// of rotation to perform without re-deriving it from the queue.
    entering_block: Option<BlockPlan>,
}

/// A seam whose prepared slot has been taken into preview via
/// `commit_successor`, waiting for the fence tick to actually arrive.
struct ArmedSeam {
    segment_id: SegmentId,
    fence_tick: i64,
    entering_block: Option<BlockPlan>,
}

/// The runner's view of what is currently airing: which block, and which
/// segment within it. Mirrors the manager's own active slot but at the
/// plan level, since `PipelineManager` only tracks buffers, not schedules.
struct ActiveBlock {
    plan: BlockPlan,
    segment_index: usize,
}

impl ActiveBlock {
    fn current_segment_id(&self) -> SegmentId {
        self.plan.segments[self.segment_index].segment_id.clone()
    }

    /// Absolute house tick the next segment within this block starts at,
    /// or `None` if `segment_index` is already the block's last segment.
    fn next_segment_seam_tick(&self) -> Option<i64> {
        let next_index = self.segment_index + 1;
        if next_index >= self.plan.segments.len() {
            return None;
        }
        Some(self.plan.fence_tick as i64 + self.plan.segment_start_tick(next_index) as i64)
    }
}

/// Ties a `PipelineManager`, a `SeamPreparer` and a bounded `BlockPlan`
/// queue into one session scheduler. One `ChannelRunner` per channel
/// session, constructed once at `StartBlockPlanSession` and fed via
/// [`feed_block_plan`](Self::feed_block_plan) for the lifetime of the
/// session.
pub struct ChannelRunner {
    manager: PipelineManager,
    preparer: SeamPreparer,
    channel_id: ChannelId,
    epoch_utc_us: i64,
    frame_period_us: i64,
    video_capacity: usize,
    audio_capacity: usize,
    queue: VecDeque<BlockPlan>,
    max_queue_depth: usize,
    current: Option<ActiveBlock>,
    pending: Option<PendingSeam>,
    armed: Option<ArmedSeam>,
    bootstrapped: bool,
}

impl ChannelRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: MasterClock,
        output: OutputFormat,
        pad: crate::pad::PadProducer,
        limits: ManagerLimits,
        channel_id: ChannelId,
        epoch_utc_us: i64,
        video_capacity: usize,
        audio_capacity: usize,
        max_queue_depth: usize,
        min_audio_prime_ms: i64,
        min_video_prime_frames: usize,
    ) -> Self {
        let evidence = crate::evidence::EvidenceEmitter::new(channel_id.clone());
        let frame_period_us = output.fps.frame_period_us();
        Self {
            manager: PipelineManager::new(clock, pad, limits, evidence),
            preparer: SeamPreparer::spawn(output, min_audio_prime_ms, min_video_prime_frames),
            channel_id,
            epoch_utc_us,
            frame_period_us,
            video_capacity,
            audio_capacity,
            queue: VecDeque::new(),
            max_queue_depth,
            current: None,
            pending: None,
            armed: None,
            bootstrapped: false,
        }
    }

    pub fn attach_evidence_sink(&mut self, sink: Box<dyn crate::evidence::EvidenceSink>) {
        self.manager.attach_evidence_sink(sink);
    }

    pub fn boundary_state(&self) -> BoundaryState {
        self.manager.boundary_state()
    }

    pub fn session_frame_index(&self) -> i64 {
        self.manager.session_frame_index()
    }

    /// Enqueues a block plan for airing once the currently-scheduled work
    /// is exhausted. Rejects when the queue is already at capacity --
    /// `FeedBlockPlan`'s depth-2 limit is enforced here, the one place the
    /// plan queue itself lives.
    pub fn feed_block_plan(&mut self, plan: BlockPlan) -> Result<(), PipelineError> {
        if plan.is_empty() {
            return Err(PipelineError::PlanRejected {
                block_id: plan.block_id.0,
                reason: "block plan has no segments".into(),
            });
        }
        if self.queue.len() >= self.max_queue_depth {
            return Err(PipelineError::PlanRejected {
                block_id: plan.block_id.0,
                reason: format!("plan queue already at its {}-deep capacity", self.max_queue_depth),
            });
        }
        self.queue.push_back(plan);
        Ok(())
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Runs exactly one tick: submits/polls seam-preparation work as
    /// needed, advances the manager's own tick, and rotates the runner's
    /// view of "current block/segment" when an armed seam's fence is
    /// actually reached. Must be called from the dedicated tick thread in
    /// a tight loop, exactly like `PipelineManager::tick` itself -- every
    /// non-tick step here is either pure bookkeeping or a non-blocking
    /// channel operation.
    pub fn run_once(&mut self) -> TickOutput {
        if !self.bootstrapped {
            self.bootstrap_first_block();
        }

        self.maybe_submit_next_seam();
        self.poll_seam_preparer();

        let out = self.manager.tick();

        if let Some(armed) = &self.armed {
            if out.tick >= armed.fence_tick && self.manager.boundary_state() == BoundaryState::Taken {
                self.finalize_swap();
            }
        }

        out
    }

    /// The only synchronous priming in this module: the very first
    /// segment of a session has no "airing" predecessor to swap away from,
    /// so there is nothing for `commit_successor`'s fence logic to apply
    /// to. This mirrors `TickProducer`'s own prime-first-tick exception --
    /// a one-time, documented, off-steady-state wait before the session's
    /// hard real-time cadence begins.
    fn bootstrap_first_block(&mut self) {
        self.bootstrapped = true;
        self.manager.emit_evidence(EvidencePayload::Hello {
            channel_id: self.channel_id.clone(),
            epoch_utc_us: self.epoch_utc_us,
        });

        let Some(plan) = self.queue.pop_front() else {
            return;
        };
        if plan.is_empty() {
            tracing::error!(block_id = %plan.block_id, "first queued block plan has no segments");
            return;
        }

        self.preparer.submit(PrepareRequest {
            block_id: plan.block_id.clone(),
            fence_tick: plan.fence_tick as i64,
            segment: plan.segments[0].clone(),
            video_capacity: self.video_capacity,
            audio_capacity: self.audio_capacity,
        });

        let mut result = None;
        for _ in 0..500 {
            if let Some(r) = self.preparer.poll() {
                result = Some(r);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        match result {
            Some(Ok(prepared)) => {
                self.manager.install_first(prepared.slot);
                self.manager.emit_evidence(EvidencePayload::BlockStart {
                    block_id: plan.block_id.clone(),
                    actual_start_utc_ms: self.manager.now_utc_us() / 1_000,
                    fence_tick: plan.fence_tick as i64,
                });
                self.current = Some(ActiveBlock { plan, segment_index: 0 });
            }
            Some(Err((_, _, err))) => {
                self.manager.fail_terminal(format!("first block failed to prime: {err}"));
            }
            None => {
                self.manager.fail_terminal("first block did not prime within bootstrap deadline");
            }
        }
    }

    /// Submits the next seam's `PrepareRequest` once its fence is within
    /// the preparer's required headroom. At most one seam is ever pending
    /// or armed at a time, matching `BlockPlan`'s own "at most one block
    /// prepared ahead" contract.
    fn maybe_submit_next_seam(&mut self) {
        if self.pending.is_some() || self.armed.is_some() {
            return;
        }
        let Some(current) = &self.current else {
            return;
        };

        let now_tick = self.manager.session_frame_index();
        let headroom = required_headroom_ticks(self.frame_period_us);

        if let Some(seam_tick) = current.next_segment_seam_tick() {
            if now_tick + headroom < seam_tick {
                return;
            }
            let next_index = current.segment_index + 1;
            let segment = current.plan.segments[next_index].clone();
            let segment_id = segment.segment_id.clone();
            let block_id = current.plan.block_id.clone();
            self.preparer.submit(PrepareRequest {
                block_id: block_id.clone(),
                fence_tick: seam_tick,
                segment,
                video_capacity: self.video_capacity,
                audio_capacity: self.audio_capacity,
            });
            if let Err(e) = self.manager.begin_preparing() {
                tracing::error!(error = %e, "cannot begin preparing next segment");
                return;
            }
            self.pending = Some(PendingSeam { block_id, segment_id, fence_tick: seam_tick, entering_block: None });
            return;
        }

        // Current block's last segment: the next seam is the next queued
        // block's first segment, if one has been fed.
        let Some(next_plan) = self.queue.front() else {
            return;
        };
        if next_plan.is_empty() {
            tracing::error!(block_id = %next_plan.block_id, "queued block plan has no segments; dropping");
            self.queue.pop_front();
            return;
        }
        let seam_tick = next_plan.fence_tick as i64;
        if now_tick + headroom < seam_tick {
            return;
        }
        let next_plan = self.queue.pop_front().expect("front already checked Some above");
        let segment = next_plan.segments[0].clone();
        let segment_id = segment.segment_id.clone();
        let block_id = next_plan.block_id.clone();
        self.preparer.submit(PrepareRequest {
            block_id: block_id.clone(),
            fence_tick: seam_tick,
            segment,
            video_capacity: self.video_capacity,
            audio_capacity: self.audio_capacity,
        });
        if let Err(e) = self.manager.begin_preparing() {
            tracing::error!(error = %e, "cannot begin preparing next block");
            return;
        }
        self.pending = Some(PendingSeam {
            block_id,
            segment_id,
            fence_tick: seam_tick,
            entering_block: Some(next_plan),
        });
    }

    /// Non-blocking poll of the `SeamPreparer`. A finished slot is
    /// immediately `commit_successor`'d -- this is the only place that
    /// happens, preserving preroll ownership authority: submission alone
    /// never arms anything.
    fn poll_seam_preparer(&mut self) {
        let Some(result) = self.preparer.poll() else {
            return;
        };
        let Some(pending) = self.pending.take() else {
            tracing::warn!("seam preparer returned a result with no pending request tracked");
            return;
        };

        match result {
            Ok(prepared) => {
                if prepared.block_id != pending.block_id {
                    tracing::error!(
                        expected = %pending.block_id,
                        got = %prepared.block_id,
                        "seam preparer result block id mismatch; discarding"
                    );
                    return;
                }
                if let Err(e) =
                    self.manager
                        .commit_successor(prepared.slot, prepared.block_id, prepared.fence_tick)
                {
                    tracing::error!(error = %e, "failed to commit prepared successor");
                    return;
                }
                self.armed = Some(ArmedSeam {
                    segment_id: pending.segment_id,
                    fence_tick: pending.fence_tick,
                    entering_block: pending.entering_block,
                });
            }
            Err((block_id, segment_id, err)) => {
                tracing::error!(
                    %block_id,
                    %segment_id,
                    error = %err,
                    "seam preparation failed; holding on the current segment until the fence forces a pad fallback"
                );
                self.manager.emit_evidence(EvidencePayload::SegmentEnd {
                    segment_id,
                    status: TransitionStatus::Error,
                    reason: Some(err.to_string()),
                });
            }
        }
    }

    /// Rotates the runner's own `current`/`segment_index` bookkeeping once
    /// `PipelineManager` has actually performed the swap at the armed
    /// seam's fence tick, and narrates the transition via `SegmentEnd`
    /// and, if this seam crossed into a new block, `BlockStart`.
    fn finalize_swap(&mut self) {
        let Some(armed) = self.armed.take() else {
            return;
        };

        if let Some(current) = &self.current {
            self.manager.emit_evidence(EvidencePayload::SegmentEnd {
                segment_id: current.current_segment_id(),
                status: TransitionStatus::Aired,
                reason: None,
            });
        }

        match armed.entering_block {
            Some(plan) => {
                self.manager.emit_evidence(EvidencePayload::BlockStart {
                    block_id: plan.block_id.clone(),
                    actual_start_utc_ms: self.manager.now_utc_us() / 1_000,
                    fence_tick: armed.fence_tick,
                });
                self.current = Some(ActiveBlock { plan, segment_index: 0 });
            }
            None => {
                if let Some(current) = &mut self.current {
                    current.segment_index += 1;
                } else {
                    // The armed segment belonged to no block we were
                    // tracking -- should be unreachable given
                    // `maybe_submit_next_seam` only arms within-block
                    // seams when `self.current` is already `Some`, but the
                    // segment id has been lost and `_segment_id` is kept
                    // for diagnostics only.
                    let _ = armed.segment_id;
                    tracing::error!("swap finalized with no tracked current block");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{RationalFps, SessionEpoch};
    use crate::evidence::{EvidenceFromAir, EvidenceSink};
    use crate::plan::{Segment, SegmentType};
    use std::sync::{Arc, Mutex};

    struct CaptureSink(Arc<Mutex<Vec<EvidenceFromAir>>>);

    impl EvidenceSink for CaptureSink {
        fn submit(&mut self, event: EvidenceFromAir) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn pad_segment(id: &str, ticks: u64) -> Segment {
        Segment {
            segment_id: SegmentId::from(id),
            kind: SegmentType::Pad,
            source_fps: None,
            duration_ticks: ticks,
            source_uri: None,
            trim_in_us: 0,
        }
    }

    fn new_runner() -> (ChannelRunner, Arc<Mutex<Vec<EvidenceFromAir>>>) {
        let epoch = SessionEpoch::capture_now(0);
        let fps = RationalFps::new(30, 1).unwrap();
        let clock = MasterClock::new(epoch, fps, 250_000);
        let output = OutputFormat { width: 4, height: 4, fps, sample_rate: 48_000, channels: 2 };
        let pad = crate::pad::PadProducer::new(output);
        let limits = ManagerLimits { hold_max_ticks: 5, min_depth_floor: 10, min_video_prime_frames: 0 };
        let mut runner = ChannelRunner::new(clock, output, pad, limits, ChannelId::from("ch1"), 0, 8, 8, 2, 500, 1);
        let events: Arc<Mutex<Vec<EvidenceFromAir>>> = Arc::new(Mutex::new(Vec::new()));
        runner.attach_evidence_sink(Box::new(CaptureSink(events.clone())));
        (runner, events)
    }

    #[test]
    fn feed_block_plan_rejects_beyond_queue_capacity() {
        let (mut runner, _events) = new_runner();
        let plan = |id: &str| BlockPlan {
            block_id: BlockId::from(id),
            fence_tick: 0,
            segments: vec![pad_segment("p", 10)],
        };
        runner.feed_block_plan(plan("b1")).unwrap();
        runner.feed_block_plan(plan("b2")).unwrap();
        assert!(runner.feed_block_plan(plan("b3")).is_err());
    }

    #[test]
    fn feed_block_plan_rejects_empty_segments() {
        let (mut runner, _events) = new_runner();
        let empty = BlockPlan { block_id: BlockId::from("b1"), fence_tick: 0, segments: vec![] };
        assert!(runner.feed_block_plan(empty).is_err());
    }

    #[test]
    fn bootstrap_installs_first_block_and_emits_hello_then_block_start() {
        let (mut runner, events) = new_runner();
        runner
            .feed_block_plan(BlockPlan {
                block_id: BlockId::from("b1"),
                fence_tick: 0,
                segments: vec![pad_segment("s1", 100)],
            })
            .unwrap();

        let out = runner.run_once();
        assert!(out.from_pad);

        let captured = events.lock().unwrap();
        assert!(matches!(captured[0].payload, EvidencePayload::Hello { .. }));
        assert!(matches!(captured[1].payload, EvidencePayload::BlockStart { .. }));
    }

    #[test]
    fn runner_advances_into_the_next_queued_block_at_its_fence() {
        let (mut runner, events) = new_runner();
        runner
            .feed_block_plan(BlockPlan {
                block_id: BlockId::from("b1"),
                fence_tick: 0,
                segments: vec![pad_segment("s1", 10)],
            })
            .unwrap();
        runner
            .feed_block_plan(BlockPlan {
                block_id: BlockId::from("b2"),
                fence_tick: 10,
                segments: vec![pad_segment("s2", 10)],
            })
            .unwrap();

        for _ in 0..25 {
            runner.run_once();
        }

        let captured = events.lock().unwrap();
        let saw_second_block_start = captured.iter().any(|e| {
            matches!(&e.payload, EvidencePayload::BlockStart { block_id, .. } if block_id.0 == "b2")
        });
        assert!(saw_second_block_start, "expected a BlockStart for b2 among captured evidence");
    }
}
