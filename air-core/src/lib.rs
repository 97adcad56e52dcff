#![doc = r#"
air-core — the Playout Engine Core.

Everything a 24/7 linear-broadcast channel session needs to turn a
scheduler's `BlockPlan` queue into a frame-accurate, wall-clock-anchored
tick stream: the rational timebase, lookahead buffers, the decode-backed
`TickProducer`, the A/B pipeline manager, and the pad/underflow fallback.
Encoding and muxing to MPEG-TS live in `air-mux`; the control/evidence RPC
surface lives in `air-control`. This crate owns the hard real-time tick
loop and nothing outside it.

# Architecture

```text
BlockPlan queue -> PipelineManager (A/B slots) -> TickOutput (1 frame pair / tick)
                        ^                                |
                SeamPreparer (off-thread)           consumed by air-mux
                        |
                  TickProducer -> LookaheadBuffer (video/audio)
```

The tick thread is the only thing that ever calls
[`pipeline::PipelineManager::tick`]; it must never block on decode, I/O,
or RPCs. Its sole permitted wait is the monotonic sleep inside
[`clock::MasterClock::sleep_until_tick`].
"#]

pub mod buffer;
pub mod clock;
pub mod error;
pub mod evidence;
pub mod ids;
pub mod pad;
pub mod pipeline;
pub mod plan;
pub mod producer;
pub mod underflow;

pub use clock::{ClockError, MasterClock, RationalFps, SessionEpoch};
pub use error::{BufferError, PipelineError, ProducerError};
pub use evidence::{
    EvidenceAckFromCore, EvidenceEmitter, EvidenceFromAir, EvidencePayload, EvidenceSink,
    NullEvidenceSink, TransitionStatus,
};
pub use ids::{BlockId, ChannelId, EventUuid, EvidenceSequence, SegmentId, SessionId};
pub use pad::PadProducer;
pub use pipeline::{
    AbSlot, BoundaryState, ChannelRunner, ManagerLimits, PipelineManager, PrepareRequest,
    PreparedSlot, Reaper, SeamPreparer, Slot, TickOutput,
};
pub use plan::{BlockPlan, Segment, SegmentType};
pub use producer::{select_resample_mode, CadenceAccumulator, OutputFormat, ResampleMode, TickProducer};
pub use underflow::{check_no_pad_while_depth_high, UnderflowCause, DEPTH_HIGH_FLOOR};
