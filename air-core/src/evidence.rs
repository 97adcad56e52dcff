//! Execution-evidence stream: the Pipeline Manager's only outbound
//! narration of what it actually did, as opposed to what it was told to
//! do. Evidence is monotonic and idempotent by construction so a consumer
//! (the scheduler, via `air-control`) can durably persist an as-run record
//! without re-deriving state from the tick loop.

use crate::ids::{BlockId, ChannelId, EventUuid, EvidenceSequence, SegmentId};

/// The reason a transition did not result in a clean `AIRED` status,
/// mirrored onto the as-run writer's `status`/`reason` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TransitionStatus {
    Aired,
    Truncated,
    Short,
    Skipped,
    Substituted,
    Error,
}

/// Payload variants for `EvidenceFromAir`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind")]
pub enum EvidencePayload {
    /// Sent once at session start, before any `BlockStart`.
    Hello {
        channel_id: ChannelId,
        epoch_utc_us: i64,
    },
    BlockStart {
        block_id: BlockId,
        actual_start_utc_ms: i64,
        fence_tick: i64,
    },
    SegmentEnd {
        segment_id: SegmentId,
        status: TransitionStatus,
        reason: Option<String>,
    },
    BlockFence {
        block_id: BlockId,
        swap_tick: i64,
        fence_tick: i64,
        truncated_by_fence: bool,
    },
    ChannelTerminated {
        reason: String,
    },
}

/// One emitted evidence event. `sequence` is strictly monotone and
/// contiguous per `(channel_id, playout_session_id)`;
/// `event_uuid` is the idempotency key a consumer replays against on
/// reconnect.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EvidenceFromAir {
    pub sequence: EvidenceSequence,
    pub event_uuid: EventUuid,
    pub channel_id: ChannelId,
    pub emitted_at_utc_us: i64,
    pub payload: EvidencePayload,
}

/// Ack for a delivered batch: the consumer's durable high-water mark,
/// advanced before being reported back.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct EvidenceAckFromCore {
    pub acked_sequence: u64,
}

/// Stamps the monotone sequence number and idempotency key onto evidence
/// as it is produced. Owned exclusively by the Pipeline Manager's session;
/// never shared, never reset except by constructing a new session (a
/// crash+restart changes `playout_session_id` and therefore starts a fresh
/// `EvidenceEmitter`).
pub struct EvidenceEmitter {
    channel_id: ChannelId,
    next_sequence: EvidenceSequence,
}

impl EvidenceEmitter {
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            next_sequence: EvidenceSequence::first(),
        }
    }

    /// Stamps and returns the next evidence event in sequence. `now_utc_us`
    /// is supplied by the caller (from `MasterClock::now_utc_us`) rather
    /// than read here, keeping this module a pure stamper with no direct
    /// clock dependency.
    pub fn emit(&mut self, now_utc_us: i64, payload: EvidencePayload) -> EvidenceFromAir {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.next();
        EvidenceFromAir {
            sequence,
            event_uuid: EventUuid::new(),
            channel_id: self.channel_id.clone(),
            emitted_at_utc_us: now_utc_us,
            payload,
        }
    }
}

/// A narrow capability a transport (HTTP/WebSocket in `air-control`, or a
/// test capture) implements to receive evidence as it is produced. Kept
/// here, not in `air-control`, so the Pipeline Manager can hold a
/// `dyn EvidenceSink` without a dependency on the control-surface crate.
pub trait EvidenceSink: Send {
    fn submit(&mut self, event: EvidenceFromAir);
}

/// Discards everything. Used when no sink is attached: an absent sink is
/// a legal discard, never emission suppression — the emitter keeps
/// stamping and advancing sequence numbers regardless.
pub struct NullEvidenceSink;

impl EvidenceSink for NullEvidenceSink {
    fn submit(&mut self, _event: EvidenceFromAir) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_starts_at_one_and_increments_contiguously() {
        let mut emitter = EvidenceEmitter::new(ChannelId::from("ch1"));
        let e1 = emitter.emit(0, EvidencePayload::ChannelTerminated { reason: "t".into() });
        let e2 = emitter.emit(0, EvidencePayload::ChannelTerminated { reason: "t".into() });
        assert_eq!(e1.sequence.0, 1);
        assert_eq!(e2.sequence.0, 2);
    }

    #[test]
    fn each_event_gets_a_distinct_uuid() {
        let mut emitter = EvidenceEmitter::new(ChannelId::from("ch1"));
        let e1 = emitter.emit(0, EvidencePayload::ChannelTerminated { reason: "t".into() });
        let e2 = emitter.emit(0, EvidencePayload::ChannelTerminated { reason: "t".into() });
        assert_ne!(e1.event_uuid, e2.event_uuid);
    }
}
