//! `SeamPreparer`: primes the next segment or block's `TickProducer` off
//! the tick thread, ahead of the seam/fence it will serve.
//!
//! Preroll ownership authority hinges on this: submitting work to the
//! preparer must never, by itself, make the result the committed
//! successor. Only the code that *takes* a finished [`PreparedSlot`] out
//! of [`SeamPreparer::poll`] and passes it to
//! `PipelineManager::commit_successor` stamps `expected_next_block_id`.
//! The preparer itself has no notion of "committed" — it only primes and
//! hands back what it primed.

use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;

use crate::buffer::{AudioLookaheadBuffer, VideoLookaheadBuffer};
use crate::error::ProducerError;
use crate::ids::{BlockId, SegmentId};
use crate::pipeline::ab_slot::Slot;
use crate::plan::{Segment, SegmentType};
use crate::producer::{OutputFormat, TickProducer};

/// A successfully primed slot plus the identity the manager needs to
/// validate it against `expected_next_block_id` at commit time.
pub struct PreparedSlot {
    pub block_id: BlockId,
    pub fence_tick: i64,
    pub slot: Slot,
}

/// Minimum lookahead the preparer needs before a CONTENT→CONTENT seam:
/// `max(8 frames, ceil(250ms / frame_period))`. Exposed as a free function
/// so the pipeline manager and tests can compute it without constructing
/// a preparer.
pub fn required_headroom_ticks(frame_period_us: i64) -> i64 {
    let ms_headroom = (250_000 + frame_period_us - 1) / frame_period_us;
    ms_headroom.max(8)
}

/// Priming work submitted to the preparer: which segment, at what house
/// tick it is scheduled to start, which block it belongs to and that
/// block's fence (for a block-level prepare) or `i64::MAX` segment seams
/// that are not fence-gated.
pub struct PrepareRequest {
    pub block_id: BlockId,
    pub fence_tick: i64,
    pub segment: Segment,
    pub video_capacity: usize,
    pub audio_capacity: usize,
}

/// Runs priming on a dedicated worker thread so the tick thread is never
/// blocked on a decoder open/seek. One `SeamPreparer` is created per
/// channel session; it outlives any individual prepare request.
pub struct SeamPreparer {
    tx: Sender<PrepareRequest>,
    rx: Receiver<Result<PreparedSlot, (BlockId, SegmentId, ProducerError)>>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl SeamPreparer {
    /// `min_audio_prime_ms`/`min_video_prime_frames` are the prime
    /// thresholds every `TickProducer` this preparer spawns must reach
    /// before a segment is admitted to the A/B slot; constant for the
    /// lifetime of the channel session, so they are captured here rather
    /// than threaded through each `PrepareRequest`.
    pub fn spawn(output: OutputFormat, min_audio_prime_ms: i64, min_video_prime_frames: usize) -> Self {
        let (req_tx, req_rx) = channel::<PrepareRequest>();
        let (res_tx, res_rx) = channel();

        let worker = std::thread::Builder::new()
            .name("air-seam-preparer".into())
            .spawn(move || {
                for req in req_rx {
                    let segment_id = req.segment.segment_id.clone();
                    let block_id = req.block_id.clone();
                    let result = prepare_one(req, output, min_audio_prime_ms, min_video_prime_frames);
                    let sent = match result {
                        Ok(slot) => res_tx.send(Ok(slot)),
                        Err(e) => res_tx.send(Err((block_id, segment_id, e))),
                    };
                    if sent.is_err() {
                        break;
                    }
                }
            })
            .expect("failed to spawn seam preparer thread");

        Self {
            tx: req_tx,
            rx: res_rx,
            worker: Some(worker),
        }
    }

    /// Submits a prepare request. This does NOT commit anything — it only
    /// queues priming work. Ownership only transfers when a caller later
    /// `poll`s a result and explicitly takes it into preview.
    pub fn submit(&self, request: PrepareRequest) {
        if self.tx.send(request).is_err() {
            tracing::error!("seam preparer worker has exited; request dropped");
        }
    }

    /// Non-blocking poll for a finished prepare. The tick thread calls this
    /// once per iteration; it never waits.
    pub fn poll(&self) -> Option<Result<PreparedSlot, (BlockId, SegmentId, ProducerError)>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }
}

impl Drop for SeamPreparer {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

fn prepare_one(
    req: PrepareRequest,
    output: OutputFormat,
    min_audio_prime_ms: i64,
    min_video_prime_frames: usize,
) -> Result<PreparedSlot, ProducerError> {
    let video = Arc::new(VideoLookaheadBuffer::new(req.video_capacity));
    let audio = Arc::new(AudioLookaheadBuffer::new(req.audio_capacity));
    let is_pad = req.segment.kind == SegmentType::Pad;

    let producer = if is_pad {
        None
    } else {
        Some(TickProducer::spawn(
            req.segment.clone(),
            output,
            Arc::clone(&video),
            Arc::clone(&audio),
            min_audio_prime_ms,
            min_video_prime_frames,
        )?)
    };

    Ok(PreparedSlot {
        block_id: req.block_id,
        fence_tick: req.fence_tick,
        slot: Slot {
            segment_id: req.segment.segment_id,
            video,
            audio,
            producer,
            start_tick: 0,
            is_pad,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::RationalFps;

    #[test]
    fn required_headroom_is_at_least_eight_frames() {
        let fps = RationalFps::new(30, 1).unwrap();
        assert_eq!(required_headroom_ticks(fps.frame_period_us()), 8);
    }

    #[test]
    fn required_headroom_grows_for_slow_frame_rates() {
        // at 4 fps (250ms period) the 250ms floor alone already needs 1
        // tick but the 8-frame floor dominates; at 1fps it should exceed 8.
        let fps = RationalFps::new(1, 1).unwrap();
        assert!(required_headroom_ticks(fps.frame_period_us()) > 8);
    }

    #[test]
    fn pad_prepare_request_never_touches_a_decoder() {
        let output = OutputFormat {
            width: 4,
            height: 4,
            fps: RationalFps::new(30, 1).unwrap(),
            sample_rate: 48_000,
            channels: 2,
        };
        let preparer = SeamPreparer::spawn(output, 500, 1);
        preparer.submit(PrepareRequest {
            block_id: BlockId::from("b1"),
            fence_tick: 10,
            segment: Segment {
                segment_id: SegmentId::from("pad-1"),
                kind: SegmentType::Pad,
                source_fps: None,
                duration_ticks: 30,
                source_uri: None,
                trim_in_us: 0,
            },
            video_capacity: 8,
            audio_capacity: 8,
        });

        let mut result = None;
        for _ in 0..200 {
            if let Some(r) = preparer.poll() {
                result = Some(r);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        let prepared = result.expect("pad prepare should complete quickly").unwrap();
        assert!(prepared.slot.is_pad);
        assert!(prepared.slot.producer.is_none());
    }
}
