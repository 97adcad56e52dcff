//! Block plans: the unit of scheduling fed to a channel session via
//! `FeedBlockPlan`. A plan is a strictly ordered list of segments; the
//! Pipeline Manager consumes it tick by tick and never reorders it.

use crate::clock::RationalFps;
use crate::ids::{BlockId, SegmentId};

/// A single playable unit inside a block: one media file (or pad request)
/// with its own source fps, trim points and target duration on the house
/// grid.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Segment {
    pub segment_id: SegmentId,
    pub kind: SegmentType,
    /// Source media fps, used to pick the resample mode against the house
    /// format. Ignored for `SegmentType::Pad`.
    pub source_fps: Option<RationalFps>,
    /// Duration on the house output grid, in output ticks. Authoritative —
    /// the segment is truncated or padded to hit this exactly at the seam.
    pub duration_ticks: u64,
    /// Source URI (file path or stream locator). `None` for `Pad`.
    pub source_uri: Option<String>,
    /// In-point within the source, in source microseconds.
    pub trim_in_us: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SegmentType {
    Content,
    Pad,
}

/// An ordered sequence of segments scheduled to begin at a specific house
/// tick. Blocks are the unit of `FeedBlockPlan`; a session may have at most
/// one block prepared ahead of the currently airing one (see
/// `air-core::pipeline`'s preroll ownership authority).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BlockPlan {
    pub block_id: BlockId,
    /// House tick at which this block is scheduled to begin airing. The
    /// fence is this value; the Pipeline Manager never starts a block
    /// early and holds at most `HOLD_MAX_MS` late.
    pub fence_tick: u64,
    pub segments: Vec<Segment>,
}

impl BlockPlan {
    /// Total duration of the block on the house grid, in output ticks.
    pub fn duration_ticks(&self) -> u64 {
        self.segments.iter().map(|s| s.duration_ticks).sum()
    }

    /// The tick (block-relative) at which segment `index` begins.
    pub fn segment_start_tick(&self, index: usize) -> u64 {
        self.segments[..index].iter().map(|s| s.duration_ticks).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(id: &str, ticks: u64) -> Segment {
        Segment {
            segment_id: SegmentId::from(id),
            kind: SegmentType::Content,
            source_fps: None,
            duration_ticks: ticks,
            source_uri: Some("file.mp4".into()),
            trim_in_us: 0,
        }
    }

    #[test]
    fn duration_sums_segments() {
        let plan = BlockPlan {
            block_id: BlockId::from("b1"),
            fence_tick: 0,
            segments: vec![seg("s1", 100), seg("s2", 200)],
        };
        assert_eq!(plan.duration_ticks(), 300);
        assert_eq!(plan.segment_start_tick(0), 0);
        assert_eq!(plan.segment_start_tick(1), 100);
    }
}
