//! The A/B state machine: the hardest and highest-weighted component in
//! this crate. Submodules split along natural seams:
//!
//! - [`ab_slot`] — the double-buffered active/preview bookkeeping.
//! - [`boundary`] — the unidirectional `BoundaryState` lifecycle.
//! - [`seam_preparer`] — off-tick-thread priming of the next segment/block.
//! - [`reaper`] — off-tick-thread teardown of retired slots.
//! - [`manager`] — the tick loop itself, gluing the above together.
//! - [`runner`] — the session scheduler: turns a `BlockPlan` queue into
//!   the `SeamPreparer` submit/poll/`commit_successor` sequence the
//!   manager needs, one seam ahead at a time.

pub mod ab_slot;
pub mod boundary;
pub mod manager;
pub mod reaper;
pub mod runner;
pub mod seam_preparer;

pub use ab_slot::{AbSlot, Slot};
pub use boundary::BoundaryState;
pub use manager::{ManagerLimits, PipelineManager, TickOutput};
pub use reaper::Reaper;
pub use runner::ChannelRunner;
pub use seam_preparer::{required_headroom_ticks, PrepareRequest, PreparedSlot, SeamPreparer};
