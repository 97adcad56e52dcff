//! The control surface and durable evidence/as-run writers for the AIR
//! playout engine.
//!
//! This crate is the thinnest layer in the workspace on purpose: it never
//! touches a tick. It owns the HTTP surface (`StartBlockPlanSession`,
//! `FeedBlockPlan`, `AttachSink`/`DetachSink`, `StopChannel`, the
//! evidence WebSocket), the per-channel session lifecycle that wires
//! `air-core`'s `ChannelRunner` to `air-mux`'s `MuxLoop`, the durable
//! evidence spool, and the as-run writer. Everything here runs on async
//! Tokio tasks; the tick thread those tasks eventually drive lives
//! entirely inside `air-core` and is never awaited from here.
//!
//! - [`server`] -- the Axum router and its route handlers.
//! - [`session`] -- `ChannelSession`, the per-channel wiring of tick
//!   thread, mux thread and evidence plumbing.
//! - [`spool`] -- durable JSONL evidence spool, replayed on reconnect.
//! - [`asrun`] -- the fixed-width `.asrun` + `.jsonl` as-run writer.
//! - [`logs`] -- SSE log fan-out, shared with the rest of the workspace's
//!   HTTP surfaces.
//! - [`error`] -- `ControlError`, the typed error this crate's handlers
//!   translate into HTTP status codes.

pub mod asrun;
pub mod error;
pub mod logs;
pub mod server;
pub mod session;
pub mod spool;

pub use error::ControlError;
pub use logs::{LogState, create_logs_router, init_logging};
pub use server::{AppState, build_router, serve};
pub use session::{
    ChannelSession, HouseFormat, SessionSnapshot, SinkSpec, StartBlockPlanSessionRequest,
};
pub use spool::EvidenceSpool;
