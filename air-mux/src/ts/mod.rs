//! MPEG-TS container-level primitives: PSI tables, PES headers, and the
//! 188-byte packetizer. Deliberately hand-rolled rather than delegated to
//! `ffmpeg-the-third`'s muxer, so `air-mux` has byte-level control over
//! continuity counters, PCR cadence and non-blocking sink fan-out — see
//! `DESIGN.md` for why this split exists. `ffmpeg-the-third` is still used,
//! in [`crate::encoder`], for the H.264/AAC elementary stream encoding this
//! module packetizes.

mod crc;
pub mod continuity;
pub mod packetizer;
pub mod pes;
pub mod psi;

pub use continuity::ContinuityCounters;
pub use packetizer::{packetize_pes, packetize_psi_section, Pcr, TS_PACKET_LEN};
pub use pes::{build_pes, STREAM_ID_AUDIO, STREAM_ID_VIDEO};
pub use psi::{
    build_pat_section, build_pmt_section, AUDIO_PID, PAT_PID, PMT_PID, PROGRAM_NUMBER, VIDEO_PID,
};
