//! Typed error enums for every `air-core` subsystem. `anyhow` never appears
//! in this crate — only at the `air-cli` binary boundary and in test
//! helpers, per the ambient-stack convention this workspace follows
//! throughout.

pub use crate::clock::ClockError;

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("lookahead buffer closed while waiting for a slot")]
    Closed,
    #[error("fill loop for segment {segment_id} failed: {source}")]
    FillFailed {
        segment_id: String,
        #[source]
        source: ProducerError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("failed to open source {uri}: {detail}")]
    Open { uri: String, detail: String },
    #[error("decode error on {uri} at source pts {pts_us}us: {detail}")]
    Decode {
        uri: String,
        pts_us: i64,
        detail: String,
    },
    #[error("unsupported resample mode: input {input_fps} -> output {output_fps}")]
    UnsupportedResample {
        input_fps: crate::clock::RationalFps,
        output_fps: crate::clock::RationalFps,
    },
    #[error("prime-first-tick timed out waiting for the configured video/audio prime threshold from {uri}")]
    PrimeTimeout { uri: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Producer(#[from] ProducerError),
    #[error("block plan {block_id} rejected: {reason}")]
    PlanRejected { block_id: String, reason: String },
    #[error("boundary already in FAILED_TERMINAL, no further transitions accepted")]
    TerminalBoundary,
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}
