//! Typed errors for `air-mux`. Mirrors `air-core::error`'s convention:
//! `thiserror` enums here, `anyhow` only at the `air-cli` binary boundary.

#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("failed to open {codec} encoder: {detail}")]
    EncoderOpen { codec: &'static str, detail: String },
    #[error("{codec} encode failed: {detail}")]
    Encode { codec: &'static str, detail: String },
    #[error("no video stream configured on this muxer")]
    NoVideoStream,
    #[error("no audio stream configured on this muxer")]
    NoAudioStream,
}
