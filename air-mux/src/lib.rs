#![doc = r#"
air-mux — the Encoder/Mux Sink.

Takes the `air-core` tick loop's one-frame-pair-per-tick output and turns
it into a persistent, PCR-paced MPEG-TS byte stream: fixed PIDs across
every block/segment swap, monotone PTS/DTS, periodic PAT/PMT re-emission
independent of media flow, IDR gating, and non-blocking fan-out to one or
more byte sinks. The muxer is created once per channel session and is
never restarted by a swap — only `air-core::pipeline` changes which
decoder feeds it.
"#]

pub mod encoder;
pub mod error;
pub mod mux;
pub mod sink;
pub mod ts;

pub use encoder::{AudioEncoder, EncodedAudioPacket, EncodedVideoPacket, VideoEncoder};
pub use error::MuxError;
pub use mux::{MuxCommand, MuxInput, MuxLoop, MuxSink};
pub use sink::{ByteSink, NullSink, SinkRegistry, SinkResult, TcpSink, TestCaptureSink};
#[cfg(unix)]
pub use sink::UnixSocketSink;
