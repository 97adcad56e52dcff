//! Non-blocking byte sinks: the only way packets leave `air-mux`.
//!
//! Every write is non-blocking: on `EAGAIN` the sink drops the packet and
//! increments a counter; on sustained overflow of a configured threshold
//! the slow consumer is detached. No retries, no sleep-retry loops, no
//! blocking writes. A closed set of sink types sits behind a narrow
//! capability set rather than an open trait hierarchy with unbounded
//! implementers elsewhere in the workspace — `air-cli` wires exactly
//! these sink kinds.

use std::io::{ErrorKind, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Outcome of one non-blocking write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkResult {
    /// All bytes accepted.
    Consumed,
    /// The sink would have blocked; the caller drops this packet and
    /// increments its own counter. The sink is not detached on a single
    /// `WouldBlock` — only after `SinkRegistry`'s configured threshold of
    /// consecutive drops.
    WouldBlock,
    /// The sink observed a hard error (broken pipe, reset) and should be
    /// detached immediately regardless of the drop threshold.
    Detached,
}

/// A closed capability set a transport implements to receive muxed bytes.
/// No sink implementation may block the calling (mux) thread.
pub trait ByteSink: Send {
    fn try_consume_bytes(&mut self, bytes: &[u8]) -> SinkResult;
    fn on_detach(&mut self) {}
    fn name(&self) -> &str;
}

/// Discards everything. The legal "no sink attached yet" state: an absent
/// sink is a legal discard, never emission suppression, mirroring the
/// same rule `air-core::evidence::NullEvidenceSink` follows for evidence.
pub struct NullSink;

impl ByteSink for NullSink {
    fn try_consume_bytes(&mut self, _bytes: &[u8]) -> SinkResult {
        SinkResult::Consumed
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Captures every write verbatim. Used by tests and by `air-cli`'s
/// `--capture` diagnostic mode.
#[derive(Default)]
pub struct TestCaptureSink {
    pub captured: Vec<u8>,
    pub consume_calls: usize,
}

impl ByteSink for TestCaptureSink {
    fn try_consume_bytes(&mut self, bytes: &[u8]) -> SinkResult {
        self.captured.extend_from_slice(bytes);
        self.consume_calls += 1;
        SinkResult::Consumed
    }

    fn name(&self) -> &str {
        "test-capture"
    }
}

/// A Unix domain socket, opened in non-blocking mode so `write` never
/// suspends the mux thread. The fan-out process (outside this crate's
/// scope) connects as a client.
#[cfg(unix)]
pub struct UnixSocketSink {
    stream: UnixStream,
    label: String,
}

#[cfg(unix)]
impl UnixSocketSink {
    pub fn new(stream: UnixStream) -> std::io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            label: "unix-socket".to_string(),
            stream,
        })
    }
}

#[cfg(unix)]
impl ByteSink for UnixSocketSink {
    fn try_consume_bytes(&mut self, bytes: &[u8]) -> SinkResult {
        write_nonblocking(&mut self.stream, bytes)
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// A TCP connection to the fan-out process, non-blocking for the same
/// reason as [`UnixSocketSink`].
pub struct TcpSink {
    stream: TcpStream,
    label: String,
}

impl TcpSink {
    pub fn new(stream: TcpStream) -> std::io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            label: "tcp".to_string(),
            stream,
        })
    }
}

impl ByteSink for TcpSink {
    fn try_consume_bytes(&mut self, bytes: &[u8]) -> SinkResult {
        write_nonblocking(&mut self.stream, bytes)
    }

    fn name(&self) -> &str {
        &self.label
    }
}

fn write_nonblocking<W: Write>(w: &mut W, bytes: &[u8]) -> SinkResult {
    match w.write_all(bytes) {
        Ok(()) => SinkResult::Consumed,
        Err(e) if e.kind() == ErrorKind::WouldBlock => SinkResult::WouldBlock,
        Err(_) => SinkResult::Detached,
    }
}

struct Attached {
    sink: Box<dyn ByteSink>,
    consecutive_drops: u32,
}

/// Fans one muxed byte stream out to every attached sink. Owned by the
/// PCR-paced mux loop; `emit` is called once per muxed write and never
/// blocks regardless of how many sinks are attached or how slow any one of
/// them is.
pub struct SinkRegistry {
    sinks: Vec<Attached>,
    drop_threshold: u32,
    pub dropped_packets: u64,
    pub detached_sinks: u64,
}

impl SinkRegistry {
    /// `drop_threshold` is the number of *consecutive* `WouldBlock`
    /// results from one sink before it is detached as a sustained
    /// overflow.
    pub fn new(drop_threshold: u32) -> Self {
        Self {
            sinks: Vec::new(),
            drop_threshold,
            dropped_packets: 0,
            detached_sinks: 0,
        }
    }

    pub fn attach(&mut self, sink: Box<dyn ByteSink>) {
        self.sinks.push(Attached {
            sink,
            consecutive_drops: 0,
        });
    }

    /// Detaches every currently attached sink, calling `on_detach` on each.
    /// Used by `DetachSink` / `StopChannel`.
    pub fn detach_all(&mut self) {
        for mut attached in self.sinks.drain(..) {
            attached.sink.on_detach();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Writes `bytes` to every attached sink. Never blocks: a
    /// `WouldBlock` increments `dropped_packets` and the sink's
    /// consecutive-drop counter; a hard error or a threshold breach
    /// detaches the sink outright.
    pub fn emit(&mut self, bytes: &[u8]) {
        let mut detach_indices = Vec::new();
        for (i, attached) in self.sinks.iter_mut().enumerate() {
            match attached.sink.try_consume_bytes(bytes) {
                SinkResult::Consumed => attached.consecutive_drops = 0,
                SinkResult::WouldBlock => {
                    attached.consecutive_drops += 1;
                    self.dropped_packets += 1;
                    if attached.consecutive_drops >= self.drop_threshold {
                        detach_indices.push(i);
                    }
                }
                SinkResult::Detached => detach_indices.push(i),
            }
        }
        for &i in detach_indices.iter().rev() {
            let mut attached = self.sinks.remove(i);
            attached.sink.on_detach();
            self.detached_sinks += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysBlock;
    impl ByteSink for AlwaysBlock {
        fn try_consume_bytes(&mut self, _bytes: &[u8]) -> SinkResult {
            SinkResult::WouldBlock
        }
        fn name(&self) -> &str {
            "always-block"
        }
    }

    #[test]
    fn emit_with_no_sinks_is_a_legal_discard() {
        let mut reg = SinkRegistry::new(3);
        reg.emit(b"hello");
        assert_eq!(reg.dropped_packets, 0);
    }

    #[test]
    fn capture_sink_receives_bytes() {
        let mut reg = SinkRegistry::new(3);
        reg.attach(Box::new(TestCaptureSink::default()));
        reg.emit(b"abc");
        reg.emit(b"def");
        assert_eq!(reg.dropped_packets, 0);
    }

    #[test]
    fn sustained_blocking_detaches_after_threshold() {
        let mut reg = SinkRegistry::new(3);
        reg.attach(Box::new(AlwaysBlock));
        assert!(!reg.is_empty());
        for _ in 0..3 {
            reg.emit(b"x");
        }
        assert_eq!(reg.dropped_packets, 3);
        assert_eq!(reg.detached_sinks, 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn one_slow_sink_never_blocks_emit_to_others() {
        let mut reg = SinkRegistry::new(100);
        reg.attach(Box::new(AlwaysBlock));
        reg.attach(Box::new(TestCaptureSink::default()));
        for _ in 0..10 {
            reg.emit(b"x");
        }
        assert_eq!(reg.dropped_packets, 10);
        assert_eq!(reg.detached_sinks, 0);
    }
}
