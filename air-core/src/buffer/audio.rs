use super::{Ring, Shared};
use std::sync::Arc;

/// One decoded audio chunk, sample-interleaved in the house channel
/// layout, stamped with its output-grid presentation time.
#[derive(Debug, Clone)]
pub struct AudioFrameData {
    pub samples: Arc<[f32]>,
    pub channels: u16,
    pub sample_rate: u32,
    pub pts_us: i64,
    pub duration_us: i64,
}

/// Fixed-depth ring of decoded audio chunks, mirroring
/// `VideoLookaheadBuffer` but independently sized — audio and video
/// producers fill on separate threads and may run at different depths.
pub struct AudioLookaheadBuffer {
    ring: Shared<AudioFrameData>,
}

impl AudioLookaheadBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Arc::new(Ring::new(capacity)),
        }
    }

    pub fn handle(&self) -> Shared<AudioFrameData> {
        Arc::clone(&self.ring)
    }

    pub fn try_pop_samples(&self) -> Option<AudioFrameData> {
        self.ring.try_pop()
    }

    pub fn depth(&self) -> usize {
        self.ring.depth()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn close(&self) {
        self.ring.close();
    }
}

pub fn push_samples_blocking(
    ring: &Shared<AudioFrameData>,
    chunk: AudioFrameData,
) -> Result<(), ()> {
    ring.push_blocking(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_on_empty_is_none() {
        let buf = AudioLookaheadBuffer::new(4);
        assert!(buf.try_pop_samples().is_none());
    }

    #[test]
    fn respects_independent_capacity() {
        let buf = AudioLookaheadBuffer::new(2);
        let h = buf.handle();
        for i in 0..2 {
            push_samples_blocking(
                &h,
                AudioFrameData {
                    samples: Arc::from(vec![0.0f32; 2]),
                    channels: 2,
                    sample_rate: 48_000,
                    pts_us: i * 1000,
                    duration_us: 1000,
                },
            )
            .unwrap();
        }
        assert_eq!(buf.depth(), buf.capacity());
    }
}
