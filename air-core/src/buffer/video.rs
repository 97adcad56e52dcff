use super::{Ring, Shared};
use std::sync::Arc;

/// One decoded, scaled video frame ready for presentation, stamped with its
/// output-grid presentation time. `plane` is a packed RGB/YUV buffer in the
/// house format's pixel layout; the mux sink re-encodes it, it never
/// inspects format beyond what the configured encoder expects.
#[derive(Debug, Clone)]
pub struct VideoFrameData {
    pub plane: Arc<[u8]>,
    pub pts_us: i64,
    pub duration_us: i64,
}

/// Fixed-depth ring of decoded video frames produced ahead of consumption
/// by a `TickProducer`'s fill thread.
pub struct VideoLookaheadBuffer {
    ring: Shared<VideoFrameData>,
}

impl VideoLookaheadBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Arc::new(Ring::new(capacity)),
        }
    }

    pub fn handle(&self) -> Shared<VideoFrameData> {
        Arc::clone(&self.ring)
    }

    /// Never blocks: called from the tick thread.
    pub fn try_pop_frame(&self) -> Option<VideoFrameData> {
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

/// Called from the dedicated fill thread; blocks when the ring is full.
pub fn push_frame_blocking(ring: &Shared<VideoFrameData>, frame: VideoFrameData) -> Result<(), ()> {
    ring.push_blocking(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_on_empty_is_none_never_blocks() {
        let buf = VideoLookaheadBuffer::new(4);
        assert!(buf.try_pop_frame().is_none());
    }

    #[test]
    fn push_then_pop_preserves_order() {
        let buf = VideoLookaheadBuffer::new(4);
        let h = buf.handle();
        for i in 0..3 {
            push_frame_blocking(
                &h,
                VideoFrameData {
                    plane: Arc::from(vec![0u8; 1]),
                    pts_us: i * 1000,
                    duration_us: 1000,
                },
            )
            .unwrap();
        }
        assert_eq!(buf.try_pop_frame().unwrap().pts_us, 0);
        assert_eq!(buf.try_pop_frame().unwrap().pts_us, 1000);
        assert_eq!(buf.depth(), 1);
    }

    #[test]
    fn fill_thread_blocks_at_capacity_and_wakes_on_pop() {
        let buf = VideoLookaheadBuffer::new(1);
        let h = buf.handle();
        push_frame_blocking(
            &h,
            VideoFrameData {
                plane: Arc::from(vec![0u8; 1]),
                pts_us: 0,
                duration_us: 1000,
            },
        )
        .unwrap();

        let h2 = Arc::clone(&h);
        let filler = std::thread::spawn(move || {
            push_frame_blocking(
                &h2,
                VideoFrameData {
                    plane: Arc::from(vec![0u8; 1]),
                    pts_us: 1000,
                    duration_us: 1000,
                },
            )
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(buf.depth(), 1);
        buf.try_pop_frame().unwrap();
        filler.join().unwrap().unwrap();
        assert_eq!(buf.depth(), 1);
    }

    #[test]
    fn close_unblocks_waiting_filler() {
        let buf = VideoLookaheadBuffer::new(1);
        let h = buf.handle();
        push_frame_blocking(
            &h,
            VideoFrameData {
                plane: Arc::from(vec![0u8; 1]),
                pts_us: 0,
                duration_us: 1000,
            },
        )
        .unwrap();

        let h2 = Arc::clone(&h);
        let filler = std::thread::spawn(move || {
            push_frame_blocking(
                &h2,
                VideoFrameData {
                    plane: Arc::from(vec![0u8; 1]),
                    pts_us: 1000,
                    duration_us: 1000,
                },
            )
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        buf.close();
        assert!(filler.join().unwrap().is_err());
    }
}
