//! Program Output & Pad Producer: a session-lifetime black/silence source
//! that the Pipeline Manager falls back to whenever content cannot meet a
//! tick deadline. Unlike a `TickProducer`, the pad producer never decodes
//! anything and never underflows — it is the backstop underflow falls
//! back to, so it must be unconditionally available for the life of the
//! session.

use std::sync::Arc;

use crate::buffer::{AudioFrameData, VideoFrameData};
use crate::clock::RationalFps;
use crate::producer::OutputFormat;

/// Synthesizes black video and silent audio at the house format, on
/// demand, with no buffering and no failure mode. Held for the lifetime of
/// the channel session, constructed once at session start.
pub struct PadProducer {
    format: OutputFormat,
    black_plane: Arc<[u8]>,
    silent_samples: Arc<[f32]>,
}

impl PadProducer {
    pub fn new(format: OutputFormat) -> Self {
        let pixel_count = format.width as usize * format.height as usize * 3;
        let black_plane: Arc<[u8]> = Arc::from(vec![0u8; pixel_count]);

        let frame_period_us = format.fps.frame_period_us();
        let sample_count =
            (frame_period_us as i64 * format.sample_rate as i64 / 1_000_000) as usize
                * format.channels as usize;
        let silent_samples: Arc<[f32]> = Arc::from(vec![0.0f32; sample_count]);

        Self {
            format,
            black_plane,
            silent_samples,
        }
    }

    pub fn fps(&self) -> RationalFps {
        self.format.fps
    }

    /// A black video frame stamped at the given output tick's presentation
    /// time. Always succeeds; this is the unconditional fallback.
    pub fn pad_video_frame(&self, tick: i64) -> VideoFrameData {
        VideoFrameData {
            plane: Arc::clone(&self.black_plane),
            pts_us: self.format.fps.presentation_us(tick),
            duration_us: self.format.fps.frame_period_us(),
        }
    }

    pub fn pad_audio_frame(&self, tick: i64) -> AudioFrameData {
        AudioFrameData {
            samples: Arc::clone(&self.silent_samples),
            channels: self.format.channels,
            sample_rate: self.format.sample_rate,
            pts_us: self.format.fps.presentation_us(tick),
            duration_us: self.format.fps.frame_period_us(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt() -> OutputFormat {
        OutputFormat {
            width: 16,
            height: 16,
            fps: RationalFps::new(30, 1).unwrap(),
            sample_rate: 48_000,
            channels: 2,
        }
    }

    #[test]
    fn pad_video_is_black_and_correctly_sized() {
        let pad = PadProducer::new(fmt());
        let frame = pad.pad_video_frame(0);
        assert_eq!(frame.plane.len(), 16 * 16 * 3);
        assert!(frame.plane.iter().all(|&b| b == 0));
    }

    #[test]
    fn pad_audio_is_silent_and_correctly_sized() {
        let pad = PadProducer::new(fmt());
        let frame = pad.pad_audio_frame(0);
        assert!(frame.samples.iter().all(|&s| s == 0.0));
        // one frame period of 48kHz stereo audio: 1600 samples/channel * 2
        assert_eq!(frame.samples.len(), 1600 * 2);
    }

    #[test]
    fn pad_frames_are_always_available_never_fail() {
        let pad = PadProducer::new(fmt());
        for tick in 0..100 {
            let _ = pad.pad_video_frame(tick);
            let _ = pad.pad_audio_frame(tick);
        }
    }
}
