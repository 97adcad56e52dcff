//! H.264/AAC elementary stream encoding.
//!
//! `air-mux`'s TS layer (`crate::ts`) is hand-rolled for byte-level control
//! over continuity counters and PCR cadence; this module is the one place
//! `ffmpeg-the-third` still appears, wrapping its `encoder::video`/
//! `encoder::audio` the same way `velocut-media::encode` drives
//! `ffmpeg_the_third::encoder` — open once per channel session, feed one
//! frame at a time, drain whatever packets come back.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::{self, Id as CodecId};
use ffmpeg::encoder;
use ffmpeg::format::{sample::Type as SampleType, Pixel, Sample};
use ffmpeg::software::resampling;
use ffmpeg::software::scaling::{Context as ScaleCtx, Flags as ScaleFlags};
use ffmpeg::util::channel_layout::ChannelLayoutMask;
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::util::rational::Rational;

use crate::error::MuxError;

/// One encoded access unit plus the bit this muxer's IDR gate and PES
/// layer need to know about it.
pub struct EncodedVideoPacket {
    pub data: Vec<u8>,
    pub is_idr: bool,
}

pub struct EncodedAudioPacket {
    pub data: Vec<u8>,
}

/// Wraps an H.264 encoder at a fixed house resolution/frame rate. Input
/// frames are packed RGB24 planes (the format `air_core::buffer::VideoFrameData`
/// carries); this encoder owns the RGB->YUV420P conversion.
pub struct VideoEncoder {
    encoder: encoder::video::Video,
    scaler: ScaleCtx,
    width: u32,
    height: u32,
}

impl VideoEncoder {
    pub fn new(width: u32, height: u32, fps_num: i64, fps_den: i64) -> Result<Self, MuxError> {
        let codec = encoder::find(CodecId::H264).ok_or(MuxError::EncoderOpen {
            codec: "h264",
            detail: "libx264 encoder not available in this ffmpeg build".into(),
        })?;
        let context = codec::Context::new_with_codec(codec);
        let mut video = context.encoder().video().map_err(|e| MuxError::EncoderOpen {
            codec: "h264",
            detail: e.to_string(),
        })?;
        video.set_width(width);
        video.set_height(height);
        video.set_format(Pixel::YUV420P);
        video.set_time_base(Rational::new(fps_den as i32, fps_num as i32));
        video.set_frame_rate(Some(Rational::new(fps_num as i32, fps_den as i32)));
        video.set_gop(fps_num as u32 / fps_den.max(1) as u32 * 2);
        video.set_max_b_frames(0);

        let encoder = video.open().map_err(|e| MuxError::EncoderOpen {
            codec: "h264",
            detail: e.to_string(),
        })?;

        let scaler = ScaleCtx::get(
            Pixel::RGB24,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            ScaleFlags::BILINEAR,
        )
        .map_err(|e| MuxError::EncoderOpen {
            codec: "h264",
            detail: e.to_string(),
        })?;

        Ok(Self {
            encoder,
            scaler,
            width,
            height,
        })
    }

    /// Encodes one RGB24 plane, stamped with `pts` in the encoder's
    /// configured time base (an output tick index, not microseconds —
    /// the caller passes `session_frame_index` so every encoded frame's
    /// input pts is monotone by construction). Returns zero or more
    /// packets (an encoder may buffer internally before it starts
    /// emitting, though with `max_b_frames=0` this is normally one in,
    /// one or zero out).
    pub fn encode(&mut self, rgb_plane: &[u8], pts: i64) -> Result<Vec<EncodedVideoPacket>, MuxError> {
        let mut rgb = VideoFrame::new(Pixel::RGB24, self.width, self.height);
        rgb.data_mut(0)[..rgb_plane.len().min(rgb.data(0).len())]
            .copy_from_slice(&rgb_plane[..rgb_plane.len().min(rgb.data(0).len())]);

        let mut yuv = VideoFrame::new(Pixel::YUV420P, self.width, self.height);
        self.scaler.run(&rgb, &mut yuv).map_err(|e| MuxError::Encode {
            codec: "h264",
            detail: e.to_string(),
        })?;
        yuv.set_pts(Some(pts));

        self.encoder.send_frame(&yuv).map_err(|e| MuxError::Encode {
            codec: "h264",
            detail: e.to_string(),
        })?;

        self.drain()
    }

    /// Flushes any frames the encoder is still holding, e.g. at
    /// `StopChannel`.
    pub fn flush(&mut self) -> Result<Vec<EncodedVideoPacket>, MuxError> {
        self.encoder.send_eof().map_err(|e| MuxError::Encode {
            codec: "h264",
            detail: e.to_string(),
        })?;
        self.drain()
    }

    fn drain(&mut self) -> Result<Vec<EncodedVideoPacket>, MuxError> {
        let mut packets = Vec::new();
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            let data = packet.data().unwrap_or(&[]).to_vec();
            let is_idr = packet.is_key();
            packets.push(EncodedVideoPacket { data, is_idr });
            packet = ffmpeg::Packet::empty();
        }
        Ok(packets)
    }
}

/// Wraps an AAC encoder at a fixed house sample rate/channel count. Input
/// is interleaved f32 PCM (the format `air_core::buffer::AudioFrameData`
/// carries); this encoder owns interleaved-to-planar resampling and the
/// encoder's fixed frame-size FIFO.
pub struct AudioEncoder {
    encoder: encoder::audio::Audio,
    resampler: resampling::Context,
    sample_rate: u32,
    channels: u16,
    frame_size: usize,
    fifo_left: Vec<f32>,
    fifo_right: Vec<f32>,
    next_pts: i64,
}

impl AudioEncoder {
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self, MuxError> {
        let codec = encoder::find(CodecId::AAC).ok_or(MuxError::EncoderOpen {
            codec: "aac",
            detail: "AAC encoder not available in this ffmpeg build".into(),
        })?;
        let context = codec::Context::new_with_codec(codec);
        let mut audio = context.encoder().audio().map_err(|e| MuxError::EncoderOpen {
            codec: "aac",
            detail: e.to_string(),
        })?;
        let layout = if channels >= 2 {
            ChannelLayoutMask::STEREO
        } else {
            ChannelLayoutMask::MONO
        };
        audio.set_rate(sample_rate as i32);
        audio.set_channel_layout(layout);
        audio.set_format(Sample::F32(SampleType::Planar));
        audio.set_time_base(Rational::new(1, sample_rate as i32));

        let encoder = audio.open().map_err(|e| MuxError::EncoderOpen {
            codec: "aac",
            detail: e.to_string(),
        })?;
        let frame_size = if encoder.frame_size() > 0 {
            encoder.frame_size() as usize
        } else {
            1024
        };

        let resampler = resampling::Context::get(
            Sample::F32(SampleType::Packed),
            layout,
            sample_rate,
            Sample::F32(SampleType::Planar),
            layout,
            sample_rate,
        )
        .map_err(|e| MuxError::EncoderOpen {
            codec: "aac",
            detail: e.to_string(),
        })?;

        Ok(Self {
            encoder,
            resampler,
            sample_rate,
            channels,
            frame_size,
            fifo_left: Vec::new(),
            fifo_right: Vec::new(),
            next_pts: 0,
        })
    }

    /// Pushes interleaved f32 PCM and drains any complete
    /// `frame_size`-length encoder frames it produces. Leftover samples
    /// shorter than `frame_size` carry over to the next call, exactly as
    /// `velocut-media`'s `AudioFifo` does across clip boundaries — here
    /// across tick-sized pushes instead of source-clip boundaries.
    pub fn push_samples(&mut self, interleaved: &[f32]) -> Result<Vec<EncodedAudioPacket>, MuxError> {
        let channels = self.channels.max(1) as usize;
        for frame in interleaved.chunks(channels) {
            self.fifo_left.push(frame[0]);
            self.fifo_right.push(if channels >= 2 { frame[1] } else { frame[0] });
        }
        self.drain_fifo(false)
    }

    pub fn flush(&mut self) -> Result<Vec<EncodedAudioPacket>, MuxError> {
        let tail = self.drain_fifo(true)?;
        self.encoder.send_eof().map_err(|e| MuxError::Encode {
            codec: "aac",
            detail: e.to_string(),
        })?;
        let mut out = tail;
        out.extend(self.drain_packets()?);
        Ok(out)
    }

    fn drain_fifo(&mut self, flush_tail: bool) -> Result<Vec<EncodedAudioPacket>, MuxError> {
        let mut out = Vec::new();
        while self.fifo_left.len() >= self.frame_size
            || (flush_tail && !self.fifo_left.is_empty())
        {
            let n = self.frame_size.min(self.fifo_left.len().max(1));
            let take = if flush_tail { self.fifo_left.len().min(self.frame_size) } else { n };
            let mut frame = AudioFrame::new(
                Sample::F32(SampleType::Planar),
                self.frame_size,
                if self.channels >= 2 {
                    ChannelLayoutMask::STEREO
                } else {
                    ChannelLayoutMask::MONO
                },
            );
            frame.set_rate(self.sample_rate);
            frame.set_pts(Some(self.next_pts));

            {
                let ldst_len = frame.data(0).len() / 4;
                let l: Vec<f32> = self
                    .fifo_left
                    .drain(..take.min(self.fifo_left.len()))
                    .collect();
                let mut l_padded = l;
                l_padded.resize(ldst_len, 0.0);
                let bytes: Vec<u8> = l_padded.iter().flat_map(|s| s.to_le_bytes()).collect();
                frame.data_mut(0)[..bytes.len()].copy_from_slice(&bytes);
            }
            {
                let r: Vec<f32> = self
                    .fifo_right
                    .drain(..take.min(self.fifo_right.len()))
                    .collect();
                let rdst_len = frame.data(1).len() / 4;
                let mut r_padded = r;
                r_padded.resize(rdst_len, 0.0);
                let bytes: Vec<u8> = r_padded.iter().flat_map(|s| s.to_le_bytes()).collect();
                frame.data_mut(1)[..bytes.len()].copy_from_slice(&bytes);
            }

            self.next_pts += self.frame_size as i64;

            let mut resampled = AudioFrame::empty();
            self.resampler
                .run(&frame, &mut resampled)
                .map_err(|e| MuxError::Encode {
                    codec: "aac",
                    detail: e.to_string(),
                })?;

            self.encoder.send_frame(&resampled).map_err(|e| MuxError::Encode {
                codec: "aac",
                detail: e.to_string(),
            })?;
            out.extend(self.drain_packets()?);

            if flush_tail {
                break;
            }
        }
        Ok(out)
    }

    fn drain_packets(&mut self) -> Result<Vec<EncodedAudioPacket>, MuxError> {
        let mut packets = Vec::new();
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            let data = packet.data().unwrap_or(&[]).to_vec();
            packets.push(EncodedAudioPacket { data: adts_wrap(&data, self.sample_rate, self.channels) });
            packet = ffmpeg::Packet::empty();
        }
        Ok(packets)
    }
}

/// Wraps a raw AAC frame in a 7-byte ADTS header, since `air-mux`'s PMT
/// declares `STREAM_TYPE_AAC_ADTS`: a standard decoder expects ADTS
/// framing on this stream type, not bare LOAS/raw AAC.
fn adts_wrap(raw_aac: &[u8], sample_rate: u32, channels: u16) -> Vec<u8> {
    const SAMPLE_RATES: [u32; 13] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
    ];
    let freq_idx = SAMPLE_RATES
        .iter()
        .position(|&r| r == sample_rate)
        .unwrap_or(3) as u8; // default 48000
    let chan_cfg = channels.clamp(1, 7) as u8;
    let frame_len = raw_aac.len() + 7;

    let mut out = Vec::with_capacity(frame_len);
    out.push(0xFF);
    out.push(0xF1); // MPEG-4, no CRC
    out.push((0b01 << 6) | (freq_idx << 2) | (chan_cfg >> 2)); // AAC-LC profile
    out.push(((chan_cfg & 0x3) << 6) | ((frame_len >> 11) as u8 & 0x03));
    out.push((frame_len >> 3) as u8);
    out.push((((frame_len & 0x7) as u8) << 5) | 0x1F);
    out.push(0xFC);
    out.extend_from_slice(raw_aac);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adts_header_carries_correct_frame_length() {
        let raw = vec![0u8; 100];
        let wrapped = adts_wrap(&raw, 48_000, 2);
        assert_eq!(wrapped.len(), 107);
        assert_eq!(wrapped[0], 0xFF);
        assert_eq!(wrapped[1], 0xF1);
        let frame_len = (((wrapped[3] as usize) & 0x03) << 11)
            | ((wrapped[4] as usize) << 3)
            | ((wrapped[5] as usize) >> 5);
        assert_eq!(frame_len, 107);
    }
}
