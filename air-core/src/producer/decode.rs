//! TickProducer: one decoder instance per segment, filling its
//! `VideoLookaheadBuffer`/`AudioLookaheadBuffer` from a dedicated fill
//! thread. Decode itself uses `ffmpeg-the-third`, the same crate family
//! `Eric-Lautanen-velocut`'s media crate uses for both decode and encode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::media::Type as MediaType;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags as SwsFlags};

use crate::buffer::{
    push_frame_blocking, push_samples_blocking, AudioFrameData, AudioLookaheadBuffer,
    VideoFrameData, VideoLookaheadBuffer,
};
use crate::clock::RationalFps;
use crate::error::ProducerError;
use crate::plan::Segment;
use crate::producer::resample::{select_resample_mode, CadenceAccumulator, ResampleMode};

/// House video/audio format the producer must deliver frames in,
/// regardless of source format. Owned by `air-config::HouseFormat` and
/// passed down; duplicated here as a narrow view so `air-core` doesn't
/// depend on `air-config`.
#[derive(Debug, Clone, Copy)]
pub struct OutputFormat {
    pub width: u32,
    pub height: u32,
    pub fps: RationalFps,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Drives decode of one segment on a dedicated fill thread, pushing
/// frames/samples into the supplied lookahead buffers until the segment's
/// duration is exhausted or the decoder reports EOF.
pub struct TickProducer {
    stop: Arc<AtomicBool>,
}

impl TickProducer {
    /// Spawns the fill thread for `segment` against `output`. Returns
    /// immediately; the caller reads frames via the lookahead buffers'
    /// `try_pop_*` methods from the tick thread.
    ///
    /// Per the one documented synchronous exception, this call blocks the
    /// calling thread until at least `min_video_prime_frames` video frames
    /// and `min_audio_prime_ms` of audio have been decoded and pushed, so
    /// the segment is never admitted to the A/B slot before it can
    /// actually produce output.
    pub fn spawn(
        segment: Segment,
        output: OutputFormat,
        video_buf: Arc<VideoLookaheadBuffer>,
        audio_buf: Arc<AudioLookaheadBuffer>,
        min_audio_prime_ms: i64,
        min_video_prime_frames: usize,
    ) -> Result<Self, ProducerError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);

        let uri = segment
            .source_uri
            .clone()
            .ok_or_else(|| ProducerError::Open {
                uri: "<pad>".into(),
                detail: "content segment missing source_uri".into(),
            })?;

        let (primed_tx, primed_rx) = std::sync::mpsc::channel::<Result<(), ProducerError>>();

        let uri_for_thread = uri.clone();
        std::thread::Builder::new()
            .name(format!("tick-producer-{}", segment.segment_id))
            .spawn(move || {
                let result = run_fill_loop(
                    &uri_for_thread,
                    segment,
                    output,
                    &video_buf,
                    &audio_buf,
                    &stop_for_thread,
                    &primed_tx,
                    min_audio_prime_ms,
                    min_video_prime_frames,
                );
                if let Err(err) = result {
                    tracing::warn!(uri = %uri_for_thread, error = %err, "tick producer fill loop exited");
                }
            })
            .map_err(|e| ProducerError::Open {
                uri: uri.clone(),
                detail: e.to_string(),
            })?;

        primed_rx
            .recv()
            .map_err(|_| ProducerError::PrimeTimeout { uri: uri.clone() })??;

        Ok(Self { stop })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for TickProducer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn run_fill_loop(
    uri: &str,
    segment: Segment,
    output: OutputFormat,
    video_buf: &Arc<VideoLookaheadBuffer>,
    audio_buf: &Arc<AudioLookaheadBuffer>,
    stop: &Arc<AtomicBool>,
    primed_tx: &std::sync::mpsc::Sender<Result<(), ProducerError>>,
    min_audio_prime_ms: i64,
    min_video_prime_frames: usize,
) -> Result<(), ProducerError> {
    let min_audio_prime_us = min_audio_prime_ms.max(0) * 1_000;
    let min_video_prime_frames = min_video_prime_frames as i64;
    let mut ictx = ffmpeg::format::input(&uri).map_err(|e| ProducerError::Open {
        uri: uri.to_string(),
        detail: e.to_string(),
    })?;

    let video_stream_index = ictx
        .streams()
        .best(MediaType::Video)
        .map(|s| s.index());
    let audio_stream_index = ictx
        .streams()
        .best(MediaType::Audio)
        .map(|s| s.index());

    let mut video_decoder = video_stream_index
        .map(|idx| -> Result<_, ProducerError> {
            let stream = ictx.stream(idx).expect("index from best() is valid");
            let ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| ProducerError::Open {
                    uri: uri.to_string(),
                    detail: e.to_string(),
                })?;
            ctx.decoder().video().map_err(|e| ProducerError::Open {
                uri: uri.to_string(),
                detail: e.to_string(),
            })
        })
        .transpose()?;

    let mut audio_decoder = audio_stream_index
        .map(|idx| -> Result<_, ProducerError> {
            let stream = ictx.stream(idx).expect("index from best() is valid");
            let ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| ProducerError::Open {
                    uri: uri.to_string(),
                    detail: e.to_string(),
                })?;
            ctx.decoder().audio().map_err(|e| ProducerError::Open {
                uri: uri.to_string(),
                detail: e.to_string(),
            })
        })
        .transpose()?;

    let source_fps = segment
        .source_fps
        .unwrap_or(output.fps);
    let mode = select_resample_mode(source_fps, output.fps);
    let mut cadence = match mode {
        ResampleMode::Cadence { num, den } => Some(CadenceAccumulator::new(num, den)),
        _ => None,
    };
    let drop_ratio = match mode {
        ResampleMode::Drop { ratio } => Some(ratio),
        _ => None,
    };
    let mut drop_counter: i64 = 0;

    let mut scaler = video_decoder.as_ref().map(|dec| {
        SwsContext::get(
            dec.format(),
            dec.width(),
            dec.height(),
            Pixel::RGB24,
            output.width,
            output.height,
            SwsFlags::BILINEAR,
        )
    });

    let frame_period_us = output.fps.frame_period_us();
    let mut output_tick: i64 = 0;
    let mut audio_primed_us: i64 = 0;
    let mut primed = false;
    let mut decoded_video = ffmpeg::frame::Video::empty();
    let mut decoded_audio = ffmpeg::frame::Audio::empty();
    let mut rgb_frame = ffmpeg::frame::Video::empty();

    'demux: for (stream, packet) in ictx.packets() {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        if Some(stream.index()) == video_stream_index {
            if let Some(dec) = video_decoder.as_mut() {
                dec.send_packet(&packet).map_err(|e| ProducerError::Decode {
                    uri: uri.to_string(),
                    pts_us: packet.pts().unwrap_or(0),
                    detail: e.to_string(),
                })?;
                while dec.receive_frame(&mut decoded_video).is_ok() {
                    // DROP keeps every `ratio`-th decoded input frame
                    // (emitting the first of each run) and discards the
                    // rest; CADENCE instead decides per-tick whether to
                    // advance or repeat; OFF keeps every frame. Audio below
                    // is harvested from every decoded frame regardless, per
                    // spec.md S4.3's "harvest audio from every decoded
                    // input frame so audio throughput matches input time".
                    let keep = match (cadence.as_mut(), drop_ratio) {
                        (Some(acc), _) => acc.advance(),
                        (None, Some(ratio)) => {
                            let keep = drop_counter % ratio == 0;
                            drop_counter += 1;
                            keep
                        }
                        (None, None) => true,
                    };
                    if !keep {
                        continue;
                    }
                    if let Some(sws) = scaler.as_mut() {
                        if let Ok(sws) = sws.as_mut() {
                            let mut converted = ffmpeg::frame::Video::empty();
                            if sws.run(&decoded_video, &mut converted).is_ok() {
                                rgb_frame = converted;
                            }
                        }
                    }
                    let pts_us = output.fps.presentation_us(output_tick);
                    let plane: Arc<[u8]> = Arc::from(rgb_frame.data(0).to_vec());
                    if push_frame_blocking(
                        &video_buf.handle(),
                        VideoFrameData {
                            plane,
                            pts_us,
                            duration_us: frame_period_us,
                        },
                    )
                    .is_err()
                    {
                        break 'demux;
                    }
                    output_tick += 1;
                }
            }
        } else if Some(stream.index()) == audio_stream_index {
            if let Some(dec) = audio_decoder.as_mut() {
                dec.send_packet(&packet).map_err(|e| ProducerError::Decode {
                    uri: uri.to_string(),
                    pts_us: packet.pts().unwrap_or(0),
                    detail: e.to_string(),
                })?;
                while dec.receive_frame(&mut decoded_audio).is_ok() {
                    let samples = extract_interleaved_f32(&decoded_audio, output.channels);
                    let duration_us = (samples.len() as i64
                        / output.channels.max(1) as i64)
                        * 1_000_000
                        / output.sample_rate.max(1) as i64;
                    audio_primed_us += duration_us;
                    let pts_us = output.fps.presentation_us(output_tick);
                    if push_samples_blocking(
                        &audio_buf.handle(),
                        AudioFrameData {
                            samples: Arc::from(samples),
                            channels: output.channels,
                            sample_rate: output.sample_rate,
                            pts_us,
                            duration_us,
                        },
                    )
                    .is_err()
                    {
                        break 'demux;
                    }
                }
            }
        }

        if !primed && output_tick >= min_video_prime_frames && audio_primed_us >= min_audio_prime_us {
            primed = true;
            let _ = primed_tx.send(Ok(()));
        }
    }

    if !primed {
        let _ = primed_tx.send(Ok(()));
    }

    Ok(())
}

fn extract_interleaved_f32(frame: &ffmpeg::frame::Audio, out_channels: u16) -> Vec<f32> {
    let samples = frame.samples();
    let src_channels = frame.channels().max(1) as usize;
    let mut out = Vec::with_capacity(samples * out_channels as usize);
    for i in 0..samples {
        for c in 0..out_channels as usize {
            let src_c = c % src_channels;
            let raw: f32 = if frame.is_packed() {
                let data = frame.data(0);
                let idx = (i * src_channels + src_c) * 4;
                f32::from_le_bytes([data[idx], data[idx + 1], data[idx + 2], data[idx + 3]])
            } else {
                let data = frame.data(src_c);
                let idx = i * 4;
                f32::from_le_bytes([data[idx], data[idx + 1], data[idx + 2], data[idx + 3]])
            };
            out.push(raw);
        }
    }
    out
}
