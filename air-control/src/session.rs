//! `ChannelSession`: wires one channel's `air_core::ChannelRunner` (the A/B
//! tick loop scheduler), its persistent `air_mux::MuxSink`/`MuxLoop`, and
//! the evidence spool/as-run writer into the thread topology this system
//! prescribes -- one tick thread, one mux thread, one evidence I/O thread
//! -- behind the single long-lived handle `air-cli` and the HTTP control
//! surface both hold.
//!
//! The tick thread is the only thread that ever touches the
//! `ChannelRunner`. `FeedBlockPlan` crosses into it as a [`SessionCommand`]
//! over a non-blocking channel, drained at the top of each tick iteration
//! -- the same non-blocking-crossing discipline `air_core::pipeline`'s
//! `Reaper` and `SeamPreparer` already use for their own thread boundaries.
//! `AttachSink`/`DetachSink` never touch the tick thread at all: they go
//! straight to the mux thread's own command channel, since a sink change
//! has nothing to do with any particular tick.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Duration;

use air_core::{
    BlockPlan, BoundaryState, ChannelId, ChannelRunner, EvidenceFromAir, EvidencePayload,
    EvidenceSink, ManagerLimits, MasterClock, OutputFormat, PadProducer, RationalFps, SessionId,
    TransitionStatus, DEPTH_HIGH_FLOOR,
};
use air_mux::{ByteSink, MuxCommand, MuxInput, MuxLoop, MuxSink};
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use crate::asrun::{AsRunEntry, AsRunStatus, AsRunWriter};
use crate::error::{ControlError, ControlResult};
use crate::spool::EvidenceSpool;

/// House audio/video parameters for a session. Named like
/// `air_config::HouseFormat` but kept independent of that crate so a
/// session can be started from a request body instead of only from a
/// loaded config file.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
pub struct HouseFormat {
    pub width: u32,
    pub height: u32,
    pub fps_num: i64,
    pub fps_den: i64,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StartBlockPlanSessionRequest {
    pub channel_id: String,
    pub epoch_utc_us: i64,
    pub house_format: HouseFormat,
    #[serde(default = "default_drift_tolerance_us")]
    pub drift_tolerance_us: i64,
    #[serde(default = "default_hold_max_ms")]
    pub hold_max_ms: i64,
    #[serde(default = "default_lookahead")]
    pub video_lookahead_frames: usize,
    #[serde(default = "default_lookahead")]
    pub audio_lookahead_frames: usize,
    #[serde(default = "default_min_audio_prime_ms")]
    pub min_audio_prime_ms: i64,
    #[serde(default = "default_min_video_prime_frames")]
    pub min_video_prime_frames: usize,
}

fn default_drift_tolerance_us() -> i64 {
    250_000
}
fn default_hold_max_ms() -> i64 {
    5_000
}
fn default_lookahead() -> usize {
    30
}
fn default_min_audio_prime_ms() -> i64 {
    air_config::get_config().session_defaults().min_audio_prime_ms
}
fn default_min_video_prime_frames() -> usize {
    air_config::get_config().session_defaults().min_video_prime_frames
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
pub enum BoundaryStateWire {
    Pending,
    Preparing,
    ArmedWaitingFence,
    Taking,
    Taken,
    FailedTerminal,
}

impl From<BoundaryState> for BoundaryStateWire {
    fn from(s: BoundaryState) -> Self {
        match s {
            BoundaryState::Pending => Self::Pending,
            BoundaryState::Preparing => Self::Preparing,
            BoundaryState::ArmedWaitingFence => Self::ArmedWaitingFence,
            BoundaryState::Taking => Self::Taking,
            BoundaryState::Taken => Self::Taken,
            BoundaryState::FailedTerminal => Self::FailedTerminal,
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize, utoipa::ToSchema)]
pub struct SessionSnapshot {
    pub boundary: BoundaryStateWire,
    pub session_frame_index: i64,
    pub queue_depth: usize,
    pub acked_sequence: u64,
}

/// Sink transport a caller asks the mux to push bytes to. A closed set,
/// matching `air-mux::sink`'s closed `ByteSink` capability set.
#[derive(Debug, Clone, serde::Deserialize, utoipa::ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkSpec {
    Tcp { addr: String },
    #[cfg(unix)]
    Unix { path: String },
    Null,
}

enum SessionCommand {
    Feed(BlockPlan, oneshot::Sender<ControlResult<()>>),
    Stop,
}

/// Forwards evidence emitted on the tick thread to the evidence I/O thread
/// via a non-blocking channel send -- the tick thread itself never spools,
/// writes as-run rows, or touches a socket.
struct ChannelSessionSink {
    tx: SyncSender<EvidenceFromAir>,
}

impl EvidenceSink for ChannelSessionSink {
    fn submit(&mut self, event: EvidenceFromAir) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            tracing::warn!(
                "evidence I/O channel full; one evidence event dropped from the session's own \
                 view (the tick thread never blocks on it)"
            );
        }
    }
}

/// A running channel session: the tick thread, the mux thread, and the
/// evidence I/O thread, plus the handles the control surface needs to
/// reach them without ever touching the tick thread directly.
pub struct ChannelSession {
    pub channel_id: ChannelId,
    pub session_id: SessionId,
    pub epoch_utc_us: i64,
    commands: SyncSender<SessionCommand>,
    mux_commands: SyncSender<MuxCommand>,
    snapshot: Arc<Mutex<SessionSnapshot>>,
    stop: Arc<AtomicBool>,
    pub evidence_tap: broadcast::Sender<EvidenceFromAir>,
    acked_sequence: Arc<AtomicU64>,
    tick_thread: Option<std::thread::JoinHandle<()>>,
    mux_thread: Option<std::thread::JoinHandle<()>>,
    evidence_thread: Option<std::thread::JoinHandle<()>>,
}

impl ChannelSession {
    /// `StartBlockPlanSession`: constructs the tick/mux/evidence thread
    /// triple and returns immediately with a handle. The first `BlockPlan`
    /// still has to arrive via `feed_block_plan` before anything airs --
    /// starting a session with an empty queue is legal and simply holds on
    /// pad.
    pub fn start(
        req: StartBlockPlanSessionRequest,
        evidence_spool_dir: impl Into<std::path::PathBuf>,
        asrun_dir: impl Into<std::path::PathBuf>,
    ) -> ControlResult<Self> {
        let fps = RationalFps::new(req.house_format.fps_num, req.house_format.fps_den)?;
        let epoch = air_core::clock::SessionEpoch::capture_now(req.epoch_utc_us);
        let clock = MasterClock::new(epoch, fps, req.drift_tolerance_us);

        let output = OutputFormat {
            width: req.house_format.width,
            height: req.house_format.height,
            fps,
            sample_rate: req.house_format.sample_rate,
            channels: req.house_format.channels,
        };
        let pad = PadProducer::new(output);
        let limits = ManagerLimits {
            hold_max_ticks: (req.hold_max_ms * 1000) / fps.frame_period_us().max(1),
            min_depth_floor: DEPTH_HIGH_FLOOR,
            min_video_prime_frames: req.min_video_prime_frames,
        };

        let channel_id = ChannelId::from(req.channel_id.clone());
        let session_id = SessionId::from(uuid::Uuid::new_v4().to_string());

        let mut runner = ChannelRunner::new(
            clock,
            output,
            pad,
            limits,
            channel_id.clone(),
            req.epoch_utc_us,
            req.video_lookahead_frames,
            req.audio_lookahead_frames,
            2,
            req.min_audio_prime_ms,
            req.min_video_prime_frames,
        );

        let (evidence_tx, evidence_rx) = sync_channel::<EvidenceFromAir>(256);
        runner.attach_evidence_sink(Box::new(ChannelSessionSink { tx: evidence_tx }));

        let (cmd_tx, cmd_rx) = sync_channel::<SessionCommand>(16);
        let (mux_tx, mux_rx) = sync_channel::<MuxInput>(64);
        let (mux_cmd_tx, mux_cmd_rx) = sync_channel::<MuxCommand>(8);
        let stop = Arc::new(AtomicBool::new(false));
        let snapshot = Arc::new(Mutex::new(SessionSnapshot {
            boundary: BoundaryStateWire::Pending,
            session_frame_index: 0,
            queue_depth: 0,
            acked_sequence: 0,
        }));
        let (evidence_broadcast, _) = broadcast::channel::<EvidenceFromAir>(1024);
        let acked_sequence = Arc::new(AtomicU64::new(0));

        let mux_sink = MuxSink::new(
            req.house_format.width,
            req.house_format.height,
            req.house_format.fps_num,
            req.house_format.fps_den,
            req.house_format.sample_rate,
            req.house_format.channels,
            64,
        )?;

        let tick_thread = {
            let stop = Arc::clone(&stop);
            let snapshot = Arc::clone(&snapshot);
            std::thread::Builder::new()
                .name(format!("air-tick-{}", req.channel_id))
                .spawn(move || run_tick_loop(runner, cmd_rx, mux_tx, stop, snapshot))
                .expect("failed to spawn tick thread")
        };

        let mux_thread = {
            let epoch_utc_us = req.epoch_utc_us;
            std::thread::Builder::new()
                .name(format!("air-mux-{}", req.channel_id))
                .spawn(move || {
                    let mut mux_loop = MuxLoop::new(mux_rx, mux_cmd_rx, mux_sink, epoch_utc_us);
                    mux_loop.run();
                })
                .expect("failed to spawn mux thread")
        };

        let evidence_thread = {
            let spool_dir = evidence_spool_dir.into();
            let asrun_dir = asrun_dir.into();
            let channel_id_str = req.channel_id.clone();
            let broadcast_tx = evidence_broadcast.clone();
            std::thread::Builder::new()
                .name(format!("air-evidence-{}", req.channel_id))
                .spawn(move || {
                    run_evidence_io(evidence_rx, spool_dir, asrun_dir, channel_id_str, broadcast_tx)
                })
                .expect("failed to spawn evidence I/O thread")
        };

        Ok(Self {
            channel_id,
            session_id,
            epoch_utc_us: req.epoch_utc_us,
            commands: cmd_tx,
            mux_commands: mux_cmd_tx,
            snapshot,
            stop,
            evidence_tap: evidence_broadcast,
            acked_sequence,
            tick_thread: Some(tick_thread),
            mux_thread: Some(mux_thread),
            evidence_thread: Some(evidence_thread),
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut snap = *self.snapshot.lock();
        snap.acked_sequence = self.acked_sequence.load(Ordering::Acquire);
        snap
    }

    /// `FeedBlockPlan`: enqueues on the tick thread and waits for the
    /// accept/reject reply via a oneshot, matching the synchronous
    /// request/response shape of the control surface's HTTP handler even
    /// though the actual enqueue happens on a different thread.
    pub async fn feed_block_plan(&self, plan: BlockPlan) -> ControlResult<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .try_send(SessionCommand::Feed(plan, tx))
            .map_err(|_| ControlError::NoSession)?;
        rx.await.map_err(|_| ControlError::NoSession)?
    }

    pub fn attach_sink(&self, sink: Box<dyn ByteSink>) -> ControlResult<()> {
        self.mux_commands
            .try_send(MuxCommand::AttachSink(sink))
            .map_err(|_| ControlError::NoSession)
    }

    pub fn detach_sink(&self) -> ControlResult<()> {
        self.mux_commands
            .try_send(MuxCommand::DetachAll)
            .map_err(|_| ControlError::NoSession)
    }

    /// Advances the durable evidence high-water mark. Idempotent: acking
    /// the same or an older sequence twice is a no-op.
    pub fn ack_evidence(&self, sequence: u64) {
        self.acked_sequence.fetch_max(sequence, Ordering::AcqRel);
    }

    pub fn acked_sequence(&self) -> u64 {
        self.acked_sequence.load(Ordering::Acquire)
    }

    /// `StopChannel`: immediate graceful shutdown, idempotent, bounded to a
    /// few seconds by joining the tick thread with a deadline and
    /// proceeding regardless if it overruns.
    pub fn stop(&mut self) -> ControlResult<()> {
        self.stop.store(true, Ordering::Release);
        let _ = self.commands.try_send(SessionCommand::Stop);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        if let Some(handle) = self.tick_thread.take() {
            while !handle.is_finished() && std::time::Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
        }
        Ok(())
    }
}

impl Drop for ChannelSession {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        for handle in [
            self.tick_thread.take(),
            self.mux_thread.take(),
            self.evidence_thread.take(),
        ]
        .into_iter()
        .flatten()
        {
            let _ = handle.join();
        }
    }
}

/// The tick thread body: drains pending `SessionCommand`s (never blocking),
/// runs one `ChannelRunner` tick, forwards the tick's output to the mux
/// thread (dropping it on a full queue rather than ever blocking here --
/// the same "pressure terminates at the sink, never upstream" rule
/// `air-mux::sink::SinkRegistry` applies one layer further down), and
/// updates the shared snapshot for the status endpoint to read.
fn run_tick_loop(
    mut runner: ChannelRunner,
    commands: std::sync::mpsc::Receiver<SessionCommand>,
    mux_tx: SyncSender<MuxInput>,
    stop: Arc<AtomicBool>,
    snapshot: Arc<Mutex<SessionSnapshot>>,
) {
    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }

        loop {
            match commands.try_recv() {
                Ok(SessionCommand::Feed(plan, reply)) => {
                    let result = runner.feed_block_plan(plan).map_err(ControlError::from);
                    let _ = reply.send(result);
                }
                Ok(SessionCommand::Stop) => {
                    stop.store(true, Ordering::Release);
                }
                Err(std::sync::mpsc::TryRecvError::Empty) => break,
                Err(std::sync::mpsc::TryRecvError::Disconnected) => {
                    stop.store(true, Ordering::Release);
                    break;
                }
            }
        }

        if stop.load(Ordering::Acquire) {
            break;
        }

        let out = runner.run_once();

        {
            let mut snap = snapshot.lock();
            snap.boundary = runner.boundary_state().into();
            snap.session_frame_index = runner.session_frame_index();
            snap.queue_depth = runner.queue_depth();
        }

        let mux_input = MuxInput {
            tick: out.tick,
            video: out.video,
            audio: out.audio,
            from_pad: out.from_pad,
        };
        if let Err(TrySendError::Full(_)) = mux_tx.try_send(mux_input) {
            tracing::warn!(
                tick = out.tick,
                "mux input queue full; dropping one tick's media (cadence and decode unaffected)"
            );
        }

        if runner.boundary_state() == BoundaryState::FailedTerminal {
            break;
        }
    }
}

/// Evidence I/O thread body: durably spools every event before anything
/// else touches it, derives an as-run row from the subset of payloads that
/// carry a completed transition, and fans the raw event out to any
/// currently-subscribed evidence stream.
fn run_evidence_io(
    rx: std::sync::mpsc::Receiver<EvidenceFromAir>,
    spool_dir: std::path::PathBuf,
    asrun_dir: std::path::PathBuf,
    channel_id: String,
    broadcast_tx: broadcast::Sender<EvidenceFromAir>,
) {
    let mut spool = match EvidenceSpool::open(&spool_dir, &channel_id) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to open evidence spool; evidence will not be durable this session");
            return;
        }
    };
    let mut asrun = AsRunWriter::new(asrun_dir, channel_id);
    let mut last_transition_utc_ms: Option<i64> = None;

    for event in rx {
        if let Err(e) = spool.append(&event) {
            tracing::error!(error = %e, sequence = event.sequence.0, "failed to durably spool evidence event");
        }

        if let Some(entry) = derive_asrun_entry(&event, &mut last_transition_utc_ms) {
            if let Err(e) = asrun.record(&entry) {
                tracing::error!(error = %e, "failed to write as-run entry");
            }
        }

        let _ = broadcast_tx.send(event);
    }
}

fn derive_asrun_entry(
    event: &EvidenceFromAir,
    last_transition_utc_ms: &mut Option<i64>,
) -> Option<AsRunEntry> {
    let now_ms = event.emitted_at_utc_us / 1_000;
    let duration_ms = last_transition_utc_ms.map(|prev| now_ms - prev).unwrap_or(0);
    *last_transition_utc_ms = Some(now_ms);

    match &event.payload {
        EvidencePayload::SegmentEnd { segment_id, status, reason } => Some(AsRunEntry {
            event_id: event.event_uuid.to_string(),
            block_id: String::new(),
            title: segment_id.to_string(),
            actual_start_utc_ms: now_ms - duration_ms,
            actual_duration_ms: duration_ms,
            status: transition_status_to_asrun(*status),
            reason: reason.clone(),
            swap_tick: None,
            fence_tick: None,
        }),
        EvidencePayload::BlockFence { block_id, swap_tick, fence_tick, truncated_by_fence } => {
            Some(AsRunEntry {
                event_id: event.event_uuid.to_string(),
                block_id: block_id.to_string(),
                title: format!("block {block_id} fence"),
                actual_start_utc_ms: now_ms,
                actual_duration_ms: 0,
                status: if *truncated_by_fence {
                    AsRunStatus::Truncated
                } else {
                    AsRunStatus::Aired
                },
                reason: None,
                swap_tick: Some(*swap_tick),
                fence_tick: Some(*fence_tick),
            })
        }
        EvidencePayload::ChannelTerminated { reason } => Some(AsRunEntry {
            event_id: event.event_uuid.to_string(),
            block_id: String::new(),
            title: "channel terminated".into(),
            actual_start_utc_ms: now_ms,
            actual_duration_ms: 0,
            status: AsRunStatus::Error,
            reason: Some(reason.clone()),
            swap_tick: None,
            fence_tick: None,
        }),
        EvidencePayload::Hello { .. } | EvidencePayload::BlockStart { .. } => None,
    }
}

fn transition_status_to_asrun(status: TransitionStatus) -> AsRunStatus {
    match status {
        TransitionStatus::Aired => AsRunStatus::Aired,
        TransitionStatus::Truncated => AsRunStatus::Truncated,
        TransitionStatus::Short => AsRunStatus::Short,
        TransitionStatus::Skipped => AsRunStatus::Skipped,
        TransitionStatus::Substituted => AsRunStatus::Substituted,
        TransitionStatus::Error => AsRunStatus::Error,
    }
}
