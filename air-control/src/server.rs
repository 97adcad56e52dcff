//! The HTTP control surface: one Axum router exposing the session
//! lifecycle (`StartBlockPlanSession`, `FeedBlockPlan`, `AttachSink`,
//! `DetachSink`, `StopChannel`) plus a status endpoint and the
//! bidirectional evidence stream, documented with `utoipa` and served
//! alongside Swagger UI the same way the rest of this workspace's HTTP
//! surfaces are.
//!
//! One process can run multiple channel sessions; [`AppState`] keeps them
//! in a `channel_id -> ChannelSession` map behind a `tokio::sync::RwLock`
//! so concurrent requests for *different* channels never contend, and a
//! request for a channel that does not exist gets a clean 404 instead of a
//! panic.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream as TokioTcpStream;
use tokio::sync::RwLock;
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use air_core::BlockPlan;
use air_mux::{NullSink, TcpSink};
#[cfg(unix)]
use air_mux::UnixSocketSink;

use crate::error::ControlError;
use crate::logs::LogState;
use crate::session::{
    ChannelSession, HouseFormat, SessionSnapshot, SinkSpec, StartBlockPlanSessionRequest,
};

/// Shared application state handed to every route: the live channel
/// sessions plus the directories new sessions spool evidence/as-run rows
/// into.
#[derive(Clone)]
pub struct AppState {
    sessions: Arc<RwLock<HashMap<String, ChannelSession>>>,
    evidence_spool_dir: PathBuf,
    asrun_dir: PathBuf,
    pub log_state: LogState,
}

impl AppState {
    pub fn new(evidence_spool_dir: PathBuf, asrun_dir: PathBuf, log_state: LogState) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            evidence_spool_dir,
            asrun_dir,
            log_state,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
struct ErrorBody {
    error: String,
}

impl From<ControlError> for Response {
    fn from(err: ControlError) -> Response {
        let status = match &err {
            ControlError::NoSession => StatusCode::NOT_FOUND,
            ControlError::AlreadyStarted => StatusCode::CONFLICT,
            ControlError::InsufficientLeadTime { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: err.to_string() })).into_response()
    }
}

/// `StartBlockPlanSession`: admits a new channel session. Rejects if a
/// session with this `channel_id` is already running rather than silently
/// replacing it.
#[utoipa::path(
    post,
    path = "/channels/{channel_id}/start",
    request_body = StartBlockPlanSessionBody,
    responses((status = 200, description = "session started"), (status = 409, description = "already running")),
    params(("channel_id" = String, Path)),
)]
async fn start_session(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Json(mut body): Json<StartBlockPlanSessionBody>,
) -> Response {
    body.channel_id = channel_id.clone();
    let mut sessions = state.sessions.write().await;
    if sessions.contains_key(&channel_id) {
        return ControlError::AlreadyStarted.into();
    }

    let req: StartBlockPlanSessionRequest = body.into();
    match ChannelSession::start(req, state.evidence_spool_dir.clone(), state.asrun_dir.clone()) {
        Ok(session) => {
            info!(channel_id, "channel session started");
            sessions.insert(channel_id, session);
            StatusCode::OK.into_response()
        }
        Err(e) => e.into(),
    }
}

/// Request body mirrors [`StartBlockPlanSessionRequest`] but omits
/// `channel_id`, which comes from the URL path instead.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct StartBlockPlanSessionBody {
    #[serde(default)]
    channel_id: String,
    pub epoch_utc_us: i64,
    pub house_format: HouseFormat,
    #[serde(default)]
    pub drift_tolerance_us: Option<i64>,
    #[serde(default)]
    pub hold_max_ms: Option<i64>,
    #[serde(default)]
    pub video_lookahead_frames: Option<usize>,
    #[serde(default)]
    pub audio_lookahead_frames: Option<usize>,
    #[serde(default)]
    pub min_audio_prime_ms: Option<i64>,
    #[serde(default)]
    pub min_video_prime_frames: Option<usize>,
}

impl From<StartBlockPlanSessionBody> for StartBlockPlanSessionRequest {
    fn from(b: StartBlockPlanSessionBody) -> Self {
        let session_defaults = air_config::get_config().session_defaults().clone();
        let mut req = StartBlockPlanSessionRequest {
            channel_id: b.channel_id,
            epoch_utc_us: b.epoch_utc_us,
            house_format: b.house_format,
            drift_tolerance_us: session_defaults.epoch_drift_tolerance_us,
            hold_max_ms: session_defaults.hold_max_ms,
            video_lookahead_frames: session_defaults.video_lookahead_frames,
            audio_lookahead_frames: session_defaults.audio_lookahead_frames,
            min_audio_prime_ms: session_defaults.min_audio_prime_ms,
            min_video_prime_frames: session_defaults.min_video_prime_frames,
        };
        if let Some(v) = b.drift_tolerance_us {
            req.drift_tolerance_us = v;
        }
        if let Some(v) = b.hold_max_ms {
            req.hold_max_ms = v;
        }
        if let Some(v) = b.video_lookahead_frames {
            req.video_lookahead_frames = v;
        }
        if let Some(v) = b.audio_lookahead_frames {
            req.audio_lookahead_frames = v;
        }
        if let Some(v) = b.min_audio_prime_ms {
            req.min_audio_prime_ms = v;
        }
        if let Some(v) = b.min_video_prime_frames {
            req.min_video_prime_frames = v;
        }
        req
    }
}

/// `FeedBlockPlan`: appends one block to the channel's plan queue. Rejects
/// with a 400 if the queue is already at its maximum in-flight depth or the
/// plan has no segments -- the same rejection `ChannelRunner::feed_block_plan`
/// already performs; this handler only translates its `Result` to HTTP.
#[utoipa::path(
    post,
    path = "/channels/{channel_id}/plan",
    responses((status = 200, description = "accepted"), (status = 400, description = "rejected"), (status = 404, description = "no such session")),
    params(("channel_id" = String, Path)),
)]
async fn feed_block_plan(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Json(plan): Json<BlockPlan>,
) -> Response {
    let sessions = state.sessions.read().await;
    let Some(session) = sessions.get(&channel_id) else {
        return ControlError::NoSession.into();
    };
    match session.feed_block_plan(plan).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into(),
    }
}

/// `AttachSink`: connects the mux's non-blocking byte fan-out to a new
/// transport. Connecting the outbound transport happens on this request's
/// own async task, not on the mux thread -- only the already-established,
/// already-nonblocking stream crosses into `air-mux`.
#[utoipa::path(
    post,
    path = "/channels/{channel_id}/sinks",
    request_body = SinkSpec,
    responses((status = 200, description = "attached"), (status = 404, description = "no such session"), (status = 502, description = "could not connect to transport")),
    params(("channel_id" = String, Path)),
)]
async fn attach_sink(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Json(spec): Json<SinkSpec>,
) -> Response {
    let sessions = state.sessions.read().await;
    let Some(session) = sessions.get(&channel_id) else {
        return ControlError::NoSession.into();
    };

    let sink: Box<dyn air_mux::ByteSink> = match spec {
        SinkSpec::Null => Box::new(NullSink),
        SinkSpec::Tcp { addr } => match TokioTcpStream::connect(&addr).await {
            Ok(tokio_stream) => match tokio_stream.into_std() {
                Ok(std_stream) => match TcpSink::new(std_stream) {
                    Ok(sink) => Box::new(sink),
                    Err(e) => return (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
                },
                Err(e) => return (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
            },
            Err(e) => return (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
        },
        #[cfg(unix)]
        SinkSpec::Unix { path } => match std::os::unix::net::UnixStream::connect(&path) {
            Ok(stream) => match UnixSocketSink::new(stream) {
                Ok(sink) => Box::new(sink),
                Err(e) => return (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
            },
            Err(e) => return (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
        },
    };

    match session.attach_sink(sink) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into(),
    }
}

/// `DetachSink`: detaches every sink currently attached to this channel.
#[utoipa::path(
    delete,
    path = "/channels/{channel_id}/sinks",
    responses((status = 200, description = "detached"), (status = 404, description = "no such session")),
    params(("channel_id" = String, Path)),
)]
async fn detach_sink(State(state): State<AppState>, Path(channel_id): Path<String>) -> Response {
    let sessions = state.sessions.read().await;
    let Some(session) = sessions.get(&channel_id) else {
        return ControlError::NoSession.into();
    };
    match session.detach_sink() {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into(),
    }
}

/// `StopChannel`: idempotent graceful shutdown, then removes the session
/// from the registry entirely -- a subsequent `StartBlockPlanSession` for
/// the same `channel_id` is legal immediately afterward.
#[utoipa::path(
    post,
    path = "/channels/{channel_id}/stop",
    responses((status = 200, description = "stopped"), (status = 404, description = "no such session")),
    params(("channel_id" = String, Path)),
)]
async fn stop_channel(State(state): State<AppState>, Path(channel_id): Path<String>) -> Response {
    let mut sessions = state.sessions.write().await;
    let Some(mut session) = sessions.remove(&channel_id) else {
        return ControlError::NoSession.into();
    };
    match session.stop() {
        Ok(()) => {
            info!(channel_id, "channel session stopped");
            StatusCode::OK.into_response()
        }
        Err(e) => e.into(),
    }
}

#[utoipa::path(
    get,
    path = "/channels/{channel_id}/status",
    responses((status = 200, body = SessionSnapshot), (status = 404, description = "no such session")),
    params(("channel_id" = String, Path)),
)]
async fn channel_status(State(state): State<AppState>, Path(channel_id): Path<String>) -> Response {
    let sessions = state.sessions.read().await;
    let Some(session) = sessions.get(&channel_id) else {
        return ControlError::NoSession.into();
    };
    Json(session.snapshot()).into_response()
}

#[derive(Debug, Deserialize)]
struct EvidenceStreamQuery {
    #[serde(default)]
    since: u64,
}

/// `EvidenceStream`: a WebSocket carrying every `EvidenceFromAir` emitted
/// from `since` (exclusive) onward -- replayed from the durable spool
/// first, then the live broadcast tap. Any text frame the client sends
/// back is parsed as `{"acked_sequence": N}` and advances the session's
/// durable high-water mark.
async fn evidence_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Query(query): Query<EvidenceStreamQuery>,
) -> Response {
    let sessions = state.sessions.read().await;
    let Some(session) = sessions.get(&channel_id) else {
        return ControlError::NoSession.into();
    };
    let replay = crate::spool::EvidenceSpool::open(&state.evidence_spool_dir, &channel_id)
        .and_then(|spool| spool.replay_since(query.since))
        .unwrap_or_default();
    let live_rx = session.evidence_tap.subscribe();
    drop(sessions);

    ws.on_upgrade(move |socket| handle_evidence_socket(socket, replay, live_rx, state, channel_id))
}

async fn handle_evidence_socket(
    mut socket: WebSocket,
    replay: Vec<air_core::EvidenceFromAir>,
    mut live_rx: tokio::sync::broadcast::Receiver<air_core::EvidenceFromAir>,
    state: AppState,
    channel_id: String,
) {
    for event in replay {
        let Ok(json) = serde_json::to_string(&event) else { continue };
        if socket.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = live_rx.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(json) = serde_json::to_string(&event) else { continue };
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            return;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel_id, skipped, "evidence websocket subscriber lagged; client should reconnect with `since`");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(ack) = serde_json::from_str::<EvidenceAck>(&text) {
                            let sessions = state.sessions.read().await;
                            if let Some(session) = sessions.get(&channel_id) {
                                session.ack_evidence(ack.acked_sequence);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Err(_)) => return,
                    _ => {}
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct EvidenceAck {
    acked_sequence: u64,
}

#[derive(OpenApi)]
#[openapi(
    paths(start_session, feed_block_plan, attach_sink, detach_sink, stop_channel, channel_status),
    components(schemas(StartBlockPlanSessionBody, HouseFormat, SinkSpec, ErrorBody, SessionSnapshot))
)]
struct ApiDoc;

/// Builds the full control-surface router: the channel lifecycle routes,
/// the logs SSE routes, and a mounted Swagger UI for the OpenAPI document
/// above.
pub fn build_router(state: AppState) -> Router {
    let api_router = Router::new()
        .route("/channels/{channel_id}/start", post(start_session))
        .route("/channels/{channel_id}/plan", post(feed_block_plan))
        .route("/channels/{channel_id}/sinks", post(attach_sink).delete(detach_sink))
        .route("/channels/{channel_id}/stop", post(stop_channel))
        .route("/channels/{channel_id}/status", get(channel_status))
        .route("/channels/{channel_id}/evidence", get(evidence_stream))
        .with_state(state.clone());

    let logs_router = crate::logs::create_logs_router(state.log_state.clone());

    Router::new()
        .merge(api_router)
        .merge(logs_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

/// Runs the control surface until `shutdown_signal` resolves (SIGINT, or
/// SIGTERM on unix) -- graceful in the sense that the listener stops
/// accepting new connections and in-flight requests are allowed to finish,
/// matching the rest of the workspace's server shutdown behavior.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "control surface listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
