//! Typed errors for the control surface. `anyhow` stays out of this crate
//! too, per the workspace's ambient-stack convention -- it is reserved for
//! `air-cli` and test helpers.

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Pipeline(#[from] air_core::error::PipelineError),
    #[error(transparent)]
    Mux(#[from] air_mux::MuxError),
    #[error(transparent)]
    Clock(#[from] air_core::ClockError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no channel session is running")]
    NoSession,
    #[error("channel session is already running")]
    AlreadyStarted,
    #[error("command target_boundary_time_ms {target_ms} is less than {min_lead_ms}ms away (MIN_PREFEED_LEAD_TIME)")]
    InsufficientLeadTime { target_ms: i64, min_lead_ms: i64 },
    #[error("stop did not complete within {0:?}")]
    StopTimeout(std::time::Duration),
}

pub type ControlResult<T> = Result<T, ControlError>;
