//! `air-cli`: the playout engine's process entry point. Loads the merged
//! configuration, wires up structured logging (stdout + the `/logs`
//! SSE surface), and serves the control surface until Ctrl+C/SIGTERM.
//!
//! Channel sessions themselves are started later, over the control
//! surface's `StartBlockPlanSession` HTTP route -- this binary's only job
//! is to bring the process up and hand requests to `air_control`.

use std::net::SocketAddr;

use air_control::{AppState, LogState};
use air_utils::{find_process_using_port, TransportProtocol};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_state = LogState::new(2000);
    air_control::init_logging(log_state.clone());

    let config = air_config::get_config();
    config.house_format().validate_fps()?;

    let bind_addr = &config.control().bind_addr;
    let addr: SocketAddr = bind_addr
        .parse()
        .unwrap_or_else(|_| panic!("invalid control.bind_addr {bind_addr:?} in configuration"));

    std::fs::create_dir_all(&config.evidence().spool_directory)?;
    std::fs::create_dir_all(&config.asrun().directory)?;

    let state = AppState::new(
        config.evidence().spool_directory.clone().into(),
        config.asrun().directory.clone().into(),
        log_state,
    );

    info!(
        resolved_addr = %config.resolved_control_addr(),
        "starting AIR playout engine control surface"
    );

    if let Err(e) = air_control::serve(addr, state).await {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            if let Some(process) = find_process_using_port(addr.port(), TransportProtocol::Tcp) {
                error!(
                    "control surface failed to bind: port {} is already in use by PID {} \
                     ({}) owned by {}: {}",
                    addr.port(),
                    process.pid,
                    process.process_name,
                    process.owner,
                    e
                );
            } else {
                error!(
                    "control surface failed to bind: port {} is already in use. Unable to \
                     identify the blocking process automatically. Check manually with \
                     `lsof -nP -iTCP:{}`: {}",
                    addr.port(),
                    addr.port(),
                    e
                );
            }
        } else {
            error!(error = %e, "control surface exited with an error");
        }
        return Err(e.into());
    }

    info!("AIR playout engine stopped");
    Ok(())
}
