//! Network and process introspection helpers shared across the
//! workspace's binaries: guessing the local outbound IP for advertising a
//! reachable control-surface address, and finding which process holds a
//! given port when a bind fails.
//!
//! # Examples
//!
//! ```
//! let ip = air_utils::guess_local_ip();
//! println!("local IP: {}", ip);
//! ```
mod ip_utils;
mod process;

pub use ip_utils::guess_local_ip;
pub use process::{find_process_using_port, ProcessPortInfo, TransportProtocol};