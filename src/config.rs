//! Server configuration structure
// (c) 2025 Ross Younger

use serde::{Deserialize, Serialize};

use crate::protocol::frame::DEFAULT_MAX_PAYLOAD;

/// The set of configurable options for a [`Server`](crate::Server).
///
/// Fields may be filled in from any source the host likes; the struct
/// round-trips through serde, and unspecified fields take the documented
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to.
    /// [default: 127.0.0.1]
    pub address: String,

    /// TCP port to listen on. Use 0 to let the OS pick an ephemeral port;
    /// [`Server::bind`](crate::Server::bind) reports the actual choice.
    /// [default: 8765]
    pub port: u16,

    /// Number of worker threads serving connections. Each connection is
    /// pinned to one worker for its lifetime, so this is also the maximum
    /// number of concurrently-served connections; further connections
    /// queue until a worker frees up.
    /// [default: 16]
    pub workers: usize,

    /// Largest frame payload the server will accept, in bytes.
    /// [default: 16MiB]
    pub max_frame_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8765,
            workers: 16,
            max_frame_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
