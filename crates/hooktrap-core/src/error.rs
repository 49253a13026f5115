//! Error types for Hooktrap.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HooktrapError {
    #[error("webhook server is already running")]
    AlreadyRunning,

    #[error("webhook server is not running")]
    NotRunning,

    #[error("could not bind port {port}: {source}")]
    BindError {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("server did not become ready within {0} seconds")]
    ServerReadyTimeout(u64),

    #[error("local server {0} is not reachable")]
    TunnelProbeUnreachable(String),

    #[error("tunnel connection failed: {0}")]
    TunnelConnectError(String),

    #[error("no tunnel URL received within {0} seconds")]
    TunnelTimeout(u64),

    #[error("graceful shutdown failed: {0}")]
    ShutdownError(String),

    #[error("failed to spawn tunnel process: {0}")]
    SpawnFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
