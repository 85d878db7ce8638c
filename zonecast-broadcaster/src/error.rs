use std::net::SocketAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BroadcasterError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("WebSocket handshake timed out")]
    HandshakeTimeout,

    #[error("Write timed out after {0:?}")]
    WriteTimeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, BroadcasterError>;
