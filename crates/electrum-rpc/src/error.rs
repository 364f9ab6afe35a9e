//! Error types for the electrum-rpc crate.

use crate::transport::CodecError;

/// Unified error type for client operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// The connection is down and the send was rejected rather than queued
    #[error("Host unreachable")]
    Unreachable,

    #[error("Session closed")]
    SessionClosed,

    #[error("Method deprecated by the protocol")]
    Deprecated,

    #[error("Method unavailable in protocol version {0}")]
    Unavailable(String),

    #[error("Transaction rejected by the server")]
    RejectedTx,

    /// Reply carried neither the expected result shape nor an error
    #[error("Unexpected response")]
    UnexpectedResponse,
}

impl Error {
    #[must_use]
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }
}

impl From<crate::protocol::RpcError> for Error {
    fn from(e: crate::protocol::RpcError) -> Self {
        Self::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
