//! Electrum wire protocol types.
//!
//! The protocol is JSON-RPC shaped: one JSON object per newline-terminated
//! frame. Outgoing frames are always [`Request`]s. Incoming frames all decode
//! into the generic [`Envelope`]; an envelope carrying a non-empty `method`
//! is an unsolicited push for subscribers, anything else is a reply
//! correlated by `id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol version tags negotiated with the server
pub const PROTOCOL_1_0: &str = "1.0";
pub const PROTOCOL_1_1: &str = "1.1";
pub const PROTOCOL_1_2: &str = "1.2";

/// Outgoing request frame.
///
/// `params` is always serialized, as an empty array when the method takes no
/// arguments; servers reject requests with the field omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Vec<String>,
}

impl Request {
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Generic incoming frame.
///
/// Servers send any subset of these fields; replies carry `id` plus
/// `result` or `error`, pushes carry `method` plus `params`. The initial
/// reply to a subscribe request carries both `id` and `result`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Envelope {
    /// A non-empty `method` marks the frame as an unsolicited push routed to
    /// subscribers; everything else is a reply correlated by id.
    #[must_use]
    pub fn is_push(&self) -> bool {
        self.method.as_deref().is_some_and(|m| !m.is_empty())
    }
}

/// Server-reported RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}
