//! Async client for the Electrum server protocol.
//!
//! Frames are newline-delimited JSON-RPC 2.0 over TCP, optionally wrapped
//! in TLS. The crate is layered: [`transport`] frames and parses lines,
//! [`connection`] owns the socket and redials it when it drops,
//! [`session`] correlates replies with callers and fans pushes out to
//! subscriptions, and [`client`] puts typed method wrappers on top.
//!
//! ```no_run
//! use electrum_rpc::{Client, Options};
//!
//! # async fn run() -> electrum_rpc::Result<()> {
//! let client = Client::connect(Options::new("electrum.example.org:50001")).await?;
//! let version = client.server_version().await?;
//! println!("{} speaking {}", version.software, version.protocol);
//! client.close();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod error;
mod keepalive;
pub mod options;
pub mod protocol;
pub mod session;
pub mod subscription;
pub mod transport;

pub use client::Client;
pub use connection::ConnectionState;
pub use error::{Error, Result};
pub use options::Options;
pub use protocol::{Envelope, Request, RpcError, PROTOCOL_1_0, PROTOCOL_1_1, PROTOCOL_1_2};
pub use session::Session;
pub use subscription::{PushHandler, SubscriptionHandle};
pub use transport::{CodecError, LineCodec};

pub use electrum_types as types;

#[cfg(test)]
mod tests;
