//! Typed RPC facade over a [`Session`].
//!
//! Every operation is a thin wrapper: build the string params, run the
//! synchronous-call primitive, re-decode the untyped result into its
//! method-specific shape. Domain semantics of the decoded data are not
//! validated here.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use electrum_types::{Balance, BlockHeader, Peer, ServerInfo, Tx, TxMerkle, VersionInfo};

use crate::error::{Error, Result};
use crate::options::Options;
use crate::protocol::{Envelope, PROTOCOL_1_0, PROTOCOL_1_2};
use crate::session::Session;
use crate::subscription::{PushHandler, SubscriptionHandle};

/// Electrum protocol client.
///
/// Cloning is cheap and shares the underlying session.
#[derive(Clone)]
pub struct Client {
    session: Session,
    protocol: String,
    agent_id: String,
}

impl Client {
    /// Connect to the server described by `options`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectFailed`] if the initial dial fails.
    pub async fn connect(options: Options) -> Result<Self> {
        let protocol = options.protocol.clone();
        let agent_id = options.agent_id();
        let session = Session::open(options).await?;
        Ok(Self {
            session,
            protocol,
            agent_id,
        })
    }

    /// The underlying session, for raw calls and subscriptions.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Close the session and terminate network communications. Idempotent.
    pub fn close(&self) {
        self.session.close();
    }

    /// Second decode phase shared by most operations: reject envelopes
    /// carrying a server error, then decode `result` into `T`.
    async fn call_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<String>,
    ) -> Result<T> {
        let envelope = self.session.call(method, params).await?;
        if let Some(error) = envelope.error {
            return Err(error.into());
        }
        let result = envelope.result.ok_or(Error::UnexpectedResponse)?;
        Ok(serde_json::from_value(result)?)
    }

    /// Run a `server.ping` to keep the session alive and check the server
    /// is responding. Only part of protocol 1.2.
    ///
    /// # Errors
    ///
    /// [`Error::Unavailable`] on earlier protocol versions.
    pub async fn server_ping(&self) -> Result<()> {
        if self.protocol != PROTOCOL_1_2 {
            return Err(Error::Unavailable(self.protocol.clone()));
        }
        let envelope = self.session.call("server.ping", vec![]).await?;
        if let Some(error) = envelope.error {
            return Err(error.into());
        }
        Ok(())
    }

    /// Run a `server.version` operation.
    ///
    /// The result shape depends on the negotiated protocol: a bare software
    /// string on 1.0, a `[software, protocol]` pair from 1.1 on.
    pub async fn server_version(&self) -> Result<VersionInfo> {
        let envelope = self
            .session
            .call(
                "server.version",
                vec![self.agent_id.clone(), self.protocol.clone()],
            )
            .await?;
        if let Some(error) = envelope.error {
            return Err(error.into());
        }
        let result = envelope.result.ok_or(Error::UnexpectedResponse)?;

        if self.protocol == PROTOCOL_1_0 {
            return Ok(VersionInfo {
                software: serde_json::from_value(result)?,
                protocol: String::new(),
            });
        }
        let (software, protocol): (String, String) = serde_json::from_value(result)?;
        Ok(VersionInfo { software, protocol })
    }

    /// Run a `server.banner` operation.
    pub async fn server_banner(&self) -> Result<String> {
        self.call_typed("server.banner", vec![]).await
    }

    /// Run a `server.donation_address` operation.
    pub async fn server_donation_address(&self) -> Result<String> {
        self.call_typed("server.donation_address", vec![]).await
    }

    /// List features and services supported by the server.
    ///
    /// # Errors
    ///
    /// [`Error::Unavailable`] on protocol 1.0.
    pub async fn server_features(&self) -> Result<ServerInfo> {
        if self.protocol == PROTOCOL_1_0 {
            return Err(Error::Unavailable(self.protocol.clone()));
        }
        self.call_typed("server.features", vec![]).await
    }

    /// List peer servers known to this server.
    pub async fn server_peers(&self) -> Result<Vec<Peer>> {
        let raw: Vec<(String, String, Vec<String>)> =
            self.call_typed("server.peers.subscribe", vec![]).await?;
        Ok(raw
            .into_iter()
            .map(|(address, name, features)| Peer {
                address,
                name,
                features,
            })
            .collect())
    }

    /// Run a `blockchain.address.get_balance` operation.
    pub async fn address_balance(&self, address: &str) -> Result<Balance> {
        self.call_typed("blockchain.address.get_balance", vec![address.to_string()])
            .await
    }

    /// Run a `blockchain.address.get_history` operation.
    pub async fn address_history(&self, address: &str) -> Result<Vec<Tx>> {
        self.call_typed("blockchain.address.get_history", vec![address.to_string()])
            .await
    }

    /// Run a `blockchain.address.get_mempool` operation.
    pub async fn address_mempool(&self, address: &str) -> Result<Vec<Tx>> {
        self.call_typed("blockchain.address.get_mempool", vec![address.to_string()])
            .await
    }

    /// Run a `blockchain.address.listunspent` operation.
    pub async fn address_list_unspent(&self, address: &str) -> Result<Vec<Tx>> {
        self.call_typed("blockchain.address.listunspent", vec![address.to_string()])
            .await
    }

    /// Run a `blockchain.block.get_header` operation.
    pub async fn block_header(&self, height: u64) -> Result<BlockHeader> {
        self.call_typed("blockchain.block.get_header", vec![height.to_string()])
            .await
    }

    /// Broadcast a raw transaction to the network; returns its hash.
    ///
    /// Rejection is reported through the structured error field when the
    /// server populates it; matching "rejected" in a string result is kept
    /// only as a fallback for servers that answer rejections with a bare
    /// message instead of an error object.
    ///
    /// # Errors
    ///
    /// [`Error::RejectedTx`] when the server refuses the transaction.
    pub async fn broadcast_transaction(&self, raw_tx: &str) -> Result<String> {
        let envelope = self
            .session
            .call("blockchain.transaction.broadcast", vec![raw_tx.to_string()])
            .await?;

        if let Some(error) = envelope.error {
            if error.message.to_lowercase().contains("rejected") {
                return Err(Error::RejectedTx);
            }
            return Err(error.into());
        }
        match envelope.result {
            Some(Value::String(hash)) if hash.contains("rejected") => Err(Error::RejectedTx),
            Some(Value::String(hash)) => Ok(hash),
            None => Err(Error::RejectedTx),
            Some(_) => Err(Error::UnexpectedResponse),
        }
    }

    /// Run a `blockchain.transaction.get` operation; returns the raw
    /// transaction hex.
    pub async fn transaction(&self, hash: &str) -> Result<String> {
        self.call_typed("blockchain.transaction.get", vec![hash.to_string()])
            .await
    }

    /// Run a `blockchain.transaction.get_merkle` operation.
    pub async fn transaction_merkle(&self, tx: &str, height: u64) -> Result<TxMerkle> {
        self.call_typed(
            "blockchain.transaction.get_merkle",
            vec![tx.to_string(), height.to_string()],
        )
        .await
    }

    /// Estimate the fee, in coins per kilobyte, for a transaction to be
    /// confirmed within `blocks` blocks.
    pub async fn estimate_fee(&self, blocks: u32) -> Result<f64> {
        self.call_typed("blockchain.estimatefee", vec![blocks.to_string()])
            .await
    }

    /// `blockchain.utxo.get_address`: removed from the protocol.
    ///
    /// # Errors
    ///
    /// Always [`Error::Deprecated`].
    pub fn utxo_address(&self, _utxo: &str) -> Result<String> {
        Err(Error::Deprecated)
    }

    /// `blockchain.block.get_chunk`: removed in protocol 1.2.
    ///
    /// # Errors
    ///
    /// Always [`Error::Deprecated`].
    pub fn block_chunk(&self, _index: u64) -> Result<Value> {
        Err(Error::Deprecated)
    }

    /// `blockchain.numblocks.subscribe`: removed from the protocol.
    ///
    /// # Errors
    ///
    /// Always [`Error::Deprecated`].
    pub fn notify_block_nums(&self) -> Result<mpsc::UnboundedReceiver<u64>> {
        Err(Error::Deprecated)
    }

    /// Subscribe to `blockchain.headers.subscribe`.
    ///
    /// The initial reply delivers the current chain tip; each push delivers
    /// newly announced headers. The channel stays live across reconnects.
    pub async fn notify_block_headers(
        &self,
    ) -> Result<(SubscriptionHandle, mpsc::UnboundedReceiver<BlockHeader>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: PushHandler = Arc::new(move |envelope: &Envelope| {
            if let Some(result) = &envelope.result {
                forward_decoded(&tx, result);
            }
            if let Some(Value::Array(items)) = &envelope.params {
                for item in items {
                    forward_decoded(&tx, item);
                }
            }
        });
        let handle = self
            .session
            .subscribe("blockchain.headers.subscribe", vec![], handler)
            .await?;
        Ok((handle, rx))
    }

    /// Subscribe to `blockchain.address.subscribe` for one address.
    ///
    /// Delivers the status strings the server reports for the address; the
    /// channel stays live across reconnects.
    pub async fn notify_address_transactions(
        &self,
        address: &str,
    ) -> Result<(SubscriptionHandle, mpsc::UnboundedReceiver<String>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: PushHandler = Arc::new(move |envelope: &Envelope| {
            if let Some(Value::String(status)) = &envelope.result {
                let _ = tx.send(status.clone());
            }
            if let Some(Value::Array(items)) = &envelope.params {
                for item in items {
                    if let Value::String(status) = item {
                        let _ = tx.send(status.clone());
                    }
                }
            }
        });
        let handle = self
            .session
            .subscribe(
                "blockchain.address.subscribe",
                vec![address.to_string()],
                handler,
            )
            .await?;
        Ok((handle, rx))
    }

    /// Remove a subscription and stop its delivery loop. Idempotent.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.session.unsubscribe(handle);
    }
}

fn forward_decoded(tx: &mpsc::UnboundedSender<BlockHeader>, value: &Value) {
    match serde_json::from_value::<BlockHeader>(value.clone()) {
        Ok(header) => {
            let _ = tx.send(header);
        }
        Err(e) => warn!(error = %e, "dropping undecodable header"),
    }
}
