//! Domain value types returned by Electrum index servers.
//!
//! These are plain decode targets for RPC results. The protocol layer in
//! `electrum-rpc` treats results as untyped JSON and re-decodes them into
//! these shapes per method; no validation of domain semantics happens here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Version information reported by a `server.version` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// String identifying the server software
    #[serde(default)]
    pub software: String,

    /// Protocol version the server settled on, empty on protocol 1.0
    #[serde(default)]
    pub protocol: String,
}

/// Endpoints a server can be reached at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    #[serde(default)]
    pub ssl_port: Option<u16>,

    #[serde(default)]
    pub tcp_port: Option<u16>,
}

/// General information about the state and capabilities of a server,
/// as reported by `server.features`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Endpoints this server can be reached at, keyed by hostname. Normally
    /// a single entry; extra entries describe alternative connection routes.
    #[serde(default)]
    pub hosts: HashMap<String, Host>,

    /// Hash of the genesis block; detects peers serving a different network
    #[serde(default)]
    pub genesis_hash: String,

    /// Hash function the server uses for script hashing
    #[serde(default)]
    pub hash_function: String,

    /// String identifying the server software
    #[serde(default)]
    pub server_version: String,

    /// Maximum protocol version the server speaks
    #[serde(default)]
    pub protocol_max: String,

    /// Minimum protocol version the server speaks
    #[serde(default)]
    pub protocol_min: String,
}

/// A known peer server node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub features: Vec<String>,
}

/// A transaction entry as listed in address history, mempool, and
/// unspent-output results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    #[serde(default, rename = "tx_hash")]
    pub hash: String,

    #[serde(default, rename = "tx_pos")]
    pub pos: u64,

    #[serde(default)]
    pub height: u64,

    #[serde(default)]
    pub value: u64,
}

/// Merkle branch of a confirmed transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMerkle {
    #[serde(default)]
    pub block_height: u64,

    #[serde(default)]
    pub pos: u64,

    #[serde(default)]
    pub merkle: Vec<String>,
}

/// Funds available to an address, confirmed and unconfirmed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    #[serde(default)]
    pub confirmed: u64,

    #[serde(default)]
    pub unconfirmed: u64,
}

/// Summarized details of a block in the chain, delivered by block-header
/// operations and the headers subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    #[serde(default)]
    pub block_height: u64,

    #[serde(default)]
    pub prev_block_hash: String,

    #[serde(default)]
    pub timestamp: u64,

    #[serde(default)]
    pub nonce: u64,

    #[serde(default)]
    pub merkle_root: String,

    #[serde(default)]
    pub utxo_root: String,

    #[serde(default)]
    pub version: i32,

    #[serde(default)]
    pub bits: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_decode() {
        let json = r#"{"confirmed":103873966,"unconfirmed":23450000}"#;
        let balance: Balance = serde_json::from_str(json).unwrap();
        assert_eq!(balance.confirmed, 103_873_966);
        assert_eq!(balance.unconfirmed, 23_450_000);
    }

    #[test]
    fn test_balance_missing_fields_default() {
        let balance: Balance = serde_json::from_str("{}").unwrap();
        assert_eq!(balance.confirmed, 0);
        assert_eq!(balance.unconfirmed, 0);
    }

    #[test]
    fn test_tx_field_renames() {
        let json = r#"{"tx_hash":"abcd","tx_pos":3,"height":200004,"value":5000}"#;
        let tx: Tx = serde_json::from_str(json).unwrap();
        assert_eq!(tx.hash, "abcd");
        assert_eq!(tx.pos, 3);
        assert_eq!(tx.height, 200_004);
        assert_eq!(tx.value, 5000);
    }

    #[test]
    fn test_block_header_decode() {
        let json = r#"{
            "block_height": 520481,
            "prev_block_hash": "000000000000000000ea0d0d0dcbd7a7c8d45be00ef34b1d1706ffdcba2d0b12",
            "timestamp": 1520495336,
            "nonce": 288954523,
            "merkle_root": "5c88c1f8b8f6e1f0ff3a0b2c6b38b0d88d90318c6c38d09ff216f43f5b9f0a14",
            "version": 536870912,
            "bits": 391129783
        }"#;
        let header: BlockHeader = serde_json::from_str(json).unwrap();
        assert_eq!(header.block_height, 520_481);
        assert_eq!(header.nonce, 288_954_523);
        assert!(header.utxo_root.is_empty());
    }

    #[test]
    fn test_server_info_hosts() {
        let json = r#"{
            "hosts": {"node.example.org": {"ssl_port": 50002, "tcp_port": 50001}},
            "genesis_hash": "000000000019d6689c085ae165831e93",
            "hash_function": "sha256",
            "server_version": "ElectrumX 1.4.3",
            "protocol_max": "1.4",
            "protocol_min": "1.1"
        }"#;
        let info: ServerInfo = serde_json::from_str(json).unwrap();
        let host = &info.hosts["node.example.org"];
        assert_eq!(host.ssl_port, Some(50002));
        assert_eq!(host.tcp_port, Some(50001));
        assert_eq!(info.protocol_min, "1.1");
    }

    #[test]
    fn test_host_null_ports() {
        let host: Host = serde_json::from_str(r#"{"ssl_port": null, "tcp_port": 50001}"#).unwrap();
        assert_eq!(host.ssl_port, None);
        assert_eq!(host.tcp_port, Some(50001));
    }

    #[test]
    fn test_tx_merkle_decode() {
        let json = r#"{"block_height":450538,"pos":710,"merkle":["aa","bb"]}"#;
        let merkle: TxMerkle = serde_json::from_str(json).unwrap();
        assert_eq!(merkle.block_height, 450_538);
        assert_eq!(merkle.merkle.len(), 2);
    }

    #[test]
    fn test_version_info_roundtrip() {
        let info = VersionInfo {
            software: "ElectrumX 1.4.3".to_string(),
            protocol: "1.2".to_string(),
        };
        let json = serde_json::to_string(&info).unwrap();
        let parsed: VersionInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, info);
    }
}
