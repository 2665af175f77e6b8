//! Blocks and their packaged wire/storage form.
//!
//! A [`Block`] never carries its own hash: the hash is computed on demand
//! from the canonical encoding of its fields, and only travels alongside
//! the block as `proof` once it has been mined. The [`Package`] is what
//! actually gets stored in the chain and gossiped to peers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::transaction::Receipt;

/// A peer identity, `(host, port)`. Serializes as a 2-element JSON array
/// at every wire boundary, matching how the rest of the network speaks of
/// node addresses.
pub type PeerAddr = (String, u16);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub previous_hash: String,
    pub transactions: Vec<Receipt>,
    pub timestamp: String,
    pub nonce: u64,
    pub node: PeerAddr,
}

impl Block {
    pub fn genesis(transactions: Vec<Receipt>, node: PeerAddr, timestamp: String) -> Self {
        Block {
            index: 0,
            previous_hash: String::new(),
            transactions,
            timestamp,
            nonce: 0,
            node,
        }
    }

    pub fn next(
        index: u64,
        previous_hash: String,
        transactions: Vec<Receipt>,
        node: PeerAddr,
        timestamp: String,
    ) -> Self {
        Block {
            index,
            previous_hash,
            transactions,
            timestamp,
            nonce: 0,
            node,
        }
    }

    /// The canonical direct-attribute-map encoding: lexicographically
    /// sorted keys, no extraneous whitespace beyond the default separators.
    pub fn canonical_encoding(&self) -> String {
        let mut map = BTreeMap::new();
        map.insert("index", json!(self.index));
        map.insert("previous_hash", json!(self.previous_hash));
        map.insert("transactions", json!(self.transactions));
        map.insert("timestamp", json!(self.timestamp));
        map.insert("nonce", json!(self.nonce));
        map.insert("node", json!(self.node));
        serde_json::to_string(&map).expect("canonical map always serializes")
    }

    pub fn compute_hash(&self) -> String {
        hex::encode(Sha256::digest(self.canonical_encoding().as_bytes()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageData {
    #[serde(rename = "Index")]
    pub index: u64,
    #[serde(rename = "Block Hash")]
    pub block_hash: String,
    #[serde(rename = "Nonce")]
    pub nonce: u64,
    #[serde(rename = "Previous Hash")]
    pub previous_hash: String,
    #[serde(rename = "Number of transactions")]
    pub number_of_transactions: usize,
    #[serde(rename = "Node Address")]
    pub node_address: PeerAddr,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
}

/// The wire and storage form of a block: a `DATA` header (carrying the
/// hash) alongside the `TRANSACTIONS` list. This is the unit of chain
/// storage and of block gossip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    #[serde(rename = "DATA")]
    pub data: PackageData,
    #[serde(rename = "TRANSACTIONS")]
    pub transactions: Vec<Receipt>,
}

pub fn package_block(block: Block, proof: String) -> Package {
    let data = PackageData {
        index: block.index,
        block_hash: proof,
        nonce: block.nonce,
        previous_hash: block.previous_hash,
        number_of_transactions: block.transactions.len(),
        node_address: block.node,
        timestamp: block.timestamp,
    };
    Package {
        data,
        transactions: block.transactions,
    }
}

pub fn block_from_package(package: &Package) -> Block {
    Block {
        index: package.data.index,
        previous_hash: package.data.previous_hash.clone(),
        transactions: package.transactions.clone(),
        timestamp: package.data.timestamp.clone(),
        nonce: package.data.nonce,
        node: package.data.node_address.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node() -> PeerAddr {
        ("127.0.0.1".to_string(), 41000)
    }

    #[test]
    fn canonical_encoding_is_stable_and_sorted() {
        let block = Block::genesis(vec![], sample_node(), "2024-01-01T00:00:00+00:00".into());
        let encoded = block.canonical_encoding();
        // keys must appear in lexicographic order
        let index_pos = encoded.find("\"index\"").unwrap();
        let node_pos = encoded.find("\"node\"").unwrap();
        let nonce_pos = encoded.find("\"nonce\"").unwrap();
        assert!(index_pos < node_pos);
        assert!(node_pos < nonce_pos);
    }

    #[test]
    fn package_round_trip_preserves_fields() {
        let block = Block::genesis(vec![], sample_node(), "2024-01-01T00:00:00+00:00".into());
        let hash = block.compute_hash();
        let package = package_block(block.clone(), hash.clone());
        assert_eq!(package.data.block_hash, hash);
        assert_eq!(package.data.number_of_transactions, 0);

        let recovered = block_from_package(&package);
        assert_eq!(recovered.index, block.index);
        assert_eq!(recovered.previous_hash, block.previous_hash);
        assert_eq!(recovered.node, block.node);
    }

    #[test]
    fn package_wire_shape_uses_spec_keys() {
        let block = Block::genesis(vec![], sample_node(), "2024-01-01T00:00:00+00:00".into());
        let hash = block.compute_hash();
        let package = package_block(block, hash);
        let value = serde_json::to_value(&package).unwrap();
        assert!(value.get("DATA").is_some());
        assert!(value.get("TRANSACTIONS").is_some());
        assert!(value["DATA"].get("Block Hash").is_some());
        assert!(value["DATA"].get("Node Address").is_some());
    }
}
