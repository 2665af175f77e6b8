//! The wallet: an address plus the private signing secret that produced it.
//!
//! Key and address generation is treated as an external collaborator — the
//! production system may swap this for a hardware-backed signer or a
//! different curve entirely. What the rest of the node relies on is only
//! the shape: an opaque address string, and a private secret the wallet
//! keeps to itself and hands to [`Transaction::sign`](crate::transaction::Transaction::sign).
//! This module is the default, in-memory implementation of that interface.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// The reserved coinbase address. Carries an implicit infinite balance in
/// the ledger and is never debited.
pub const MINE: &str = "MINE";

#[derive(Debug, Clone)]
pub struct Wallet {
    address: String,
    private_key: String,
}

impl Wallet {
    /// Generates a fresh keypair: a random 32-byte secret, hex-encoded as
    /// the private key, and its SHA-256 digest as the address.
    pub fn generate() -> Self {
        let mut secret_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret_bytes);
        let private_key = hex::encode(secret_bytes);
        let address = hex::encode(Sha256::digest(private_key.as_bytes()));
        Wallet {
            address,
            private_key,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }
}
