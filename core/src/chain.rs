//! The chain itself: an ordered list of [`Package`]s plus the mining
//! parameters that govern what counts as a valid next block.

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::block::{Block, Package, package_block};

/// Number of leading zero hex digits a valid proof-of-work hash must carry.
pub const MINING_DIFFICULTY: usize = 6;

/// Coinbase amount paid to the miner of an accepted block.
pub const MINING_REWARD: u64 = 10;

/// `"0".repeat(MINING_DIFFICULTY)`, computed once and shared by every
/// proof check instead of rebuilt per call.
pub static PROOF_TARGET: Lazy<String> = Lazy::new(|| "0".repeat(MINING_DIFFICULTY));

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("block index {got} does not follow chain tip index {expected}")]
    IndexMismatch { expected: u64, got: u64 },
    #[error("block previous_hash does not match the hash of the current tip")]
    PreviousHashMismatch,
    #[error("proof {proof} does not satisfy the difficulty target or does not match the block it claims to prove")]
    InvalidProof { proof: String },
}

#[derive(Debug, Clone, Default)]
pub struct Chain {
    packages: Vec<Package>,
}

impl Chain {
    pub fn new() -> Self {
        Chain {
            packages: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn last(&self) -> Option<&Package> {
        self.packages.last()
    }

    pub fn get(&self, index: usize) -> Option<&Package> {
        self.packages.get(index)
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn hashlist(&self) -> Vec<String> {
        self.packages
            .iter()
            .map(|p| p.data.block_hash.clone())
            .collect()
    }

    pub fn pop(&mut self) -> Option<Package> {
        self.packages.pop()
    }

    pub fn clear(&mut self) {
        self.packages.clear();
    }

    /// Checks whether `proof` is both a valid hash of `block` and meets the
    /// difficulty target. A valid proof is the block's own `compute_hash`,
    /// not an arbitrary low-valued string: this closes a gap in the
    /// original acceptance check, which tested the claimed proof's
    /// difficulty but never confirmed the proof actually matched the block
    /// it was attached to.
    pub fn valid_proof(block: &Block, proof: &str) -> bool {
        proof == block.compute_hash() && proof.starts_with(PROOF_TARGET.as_str())
    }

    /// Appends `block` to the chain under `proof`, after checking index
    /// continuity, hash linkage, and proof validity. On success, returns
    /// the stored [`Package`].
    pub fn add_block(&mut self, block: Block, proof: String) -> Result<&Package, ChainError> {
        let expected_index = self.packages.len() as u64;
        if block.index != expected_index {
            return Err(ChainError::IndexMismatch {
                expected: expected_index,
                got: block.index,
            });
        }

        if let Some(tip) = self.packages.last() {
            if block.previous_hash != tip.data.block_hash {
                return Err(ChainError::PreviousHashMismatch);
            }
        } else if !block.previous_hash.is_empty() {
            return Err(ChainError::PreviousHashMismatch);
        }

        if !Self::valid_proof(&block, &proof) {
            return Err(ChainError::InvalidProof { proof });
        }

        self.packages.push(package_block(block, proof));
        Ok(self.packages.last().expect("just pushed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::PeerAddr;

    fn node() -> PeerAddr {
        ("127.0.0.1".to_string(), 41000)
    }

    fn mine(mut block: Block) -> (Block, String) {
        loop {
            let hash = block.compute_hash();
            if hash.starts_with(&"0".repeat(MINING_DIFFICULTY)) {
                return (block, hash);
            }
            block.nonce += 1;
        }
    }

    #[test]
    fn genesis_accepts_with_empty_previous_hash() {
        let mut chain = Chain::new();
        let block = Block::genesis(vec![], node(), "2024-01-01T00:00:00+00:00".into());
        let (block, proof) = mine(block);
        assert!(chain.add_block(block, proof).is_ok());
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn rejects_wrong_index() {
        let mut chain = Chain::new();
        let block = Block::next(
            5,
            String::new(),
            vec![],
            node(),
            "2024-01-01T00:00:00+00:00".into(),
        );
        let (block, proof) = mine(block);
        let err = chain.add_block(block, proof).unwrap_err();
        assert!(matches!(err, ChainError::IndexMismatch { .. }));
    }

    #[test]
    fn rejects_proof_that_does_not_match_block() {
        let mut chain = Chain::new();
        let block = Block::genesis(vec![], node(), "2024-01-01T00:00:00+00:00".into());
        let (block, mut proof) = mine(block);
        proof.replace_range(0..1, if &proof[0..1] == "0" { "1" } else { "0" });
        let err = chain.add_block(block, proof).unwrap_err();
        assert!(matches!(err, ChainError::InvalidProof { .. }));
    }

    #[test]
    fn rejects_previous_hash_mismatch() {
        let mut chain = Chain::new();
        let genesis = Block::genesis(vec![], node(), "2024-01-01T00:00:00+00:00".into());
        let (genesis, proof) = mine(genesis);
        chain.add_block(genesis, proof).unwrap();

        let bad_next = Block::next(
            1,
            "not the real tip hash".into(),
            vec![],
            node(),
            "2024-01-01T00:00:01+00:00".into(),
        );
        let (bad_next, proof) = mine(bad_next);
        let err = chain.add_block(bad_next, proof).unwrap_err();
        assert!(matches!(err, ChainError::PreviousHashMismatch));
    }
}
