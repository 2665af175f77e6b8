//! Cooperative nonce search with an external stop signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::block::Block;
use crate::chain::PROOF_TARGET;

#[derive(Debug, Clone)]
pub struct Miner {
    is_mining: Arc<AtomicBool>,
}

impl Default for Miner {
    fn default() -> Self {
        Self::new()
    }
}

impl Miner {
    pub fn new() -> Self {
        Miner {
            is_mining: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_mining(&self) -> bool {
        self.is_mining.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.is_mining.store(false, Ordering::SeqCst);
    }

    /// Searches for a nonce making `block`'s hash start with
    /// `MINING_DIFFICULTY` zeros, starting from nonce 0. Checks the stop
    /// flag before every hash attempt. Returns `(block, proof)` on
    /// success, `(block, "")` if stopped first.
    pub fn mine_block(&self, mut block: Block) -> (Block, String) {
        self.is_mining.store(true, Ordering::SeqCst);
        block.nonce = 0;

        loop {
            if !self.is_mining.load(Ordering::SeqCst) {
                return (block, String::new());
            }
            let hash = block.compute_hash();
            if hash.starts_with(PROOF_TARGET.as_str()) {
                self.is_mining.store(false, Ordering::SeqCst);
                return (block, hash);
            }
            block.nonce += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;

    fn node() -> (String, u16) {
        ("127.0.0.1".to_string(), 41000)
    }

    #[test]
    fn mines_a_valid_proof() {
        let miner = Miner::new();
        let block = Block::genesis(vec![], node(), "2024-01-01T00:00:00+00:00".into());
        let (mined, proof) = miner.mine_block(block);
        assert_eq!(proof, mined.compute_hash());
        assert!(proof.starts_with("000000"));
    }

    #[test]
    fn stopping_before_start_yields_empty_proof() {
        let miner = Miner::new();
        miner.stop();
        // force the loop to observe the flag as false immediately by
        // setting it again after mine_block flips it to true internally
        // is not directly testable without threads; instead verify the
        // flag API itself.
        assert!(!miner.is_mining());
    }

    #[test]
    fn concurrent_stop_interrupts_mining() {
        let miner = Miner::new();
        let stopper = miner.clone();
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(5));
            stopper.stop();
        });
        // a block that is astronomically unlikely to satisfy 6 zero
        // hex digits within a few milliseconds of nonce search
        let block = Block::genesis(vec![], node(), "2024-01-01T00:00:00+00:00".into());
        let (_, proof) = miner.mine_block(block);
        assert!(proof.is_empty() || proof.starts_with("000000"));
    }
}
