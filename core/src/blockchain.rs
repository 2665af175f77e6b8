//! [`Blockchain`]: the chain and ledger together, plus the free/firm
//! transaction pools and the running block/transaction counters.

use chrono::Utc;
use thiserror::Error;

use crate::block::{Block, PeerAddr};
use crate::chain::{Chain, ChainError, MINING_REWARD};
use crate::consensus::PeerStatus;
use crate::ledger::{Ledger, LedgerError};
use crate::transaction::{Receipt, Transaction};
use crate::wallet::MINE;

/// Errors from accepting a block: either the chain's own append checks, or
/// the ledger rejecting one of the block's receipts as unaffordable.
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Default)]
pub struct Blockchain {
    chain: Chain,
    ledger: Ledger,
    free_pool: Vec<Receipt>,
    firm_pool: Vec<Receipt>,
    block_count: u64,
    transaction_count: u64,
}

impl Blockchain {
    pub fn new() -> Self {
        Blockchain {
            chain: Chain::new(),
            ledger: Ledger::new(),
            free_pool: Vec::new(),
            firm_pool: Vec::new(),
            block_count: 0,
            transaction_count: 0,
        }
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn free_pool(&self) -> &[Receipt] {
        &self.free_pool
    }

    pub fn firm_pool(&self) -> &[Receipt] {
        &self.firm_pool
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    pub fn transaction_count(&self) -> u64 {
        self.transaction_count
    }

    /// Inserts `receipt` into the free pool unless an equal receipt is
    /// already present (in either pool, or already mined into the chain).
    /// Keeps the free pool sorted by timestamp.
    pub fn submit_transaction(&mut self, receipt: Receipt) {
        if self.free_pool.contains(&receipt) || self.firm_pool.contains(&receipt) {
            return;
        }
        if self
            .chain
            .packages()
            .iter()
            .any(|p| p.transactions.contains(&receipt))
        {
            return;
        }
        self.free_pool.push(receipt);
        self.free_pool.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    }

    /// Step 1-2 of the mining loop: builds a coinbase receipt for
    /// `miner_address`, validates the whole free pool (coinbase first)
    /// against the ledger, drains the free pool, and stashes the firm
    /// subset. Returns the firm receipts that will go into the next block.
    pub fn prepare_firm_pool(&mut self, miner_address: &str) -> Vec<Receipt> {
        let coinbase = Transaction::coinbase(miner_address, MINING_REWARD).into_receipt(String::new());
        let mut batch = Vec::with_capacity(self.free_pool.len() + 1);
        batch.push(coinbase);
        batch.extend(self.free_pool.drain(..));

        let firm = self.ledger.validate_batch(&batch);
        self.firm_pool = firm.clone();
        firm
    }

    /// Builds the next candidate block (unmined) at the current tip.
    pub fn next_block(&self, transactions: Vec<Receipt>, node: PeerAddr) -> Block {
        let timestamp = Utc::now().to_rfc3339();
        match self.chain.last() {
            Some(tip) => Block::next(
                self.chain.len() as u64,
                tip.data.block_hash.clone(),
                transactions,
                node,
                timestamp,
            ),
            None => Block::genesis(transactions, node, timestamp),
        }
    }

    /// Returns the firm pool's receipts to the head of the free pool and
    /// clears the firm pool. Used when mining is interrupted before a
    /// block is accepted.
    pub fn abandon_firm_pool(&mut self) {
        let mut returned = std::mem::take(&mut self.firm_pool);
        // drop the coinbase, which is always first
        if !returned.is_empty() {
            returned.remove(0);
        }
        returned.extend(std::mem::take(&mut self.free_pool));
        self.free_pool = returned;
    }

    /// Accepts a mined or peer-provided block: checks the receipts are
    /// affordable against a projected ledger first, then runs the chain's
    /// acceptance gate, then commits the projected ledger, counters, and
    /// both pools (removing any receipt that made it into the block). The
    /// ledger check runs before the chain append so a block with an
    /// unaffordable receipt never makes it onto the chain in the first
    /// place.
    pub fn accept_block(&mut self, block: Block, proof: String) -> Result<(), BlockchainError> {
        let transactions = block.transactions.clone();
        let mut projected_ledger = self.ledger.clone();
        projected_ledger.apply(&transactions)?;

        self.chain.add_block(block, proof)?;
        self.ledger = projected_ledger;
        self.block_count += 1;
        self.transaction_count += transactions.len() as u64;

        self.free_pool.retain(|r| !transactions.contains(r));
        self.firm_pool.retain(|r| !transactions.contains(r));

        Ok(())
    }

    pub fn balance_of(&self, address: &str) -> crate::ledger::Balance {
        if address == MINE {
            return crate::ledger::Balance::Infinite;
        }
        self.ledger.balance_of(address)
    }

    /// This node's own status, derived from its current chain tip.
    pub fn status(&self) -> PeerStatus {
        match self.chain.last() {
            Some(package) => PeerStatus {
                index: package.data.index as i64,
                hash: package.data.block_hash.clone(),
                time: package.data.timestamp.clone(),
            },
            None => PeerStatus::empty_chain(),
        }
    }

    /// Drops blocks beyond `keep_len` (used by fork reconciliation to roll
    /// back to a peer-confirmed match point) and rebuilds the ledger and
    /// counters from what remains.
    pub fn truncate_to(&mut self, keep_len: usize) {
        while self.chain.len() > keep_len {
            self.chain.pop();
        }
        self.rebuild_derived_state();
    }

    /// Drops the entire chain. Used when no peer shares even block 0 with
    /// this node.
    pub fn clear_chain(&mut self) {
        self.chain.clear();
        self.rebuild_derived_state();
    }

    fn rebuild_derived_state(&mut self) {
        self.ledger = Ledger::new();
        self.block_count = self.chain.len() as u64;
        self.transaction_count = 0;
        for package in self.chain.packages() {
            self.ledger
                .apply(&package.transactions)
                .expect("chain blocks were already validated against the ledger once");
            self.transaction_count += package.transactions.len() as u64;
        }
    }
}
