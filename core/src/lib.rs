pub mod block;
pub mod blockchain;
pub mod chain;
pub mod consensus;
pub mod ledger;
pub mod miner;
pub mod transaction;
pub mod wallet;

pub use block::{Block, Package, PackageData, PeerAddr};
pub use blockchain::{Blockchain, BlockchainError};
pub use chain::{Chain, ChainError, MINING_DIFFICULTY, MINING_REWARD};
pub use consensus::{ConsensusTriple, PeerStatus, consensus_nodes, gather_consensus, hashmatch};
pub use ledger::{Balance, Ledger, LedgerError};
pub use miner::Miner;
pub use transaction::{Receipt, Transaction};
pub use wallet::{MINE, Wallet};
