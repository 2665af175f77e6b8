pub mod messages;
pub mod wire;

pub mod config;
pub mod dispatcher;
pub mod peer_rpc;
pub mod runtime;

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use parking_lot::Mutex;
use tinychain_core::block::PeerAddr;
use tinychain_core::{Blockchain, ConsensusTriple, Miner, PeerStatus, Wallet};

pub const DEFAULT_PORT: u16 = 41000;
pub const LISTENER_TIMEOUT_SECS: u64 = 10;

/// Chain, ledger, and both transaction pools, all mutated together under
/// one lock: almost every operation that touches one touches another.
pub struct ChainState {
    pub blockchain: Blockchain,
}

impl Default for ChainState {
    fn default() -> Self {
        ChainState {
            blockchain: Blockchain::new(),
        }
    }
}

/// Known peers and their last-reported status.
#[derive(Default)]
pub struct PeerState {
    pub peers: Vec<PeerAddr>,
    pub statuses: HashMap<PeerAddr, PeerStatus>,
    pub last_consensus: Option<ConsensusTriple>,
}

/// Miner lifecycle. `handle` is the cooperative stop-flag wrapper from
/// `tinychain-core`; `running` additionally tracks whether a mining task
/// is currently spawned, so `stop_miner` knows whether to wait.
pub struct MiningState {
    pub miner: Miner,
    pub running: AtomicBool,
    pub task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Default for MiningState {
    fn default() -> Self {
        MiningState {
            miner: Miner::new(),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }
}

pub struct NodeMeta {
    pub wallet: Wallet,
    pub host: Ipv4Addr,
    pub port: Mutex<u16>,
    pub is_listening: AtomicBool,
    pub start_time: std::time::Instant,
    pub listener_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// All node-wide state, grouped into lock-per-aggregate. Lock order when
/// more than one is held at once: `chain` -> `peers` -> `mining`. `meta`
/// carries no lock of its own beyond its individual fields and may be read
/// at any point in that order.
pub struct NodeHandles {
    pub chain: Mutex<ChainState>,
    pub peers: Mutex<PeerState>,
    pub mining: MiningState,
    pub meta: NodeMeta,
}

pub type NodeHandle = Arc<NodeHandles>;

impl NodeHandles {
    pub fn new(wallet: Wallet, host: Ipv4Addr, port: u16) -> NodeHandle {
        Arc::new(NodeHandles {
            chain: Mutex::new(ChainState::default()),
            peers: Mutex::new(PeerState::default()),
            mining: MiningState::default(),
            meta: NodeMeta {
                wallet,
                host,
                port: Mutex::new(port),
                is_listening: AtomicBool::new(false),
                start_time: std::time::Instant::now(),
                listener_task: Mutex::new(None),
            },
        })
    }

    pub fn local_address(&self) -> PeerAddr {
        (self.meta.host.to_string(), *self.meta.port.lock())
    }

    pub fn local_address_str(&self) -> String {
        let addr = self.local_address();
        format!("{}:{}", addr.0, addr.1)
    }
}
