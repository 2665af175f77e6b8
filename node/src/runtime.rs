//! Node-level behaviors that sit above the dispatcher and the pure
//! `tinychain-core` types: starting/stopping the listener and miner,
//! connecting to peers, consensus reconciliation, and read-only renders.

use std::sync::atomic::Ordering;

use tinychain_core::block::{Package, PeerAddr, package_block};
use tinychain_core::{Block, BlockchainError, PeerStatus, Transaction, gather_consensus};

use crate::peer_rpc;
use crate::{NodeHandle, dispatcher, messages};

/// Binds and starts accepting connections. No-op if already listening.
pub async fn start_event_listener(handle: NodeHandle) {
    if handle.meta.is_listening.load(Ordering::SeqCst) {
        return;
    }
    let task_handle = handle.clone();
    let task = tokio::spawn(async move {
        if let Err(e) = dispatcher::run_listener(task_handle).await {
            log::error!("event listener exited: {e}");
        }
    });
    *handle.meta.listener_task.lock() = Some(task);
}

/// Stops the miner (if running), signals the listener to stop, and joins
/// its task.
pub async fn stop_event_listener(handle: &NodeHandle) {
    stop_miner(handle).await;
    handle.meta.is_listening.store(false, Ordering::SeqCst);
    broadcast_disconnect(handle).await;

    let task = handle.meta.listener_task.lock().take();
    if let Some(task) = task {
        let _ = task.await;
    }
}

/// Starts the mining loop. Requires the event listener to already be up,
/// since mined blocks must be gossiped. No-op if already mining.
pub async fn start_miner(handle: NodeHandle) {
    if !handle.meta.is_listening.load(Ordering::SeqCst) {
        log::warn!("refusing to start miner before the event listener is up");
        return;
    }
    if handle.mining.running.swap(true, Ordering::SeqCst) {
        return;
    }
    let task_handle = handle.clone();
    let task = tokio::spawn(mining_loop(task_handle));
    *handle.mining.task.lock() = Some(task);
}

pub async fn stop_miner(handle: &NodeHandle) {
    if !handle.mining.running.swap(false, Ordering::SeqCst) {
        return;
    }
    handle.mining.miner.stop();
    let task = handle.mining.task.lock().take();
    if let Some(task) = task {
        let _ = task.await;
    }
}

async fn mining_loop(handle: NodeHandle) {
    while handle.mining.running.load(Ordering::SeqCst) {
        let miner_address = handle.meta.wallet.address().to_string();
        let node_addr = handle.local_address();

        let (transactions, block) = {
            let mut chain = handle.chain.lock();
            let transactions = chain.blockchain.prepare_firm_pool(&miner_address);
            let block = chain.blockchain.next_block(transactions.clone(), node_addr);
            (transactions, block)
        };

        let miner = handle.mining.miner.clone();
        let (mined_block, proof) = tokio::task::spawn_blocking(move || miner.mine_block(block))
            .await
            .expect("mining task panicked");

        if proof.is_empty() {
            let mut chain = handle.chain.lock();
            chain.blockchain.abandon_firm_pool();
            continue;
        }

        let accepted = {
            let mut chain = handle.chain.lock();
            chain.blockchain.accept_block(mined_block.clone(), proof.clone())
        };

        match accepted {
            Ok(()) => {
                log::info!("mined block at index {}", mined_block.index);
                let _ = transactions;
                gossip_block(&handle, &mined_block, &proof).await;
                broadcast_status(&handle).await;
            }
            Err(e) => {
                log::warn!("mined block rejected by own chain: {e}");
                let mut chain = handle.chain.lock();
                chain.blockchain.abandon_firm_pool();
            }
        }
    }
}

/// Connects to a single peer by `node` handshake and records it.
pub async fn connect_to_node(handle: &NodeHandle, peer: PeerAddr) {
    let local = handle.local_address();
    if peer == local {
        return;
    }
    if let Some((_, confirmed)) = peer_rpc::call::<PeerAddr, PeerAddr>(&peer, messages::NODE, &local).await {
        let mut peers = handle.peers.lock();
        if !peers.peers.contains(&confirmed) {
            peers.peers.push(confirmed);
        }
    }
}

/// Bootstraps from a single seed peer: exchanges peer lists, connects to
/// everything new, and trades free-pool transactions.
pub async fn connect_to_network(handle: &NodeHandle, seed: PeerAddr) {
    let local = handle.local_address();
    let Some((discovered, confirmed)) = peer_rpc::call_network(&seed, &local).await else {
        return;
    };

    {
        let mut peers = handle.peers.lock();
        if confirmed != local && !peers.peers.contains(&confirmed) {
            peers.peers.push(confirmed.clone());
        }
    }

    for peer in discovered {
        if peer != local {
            connect_to_node(handle, peer).await;
        }
    }

    let known_peers = { handle.peers.lock().peers.clone() };
    for peer in known_peers {
        if let Some((_, confirmed)) = peer_rpc::call::<PeerAddr, bool>(&peer, messages::GET_TRANSACTIONS, &local).await
        {
            let _ = confirmed;
        }
    }
}

pub async fn disconnect_from_network(handle: &NodeHandle) {
    broadcast_disconnect(handle).await;
    let mut peers = handle.peers.lock();
    peers.peers.clear();
    peers.statuses.clear();
    peers.last_consensus = None;
}

pub async fn broadcast_disconnect(handle: &NodeHandle) {
    let local = handle.local_address();
    let known_peers = { handle.peers.lock().peers.clone() };
    for peer in known_peers {
        let _ = peer_rpc::call::<PeerAddr, PeerAddr>(&peer, messages::DISCONNECT, &local).await;
    }
}

pub async fn broadcast_status(handle: &NodeHandle) {
    let local = handle.local_address();
    let status = { handle.chain.lock().blockchain.status() };
    let known_peers = { handle.peers.lock().peers.clone() };
    for peer in known_peers {
        let _ = peer_rpc::call::<(PeerAddr, PeerStatus), (PeerAddr, PeerStatus)>(
            &peer,
            messages::STATUS,
            &(local.clone(), status.clone()),
        )
        .await;
    }
}

async fn gossip_block(handle: &NodeHandle, block: &Block, proof: &str) {
    let package = package_block(block.clone(), proof.to_string());
    let known_peers = { handle.peers.lock().peers.clone() };
    for peer in known_peers {
        let _ = peer_rpc::call::<Package, bool>(&peer, messages::NEW_BLOCK, &package).await;
    }
}

/// Called by the dispatcher's `new block` handler: pauses the in-flight
/// nonce search while the chain state is mutated so the miner never races
/// the accept. The mining loop restarts its own search automatically once
/// it observes the interruption, so no explicit resume is needed here.
pub async fn accept_incoming_block(handle: &NodeHandle, package: Package) -> bool {
    if handle.mining.running.load(Ordering::SeqCst) {
        handle.mining.miner.stop();
    }

    let (block, proof) = tinychain_core::block::block_from_package(&package);
    let result = {
        let mut chain = handle.chain.lock();
        chain.blockchain.accept_block(block, proof)
    };

    broadcast_status(handle).await;

    matches!(result, Ok(()))
}

/// Records a peer's self-reported status, recomputes consensus, and
/// reconciles the local chain if it is no longer on consensus.
pub async fn update_peer_status(handle: &NodeHandle, peer: PeerAddr, status: PeerStatus) {
    {
        let mut peers = handle.peers.lock();
        peers.statuses.insert(peer, status);
    }

    let local_status = { handle.chain.lock().blockchain.status() };
    let triple = {
        let mut peers = handle.peers.lock();
        peers.statuses.insert(handle.local_address(), local_status.clone());
        gather_consensus(&peers.statuses)
    };

    let Some(triple) = triple else { return };

    let on_consensus = local_status.index == triple.index
        && local_status.hash == triple.hash
        && local_status.time == triple.time;

    {
        let mut peers = handle.peers.lock();
        peers.last_consensus = Some(triple.clone());
    }

    if !on_consensus {
        achieve_consensus(handle, &triple).await;
    }
}

const MAX_ATTEMPTS_PER_PEER: usize = 3;

/// Rolls the local chain back to (or forward onto) the consensus chain,
/// then fetches whatever blocks are missing.
async fn achieve_consensus(handle: &NodeHandle, triple: &tinychain_core::ConsensusTriple) {
    let was_mining = handle.mining.running.load(Ordering::SeqCst);
    if was_mining {
        stop_miner(handle).await;
    }

    let consensus_peers = {
        let peers = handle.peers.lock();
        tinychain_core::consensus_nodes(&peers.statuses, triple)
    };

    if let Some(peer) = consensus_peers.first().cloned() {
        match_to_consensus_chain(handle, &peer).await;
        get_missing_blocks(handle, &consensus_peers, triple.index).await;
    }

    broadcast_status(handle).await;

    if was_mining {
        start_miner(handle.clone()).await;
    }
}

async fn match_to_consensus_chain(handle: &NodeHandle, peer: &PeerAddr) {
    let local_hashlist = { handle.chain.lock().blockchain.chain().hashlist() };
    let Some((_, match_index)) = peer_rpc::call::<Vec<String>, i64>(peer, messages::HASHMATCH, &local_hashlist).await
    else {
        return;
    };

    let mut chain = handle.chain.lock();
    if match_index < 0 {
        chain.blockchain.clear_chain();
    } else {
        chain.blockchain.truncate_to(match_index as usize + 1);
    }
}

/// Round-robins the consensus peers asking for each missing block by
/// index, bounded so a peer that keeps failing can't spin forever.
async fn get_missing_blocks(handle: &NodeHandle, peers: &[PeerAddr], target_index: i64) {
    if peers.is_empty() || target_index < 0 {
        return;
    }

    let mut next_index = { handle.chain.lock().blockchain.chain().len() as i64 };
    let mut attempts = 0usize;
    let max_attempts = peers.len() * MAX_ATTEMPTS_PER_PEER;

    while next_index <= target_index && attempts < max_attempts {
        let peer = &peers[attempts % peers.len()];
        attempts += 1;

        let Some((tag, value)) = peer_rpc::call_raw(peer, messages::INDEXED_BLOCK, &next_index).await else {
            continue;
        };
        if tag != messages::INDEXED_BLOCK {
            continue;
        }
        let Ok(package) = serde_json::from_value::<Package>(value) else {
            continue;
        };

        let (block, proof) = tinychain_core::block::block_from_package(&package);
        let result: Result<(), BlockchainError> = {
            let mut chain = handle.chain.lock();
            chain.blockchain.accept_block(block, proof)
        };

        match result {
            Ok(()) => {
                next_index += 1;
                attempts = 0;
            }
            Err(e) => log::warn!("rejected block {next_index} from peer during catch-up: {e}"),
        }
    }
}

/// Signs and submits a single self-originated transaction, for manual
/// testing of the transaction/mempool path.
pub async fn generate_test_transaction(handle: &NodeHandle, receiver: String, amount: u64) {
    let tx = Transaction::new(handle.meta.wallet.address().to_string(), receiver, amount);
    let signature = tx.sign(handle.meta.wallet.private_key());
    let receipt = tx.into_receipt(signature);
    let mut chain = handle.chain.lock();
    chain.blockchain.submit_transaction(receipt);
}

pub async fn generate_test_transactions(handle: &NodeHandle, receiver: String, amount: u64, count: usize) {
    for _ in 0..count {
        generate_test_transaction(handle, receiver.clone(), amount).await;
    }
}

pub fn render_chain(handle: &NodeHandle) -> String {
    let chain = handle.chain.lock();
    chain
        .blockchain
        .chain()
        .packages()
        .iter()
        .map(|p| format!("#{} {}", p.data.index, p.data.block_hash))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_last_block(handle: &NodeHandle) -> String {
    let chain = handle.chain.lock();
    match chain.blockchain.chain().last() {
        Some(package) => format!("{package:#?}"),
        None => "<empty chain>".to_string(),
    }
}

pub fn render_pools(handle: &NodeHandle) -> String {
    let chain = handle.chain.lock();
    format!(
        "free: {} pending, firm: {} staged",
        chain.blockchain.free_pool().len(),
        chain.blockchain.firm_pool().len()
    )
}

pub fn render_ledger(handle: &NodeHandle) -> String {
    let chain = handle.chain.lock();
    chain
        .blockchain
        .ledger()
        .iter()
        .map(|(addr, balance)| format!("{addr}: {balance}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_data(handle: &NodeHandle) -> String {
    let (block_count, transaction_count) = {
        let chain = handle.chain.lock();
        (chain.blockchain.block_count(), chain.blockchain.transaction_count())
    };
    let peer_count = handle.peers.lock().peers.len();
    format!(
        "node {} | uptime: {}s | blocks: {} | transactions: {} | peers: {} | mining: {}",
        handle.local_address_str(),
        handle.meta.start_time.elapsed().as_secs(),
        block_count,
        transaction_count,
        peer_count,
        handle.mining.running.load(Ordering::SeqCst),
    )
}

/// Number of background tasks currently running: up to one listener, one
/// miner.
pub fn active_task_count(handle: &NodeHandle) -> usize {
    let listener = handle.meta.is_listening.load(Ordering::SeqCst) as usize;
    let mining = handle.mining.running.load(Ordering::SeqCst) as usize;
    listener + mining
}
