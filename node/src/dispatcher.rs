//! Inbound connection handling: bind, accept, decode one message, route
//! on its tag, reply, close.

use std::sync::atomic::Ordering;

use serde_json::Value;
use tinychain_core::block::{Package, PeerAddr};
use tinychain_core::{Receipt, hashmatch};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Duration, timeout};

use crate::wire::{self, WireError};
use crate::{LISTENER_TIMEOUT_SECS, NodeHandle, messages, runtime};

/// Binds starting at the node's configured port, bumping on `EADDRINUSE`,
/// then accepts connections until `is_listening` is cleared. Each accepted
/// connection is handled on its own task.
pub async fn run_listener(handle: NodeHandle) -> anyhow::Result<()> {
    let mut port = *handle.meta.port.lock();
    let listener = loop {
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => break listener,
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                port += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    };
    // `local_addr` rather than the loop variable: a caller asking for port 0
    // (let the OS pick one, used by tests) would otherwise leave the wrong
    // value recorded.
    let bound_port = listener.local_addr()?.port();
    *handle.meta.port.lock() = bound_port;
    handle.meta.is_listening.store(true, Ordering::SeqCst);
    log::info!("event listener bound to 0.0.0.0:{bound_port}");

    while handle.meta.is_listening.load(Ordering::SeqCst) {
        match timeout(Duration::from_secs(LISTENER_TIMEOUT_SECS), listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                let task_handle = handle.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(task_handle, stream).await {
                        log::debug!("connection from {peer} ended with: {e}");
                    }
                });
            }
            Ok(Err(e)) => log::warn!("accept failed: {e}"),
            Err(_) => continue, // LISTENER_TIMEOUT tick: recheck is_listening
        }
    }

    log::info!("event listener on port {bound_port} stopped");
    Ok(())
}

async fn handle_connection(handle: NodeHandle, mut stream: TcpStream) -> Result<(), WireError> {
    let (tag, value) = wire::recv_message(&mut stream).await?;
    match tag.as_str() {
        messages::NODE => handle_node(&handle, &mut stream, value).await,
        messages::NETWORK => handle_network(&handle, &mut stream, value).await,
        messages::DISCONNECT => handle_disconnect(&handle, &mut stream, value).await,
        messages::TRANSACTION => handle_transaction(&handle, &mut stream, value).await,
        messages::GET_TRANSACTIONS => handle_get_transactions(&handle, &mut stream, value).await,
        messages::NEW_BLOCK => handle_new_block(&handle, &mut stream, value).await,
        messages::INDEXED_BLOCK => handle_indexed_block(&handle, &mut stream, value).await,
        messages::STATUS => handle_status(&handle, &mut stream, value).await,
        messages::HASHMATCH => handle_hashmatch(&handle, &mut stream, value).await,
        other => {
            log::warn!("unknown tag: {other}");
            Ok(())
        }
    }
}

async fn handle_node(handle: &NodeHandle, stream: &mut TcpStream, value: Value) -> Result<(), WireError> {
    let peer: PeerAddr = wire::decode_payload(value)?;
    add_peer(handle, peer);
    wire::send_message(stream, messages::CONFIRM, &handle.local_address()).await
}

async fn handle_network(handle: &NodeHandle, stream: &mut TcpStream, value: Value) -> Result<(), WireError> {
    let peer: PeerAddr = wire::decode_payload(value)?;
    let known = { handle.peers.lock().peers.clone() };
    wire::send_message(stream, messages::NODE_LIST, &known).await?;
    add_peer(handle, peer);
    wire::send_message(stream, messages::CONFIRM, &handle.local_address()).await
}

fn add_peer(handle: &NodeHandle, peer: PeerAddr) {
    let mut peers = handle.peers.lock();
    if peer != handle.local_address() && !peers.peers.contains(&peer) {
        peers.peers.push(peer);
    }
}

async fn handle_disconnect(handle: &NodeHandle, stream: &mut TcpStream, value: Value) -> Result<(), WireError> {
    let peer: PeerAddr = wire::decode_payload(value)?;
    {
        let mut peers = handle.peers.lock();
        peers.peers.retain(|p| p != &peer);
        peers.statuses.remove(&peer);
    }
    wire::send_message(stream, messages::CONFIRM, &handle.local_address()).await
}

async fn handle_transaction(handle: &NodeHandle, stream: &mut TcpStream, value: Value) -> Result<(), WireError> {
    let receipt: Receipt = wire::decode_payload(value)?;
    {
        let mut chain = handle.chain.lock();
        chain.blockchain.submit_transaction(receipt);
    }
    wire::send_message(stream, messages::CONFIRM, &handle.local_address()).await
}

async fn handle_get_transactions(
    handle: &NodeHandle,
    stream: &mut TcpStream,
    value: Value,
) -> Result<(), WireError> {
    let requester: PeerAddr = wire::decode_payload(value)?;
    let receipts = { handle.chain.lock().blockchain.free_pool().to_vec() };
    for receipt in receipts {
        let _ = crate::peer_rpc::call::<Receipt, PeerAddr>(&requester, messages::TRANSACTION, &receipt).await;
    }
    wire::send_message(stream, messages::CONFIRM, &true).await
}

async fn handle_new_block(handle: &NodeHandle, stream: &mut TcpStream, value: Value) -> Result<(), WireError> {
    let package: Package = wire::decode_payload(value)?;
    let accepted = runtime::accept_incoming_block(handle, package).await;
    wire::send_message(stream, messages::CONFIRM, &accepted).await
}

async fn handle_indexed_block(
    handle: &NodeHandle,
    stream: &mut TcpStream,
    value: Value,
) -> Result<(), WireError> {
    let index: i64 = wire::decode_payload(value)?;
    let package = if index < 0 {
        None
    } else {
        let chain = handle.chain.lock();
        chain.blockchain.chain().get(index as usize).cloned()
    };
    match package {
        Some(package) => wire::send_message(stream, messages::INDEXED_BLOCK, &package).await,
        None => wire::send_message(stream, messages::INDEX_ERROR, &serde_json::json!({})).await,
    }
}

async fn handle_status(handle: &NodeHandle, stream: &mut TcpStream, value: Value) -> Result<(), WireError> {
    let (peer_addr, status) = wire::decode_payload(value)?;
    runtime::update_peer_status(handle, peer_addr, status).await;

    let local_status = { handle.chain.lock().blockchain.status() };
    wire::send_message(stream, messages::STATUS, &(handle.local_address(), local_status)).await
}

async fn handle_hashmatch(handle: &NodeHandle, stream: &mut TcpStream, value: Value) -> Result<(), WireError> {
    let peer_hashlist: Vec<String> = wire::decode_payload(value)?;
    let local_hashlist = { handle.chain.lock().blockchain.chain().hashlist() };
    let match_index = hashmatch(&local_hashlist, &peer_hashlist);
    wire::send_message(stream, messages::MATCH_INDEX, &match_index).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tinychain_core::Wallet;
    use tokio::time::sleep;

    use super::*;
    use crate::{NodeHandles, peer_rpc};

    /// Starts `run_listener` on an OS-assigned port and waits for it to
    /// report itself listening, returning the address to dial it on.
    async fn spawn_node() -> (NodeHandle, PeerAddr) {
        let handle = NodeHandles::new(Wallet::generate(), "127.0.0.1".parse().unwrap(), 0);
        let listener_handle = handle.clone();
        tokio::spawn(async move {
            run_listener(listener_handle).await.unwrap();
        });

        for _ in 0..200 {
            if handle.meta.is_listening.load(Ordering::SeqCst) {
                return (handle.clone(), handle.local_address());
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("listener did not come up in time");
    }

    #[tokio::test]
    async fn node_handshake_confirms_and_records_peer() {
        let (handle, addr) = spawn_node().await;
        let caller = ("127.0.0.1".to_string(), 55001);

        let (tag, confirmed): (String, PeerAddr) =
            peer_rpc::call(&addr, messages::NODE, &caller).await.unwrap();

        assert_eq!(tag, messages::CONFIRM);
        assert_eq!(confirmed, addr);
        assert!(handle.peers.lock().peers.contains(&caller));
    }

    #[tokio::test]
    async fn transaction_is_queued_in_free_pool() {
        let (handle, addr) = spawn_node().await;
        let receipt = tinychain_core::Receipt {
            sender: tinychain_core::MINE.to_string(),
            receiver: "bob".to_string(),
            amount: 5,
            timestamp: "2024-01-01T00:00:00+00:00".to_string(),
            signature: String::new(),
        };

        let (tag, _confirmed): (String, PeerAddr) = peer_rpc::call(&addr, messages::TRANSACTION, &receipt)
            .await
            .unwrap();

        assert_eq!(tag, messages::CONFIRM);
        assert_eq!(handle.chain.lock().blockchain.free_pool(), &[receipt]);
    }

    #[tokio::test]
    async fn negative_indexed_block_request_returns_index_error() {
        let (_handle, addr) = spawn_node().await;

        let (tag, _value) = peer_rpc::call_raw(&addr, messages::INDEXED_BLOCK, &-1i64)
            .await
            .unwrap();

        assert_eq!(tag, messages::INDEX_ERROR);
    }

    #[tokio::test]
    async fn hashmatch_on_empty_chains_matches_at_start() {
        let (_handle, addr) = spawn_node().await;

        let (tag, match_index): (String, i64) = peer_rpc::call(&addr, messages::HASHMATCH, &Vec::<String>::new())
            .await
            .unwrap();

        assert_eq!(tag, messages::MATCH_INDEX);
        assert_eq!(match_index, -1);
    }
}
