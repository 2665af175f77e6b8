//! Outbound peer calls: one fresh connection per call, one request,
//! optionally one (or more) framed responses, then close. Connection
//! refusal and any other wire failure is reported as a warning and the
//! caller is expected to move on to the next peer.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tinychain_core::block::PeerAddr;
use tokio::net::TcpStream;

use crate::messages;
use crate::wire::{self, WireError};

async fn connect(addr: &PeerAddr) -> Result<TcpStream, WireError> {
    TcpStream::connect((addr.0.as_str(), addr.1))
        .await
        .map_err(WireError::Io)
}

/// Sends `tag`/`payload` to `addr` and reads back exactly one response,
/// decoded as `Resp`. Returns `None` on any wire failure (including
/// connection refused), after logging a warning.
pub async fn call<Req, Resp>(addr: &PeerAddr, tag: &str, payload: &Req) -> Option<(String, Resp)>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    match try_call(addr, tag, payload).await {
        Ok(result) => Some(result),
        Err(err) => {
            log::warn!("rpc {} to {}:{} failed: {}", tag, addr.0, addr.1, err);
            None
        }
    }
}

async fn try_call<Req, Resp>(
    addr: &PeerAddr,
    tag: &str,
    payload: &Req,
) -> Result<(String, Resp), WireError>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let mut stream = connect(addr).await?;
    wire::send_message(&mut stream, tag, payload).await?;
    let (response_tag, value) = wire::recv_message(&mut stream).await?;
    let decoded = wire::decode_payload(value)?;
    Ok((response_tag, decoded))
}

/// `network` bootstrap call: the peer first sends a `node list`, then a
/// `confirm`. Both are read off the same connection before it closes.
pub async fn call_network(
    addr: &PeerAddr,
    local: &PeerAddr,
) -> Option<(Vec<PeerAddr>, PeerAddr)> {
    async fn inner(addr: &PeerAddr, local: &PeerAddr) -> Result<(Vec<PeerAddr>, PeerAddr), WireError> {
        let mut stream = connect(addr).await?;
        wire::send_message(&mut stream, messages::NETWORK, local).await?;

        let (tag, value) = wire::recv_message(&mut stream).await?;
        let peer_list: Vec<PeerAddr> = if tag == messages::NODE_LIST {
            wire::decode_payload(value)?
        } else {
            Vec::new()
        };

        let (_, value) = wire::recv_message(&mut stream).await?;
        let confirmed: PeerAddr = wire::decode_payload(value)?;
        Ok((peer_list, confirmed))
    }

    match inner(addr, local).await {
        Ok(result) => Some(result),
        Err(err) => {
            log::warn!("network rpc to {}:{} failed: {}", addr.0, addr.1, err);
            None
        }
    }
}

/// Raw call returning the undecoded payload `Value`, for handlers that
/// need to branch on the response tag themselves (e.g. `indexed block`
/// vs. `index error`).
pub async fn call_raw<Req: Serialize>(
    addr: &PeerAddr,
    tag: &str,
    payload: &Req,
) -> Option<(String, Value)> {
    async fn inner<Req: Serialize>(
        addr: &PeerAddr,
        tag: &str,
        payload: &Req,
    ) -> Result<(String, Value), WireError> {
        let mut stream = connect(addr).await?;
        wire::send_message(&mut stream, tag, payload).await?;
        wire::recv_message(&mut stream).await
    }

    match inner(addr, tag, payload).await {
        Ok(result) => Some(result),
        Err(err) => {
            log::warn!("rpc {} to {}:{} failed: {}", tag, addr.0, addr.1, err);
            None
        }
    }
}
