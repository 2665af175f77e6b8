//! Pure consensus-selection logic: given a snapshot of peer statuses,
//! decide which index/hash/time the network agrees on and who agrees
//! with it. Reconciliation (actually fetching missing blocks) lives in
//! the node runtime, which drives these functions over its own state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::block::PeerAddr;

/// A node's view of its own (or a peer's) chain tip. `index` is `-1` and
/// `hash` empty for a node that has not mined or accepted any block yet;
/// `time` is set to the max representable timestamp in that case so an
/// empty chain never wins a tie-break against a real one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStatus {
    #[serde(rename = "INDEX")]
    pub index: i64,
    #[serde(rename = "HASH")]
    pub hash: String,
    #[serde(rename = "TIME")]
    pub time: String,
}

/// Sentinel status for a chain with no blocks yet.
pub const EMPTY_CHAIN_TIME: &str = "9999-12-31T23:59:59.999999+00:00";

impl PeerStatus {
    pub fn empty_chain() -> Self {
        PeerStatus {
            index: -1,
            hash: String::new(),
            time: EMPTY_CHAIN_TIME.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusTriple {
    pub index: i64,
    pub hash: String,
    pub time: String,
}

/// Computes the consensus triple over a peer status map: the maximum
/// index across all entries, then the most frequent `(hash, time)` pair
/// among entries at that index, ties broken by smallest (earliest) time.
///
/// Returns `None` only if the map is empty.
pub fn gather_consensus(statuses: &HashMap<PeerAddr, PeerStatus>) -> Option<ConsensusTriple> {
    let consensus_index = statuses.values().map(|s| s.index).max()?;

    let mut counts: HashMap<(&str, &str), usize> = HashMap::new();
    for status in statuses.values().filter(|s| s.index == consensus_index) {
        *counts.entry((status.hash.as_str(), status.time.as_str())).or_insert(0) += 1;
    }

    let ((hash, time), _) = counts
        .into_iter()
        .max_by(|a, b| {
            a.1.cmp(&b.1)
                .then_with(|| b.0.1.cmp(a.0.1)) // smaller time wins ties
        })
        .expect("at least one status exists at consensus_index");

    Some(ConsensusTriple {
        index: consensus_index,
        hash: hash.to_string(),
        time: time.to_string(),
    })
}

/// The subset of peers (including the local node, if present in the map)
/// whose status exactly matches the consensus triple.
pub fn consensus_nodes(
    statuses: &HashMap<PeerAddr, PeerStatus>,
    triple: &ConsensusTriple,
) -> Vec<PeerAddr> {
    statuses
        .iter()
        .filter(|(_, status)| {
            status.index == triple.index && status.hash == triple.hash && status.time == triple.time
        })
        .map(|(addr, _)| addr.clone())
        .collect()
}

/// Longest common prefix index between two hashlists: the largest `i`
/// such that `local[0..=i] == peer[0..=i]`, or `-1` if even index 0
/// differs or either list is empty. Stops at the first mismatch, unlike
/// a naive scan that keeps counting matches past one.
pub fn hashmatch(local: &[String], peer: &[String]) -> i64 {
    let limit = local.len().min(peer.len());
    let mut match_index: i64 = -1;

    for i in 0..limit {
        if local[i] == peer[i] {
            match_index = i as i64;
        } else {
            break;
        }
    }

    match_index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(index: i64, hash: &str, time: &str) -> PeerStatus {
        PeerStatus {
            index,
            hash: hash.to_string(),
            time: time.to_string(),
        }
    }

    #[test]
    fn consensus_is_pure_and_deterministic() {
        let mut map = HashMap::new();
        map.insert(("a".to_string(), 1u16), status(1, "h1", "t1"));
        map.insert(("b".to_string(), 2u16), status(1, "h1", "t1"));
        map.insert(("c".to_string(), 3u16), status(1, "h2", "t2"));

        let triple1 = gather_consensus(&map).unwrap();
        let triple2 = gather_consensus(&map).unwrap();
        assert_eq!(triple1, triple2);
        assert_eq!(triple1.hash, "h1");
    }

    #[test]
    fn ties_broken_by_earliest_time() {
        let mut map = HashMap::new();
        map.insert(("a".to_string(), 1u16), status(1, "h1", "2024-01-01T00:00:02+00:00"));
        map.insert(("b".to_string(), 2u16), status(1, "h2", "2024-01-01T00:00:01+00:00"));

        let triple = gather_consensus(&map).unwrap();
        assert_eq!(triple.hash, "h2");
    }

    #[test]
    fn consensus_nodes_matches_exact_triple() {
        let mut map = HashMap::new();
        map.insert(("a".to_string(), 1u16), status(1, "h1", "t1"));
        map.insert(("b".to_string(), 2u16), status(0, "h0", "t0"));
        let triple = ConsensusTriple {
            index: 1,
            hash: "h1".to_string(),
            time: "t1".to_string(),
        };
        let nodes = consensus_nodes(&map, &triple);
        assert_eq!(nodes, vec![("a".to_string(), 1u16)]);
    }

    #[test]
    fn hashmatch_breaks_on_first_mismatch() {
        let local = vec!["a".into(), "b".into(), "x".into(), "c".into()];
        let peer = vec!["a".into(), "b".into(), "y".into(), "c".into()];
        assert_eq!(hashmatch(&local, &peer), 1);
    }

    #[test]
    fn hashmatch_no_overlap_returns_negative_one() {
        let local = vec!["a".into()];
        let peer = vec!["z".into()];
        assert_eq!(hashmatch(&local, &peer), -1);
    }

    #[test]
    fn hashmatch_full_match() {
        let local = vec!["a".into(), "b".into()];
        let peer = vec!["a".into(), "b".into()];
        assert_eq!(hashmatch(&local, &peer), 1);
    }
}
