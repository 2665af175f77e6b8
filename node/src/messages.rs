//! Wire message tags. Each is the single key of a framed JSON object; see
//! the dispatcher for the payload shape each one carries.

pub const NODE: &str = "node";
pub const NETWORK: &str = "network";
pub const DISCONNECT: &str = "disconnect";
pub const TRANSACTION: &str = "transaction";
pub const GET_TRANSACTIONS: &str = "get transactions";
pub const NEW_BLOCK: &str = "new block";
pub const INDEXED_BLOCK: &str = "indexed block";
pub const STATUS: &str = "status";
pub const HASHMATCH: &str = "hashmatch";
pub const CONFIRM: &str = "confirm";
pub const NODE_LIST: &str = "node list";
pub const INDEX_ERROR: &str = "index error";
pub const MATCH_INDEX: &str = "match index";
