//! Node configuration. The teacher's `Config` is `serde`-derived and
//! file-backed (`~/.Astram/config.json`); this one keeps the same
//! serde-derived shape but is assembled straight from `clap` arguments,
//! since this node's persistence is out of scope.

use std::net::Ipv4Addr;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::DEFAULT_PORT;

#[derive(Parser, Debug)]
#[command(name = "tinychain-node", about = "A small proof-of-work chain node")]
pub struct Cli {
    /// Address to bind the event listener to.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: Ipv4Addr,

    /// Port to bind the event listener to. Bumped automatically if taken.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Start the event listener immediately.
    #[arg(long)]
    pub listen: bool,

    /// Start mining immediately (implies --listen).
    #[arg(long)]
    pub mine: bool,

    /// Seed peer to bootstrap from, as host:port.
    #[arg(long)]
    pub connect: Option<String>,

    /// `log` level passed to `env_logger` (error/warn/info/debug/trace).
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print this node's current chain, one line per block.
    Chain,
    /// Print the most recently accepted block in full.
    LastBlock,
    /// Print free/firm pool sizes.
    Pools,
    /// Print every known address and its balance.
    Ledger,
    /// Print a one-line summary of node state.
    Status,
    /// Submit `count` signed test transaction(s) from this node's own wallet.
    SendTestTransaction {
        receiver: String,
        amount: u64,
        #[arg(default_value_t = 1)]
        count: usize,
    },
}

/// The node's resolved startup configuration. Serde-derived like the
/// teacher's `Config`, so it can be logged or inspected as plain data even
/// though nothing here round-trips through a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub host: Ipv4Addr,
    pub port: u16,
    pub listen: bool,
    pub mine: bool,
    pub connect: Option<(String, u16)>,
    pub log_level: String,
}

impl NodeConfig {
    /// Resolves a `Cli` parse into a `NodeConfig`, parsing `--connect`'s
    /// `host:port` spec up front so a malformed peer address is rejected
    /// before anything starts listening.
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let connect = cli.connect.as_deref().map(parse_peer).transpose()?;
        Ok(NodeConfig {
            host: cli.host,
            port: cli.port,
            listen: cli.listen || cli.mine || connect.is_some(),
            mine: cli.mine,
            connect,
            log_level: cli.log_level.clone(),
        })
    }

    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

fn parse_peer(spec: &str) -> anyhow::Result<(String, u16)> {
    let (host, port) = spec
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("peer must be host:port, got {spec}"))?;
    Ok((host.to_string(), port.parse()?))
}
