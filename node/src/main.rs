use clap::Parser;
use tinychain_core::Wallet;
use tinychain_node::config::{Cli, Command, NodeConfig};
use tinychain_node::{NodeHandles, runtime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = NodeConfig::from_cli(&cli)?;

    env_logger::Builder::from_default_env()
        .filter_level(config.log_level_filter())
        .init();

    let wallet = Wallet::generate();
    log::info!("node wallet address: {}", wallet.address());

    let handle = NodeHandles::new(wallet, config.host, config.port);

    if config.listen {
        runtime::start_event_listener(handle.clone()).await;
    }

    if let Some(seed) = config.connect {
        runtime::connect_to_network(&handle, seed).await;
    }

    if config.mine {
        runtime::start_miner(handle.clone()).await;
    }

    match cli.command {
        Some(Command::Chain) => println!("{}", runtime::render_chain(&handle)),
        Some(Command::LastBlock) => println!("{}", runtime::render_last_block(&handle)),
        Some(Command::Pools) => println!("{}", runtime::render_pools(&handle)),
        Some(Command::Ledger) => println!("{}", runtime::render_ledger(&handle)),
        Some(Command::Status) => println!("{}", runtime::render_data(&handle)),
        Some(Command::SendTestTransaction { receiver, amount, count }) => {
            runtime::generate_test_transactions(&handle, receiver, amount, count).await;
            println!("submitted {count} test transaction(s)");
        }
        None => {}
    }

    if config.listen {
        log::info!("running; press ctrl-c to stop");
        tokio::signal::ctrl_c().await?;
        log::info!(
            "shutting down ({} background task(s) active)",
            runtime::active_task_count(&handle)
        );
        runtime::stop_event_listener(&handle).await;
    }

    Ok(())
}
