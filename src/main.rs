use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use tinychain::miner;
use tinychain::prelude::*;

// -----------------------------
// CLI
// -----------------------------

#[derive(Parser, Debug)]
#[clap(name = "tinychain", version, about = "Proof-of-work miner and peer transport")]
struct Cli {
    /// Configuration file, overridden by TC_* environment variables.
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mine a coinbase-only block on top of `prev`.
    Mine {
        #[clap(long, default_value_t = 16)]
        bits: u32,

        /// Parent block id, empty for genesis.
        #[clap(long, default_value = "")]
        prev: String,

        /// Address credited by the coinbase.
        #[clap(long, default_value = "genesis")]
        address: String,

        /// Send the mined block to the configured peers.
        #[clap(long)]
        announce: bool,
    },

    /// Check whether a peer accepts connections.
    Probe {
        peer: Peer,
    },

    /// Print every record received from peers.
    Listen,
}

fn init_logging(level: &str) {
    let level = level.parse::<tracing::Level>().unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_max_level(level)
        .init();
}

// -----------------------------
// Commands
// -----------------------------

async fn mine_block(config: &NodeConfig, bits: u32, prev: String, address: String, announce: bool) -> Result<()> {
    let coinbase = Transaction::coinbase(address, 50, 0);
    let candidate = Block::new(prev, vec![coinbase], Utc::now().timestamp(), bits)?;

    let block = match miner::mine_in_background(candidate, CancelSignal::new()).await? {
        MineOutcome::Found(block) => block,
        MineOutcome::Interrupted => {
            warn!("mining interrupted");

            return Ok(());
        }
    };

    println!("Mined block {} (bits={}, nonce={})", block.id(), block.bits, block.nonce);

    if announce {
        let peers = config.peers()?;
        let transport = Transport::new(config.transport.clone());

        for (peer, outcome) in transport.announce_block(&block, config.listen_addr.port(), &peers).await? {
            match outcome {
                SendOutcome::Failed(failure) => warn!("{failure}"),
                outcome => info!(%peer, ?outcome, "announced block"),
            }
        }
    }

    Ok(())
}

async fn probe(config: &NodeConfig, peer: Peer) -> Result<()> {
    let reachable = Transport::new(config.transport.clone())
        .is_reachable(&peer)
        .await;

    println!("{peer} is {}", if reachable { "reachable" } else { "unreachable" });

    Ok(())
}

async fn listen(config: &NodeConfig) -> Result<()> {
    let listener = Listener::new(
        Transport::new(config.transport.clone()),
        Arc::new(standard_registry()),
    );

    let mut handle = listener.start(config.listen_addr).await
        .with_context(|| format!("failed to listen on {}", config.listen_addr))?;

    while let Some(inbound) = handle.inbound_rx.recv().await {
        println!("{} from {}: {:?}", inbound.record.type_name(), inbound.from, inbound.record);
    }

    Ok(())
}

// -----------------------------
// Application
// -----------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = NodeConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;

    init_logging(&config.log_level);

    match cli.command {
        Command::Mine { bits, prev, address, announce } => mine_block(&config, bits, prev, address, announce).await,
        Command::Probe { peer } => probe(&config, peer).await,
        Command::Listen => listen(&config).await,
    }
}
