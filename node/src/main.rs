use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use meridian_api::{HeadSubscriptionServer, RpcContext, RpcServer};
use meridian_consensus::crypto;
use meridian_consensus::InstantSeal;
use meridian_node::genesis::{dev_address, dev_keys};
use meridian_node::logging::{self, LogProfile};
use meridian_node::{BlockProducer, NodeConfig};
use meridian_sequencer::{
    coinbase_predicate, unix_now, Mempool, MempoolConfig, MultiPipeline, NodeBackend,
};
use meridian_storage::ChainStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "meridian")]
#[command(about = "Meridian MEV block-production node")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Start the mining pipelines at boot
    #[arg(long)]
    mine: bool,

    /// Coinbase address for produced blocks (hex)
    #[arg(long)]
    etherbase: Option<String>,

    /// RPC listen address (e.g., 127.0.0.1:8545)
    #[arg(long, value_name = "ADDR")]
    rpc_addr: Option<SocketAddr>,

    /// WebSocket listen address (e.g., 127.0.0.1:8546)
    #[arg(long, value_name = "ADDR")]
    ws_addr: Option<SocketAddr>,

    /// Chain ID
    #[arg(long, env = "MERIDIAN_CHAIN_ID")]
    chain_id: Option<u64>,

    /// Disable RPC server
    #[arg(long)]
    no_rpc: bool,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run devnet with default configuration
    Devnet,

    /// Generate a new keypair for signing
    Keygen,

    /// Print the prefunded development accounts
    DevAccounts,

    /// Write the default configuration to a file
    InitConfig {
        #[arg(default_value = "meridian.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let profile = match cli.command {
        Some(Commands::Devnet) => LogProfile::Devnet,
        _ => LogProfile::Node,
    };
    let log_config = logging::LogConfig::from_env(profile);
    if let Err(e) = logging::init_logging(&log_config) {
        eprintln!("Warning: Failed to initialize structured logging: {}", e);
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("info"))
            .init();
    }

    match cli.command {
        Some(Commands::Devnet) => return start_node(NodeConfig::devnet()).await,
        Some(Commands::Keygen) => {
            generate_keypair();
            return Ok(());
        }
        Some(Commands::DevAccounts) => {
            show_dev_accounts();
            return Ok(());
        }
        Some(Commands::InitConfig { path }) => {
            NodeConfig::default().save(&path)?;
            println!("Wrote default configuration to {}", path.display());
            return Ok(());
        }
        None => {}
    }

    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => NodeConfig::default(),
    };

    // CLI overrides
    if cli.mine {
        config.miner.enabled = true;
    }
    if let Some(etherbase) = cli.etherbase {
        config.miner.etherbase = etherbase;
    }
    if let Some(addr) = cli.rpc_addr {
        config.rpc.listen_addr = addr;
    }
    if let Some(addr) = cli.ws_addr {
        config.rpc.ws_addr = addr;
    }
    if let Some(chain_id) = cli.chain_id {
        config.chain.chain_id = chain_id;
    }
    if cli.no_rpc {
        config.rpc.enabled = false;
    }

    start_node(config).await
}

fn generate_keypair() {
    let signing_key = crypto::generate_keypair();
    let verifying_key = signing_key.verifying_key();

    println!("New keypair generated:");
    println!("Private key: {}", hex::encode(signing_key.to_bytes()));
    println!("Public key:  {}", hex::encode(verifying_key.to_bytes()));
    println!("Address:     {}", dev_address(&signing_key));
}

fn show_dev_accounts() {
    println!("Development accounts:");
    for (i, key) in dev_keys().iter().enumerate() {
        println!("  [{}] {}", i, dev_address(key));
        println!("      private key: {}", hex::encode(key.to_bytes()));
    }
}

async fn start_node(config: NodeConfig) -> Result<()> {
    config.validate()?;
    let chain_config = config.chain_config();
    let miner_config = config.miner.to_miner_config()?;

    info!("Starting Meridian node...");
    info!("Chain ID: {}", chain_config.chain_id);

    let genesis_timestamp = config.genesis.timestamp.unwrap_or_else(unix_now);
    let chain = Arc::new(ChainStore::new(
        chain_config.clone(),
        config.genesis.allocations()?,
        genesis_timestamp,
    ));
    let mempool = Arc::new(Mempool::new(MempoolConfig {
        chain_id: chain_config.chain_id,
        ..Default::default()
    }));

    let (candidates_tx, candidates_rx) = mpsc::unbounded_channel();
    let miner = Arc::new(MultiPipeline::new(
        &chain_config,
        &miner_config,
        Arc::new(InstantSeal),
        Arc::new(NodeBackend::new(chain.clone(), mempool.clone())),
        candidates_tx,
        coinbase_predicate(miner_config.etherbase),
    ));
    if miner_config.enabled {
        miner.start()?;
        info!("Mining to {}", miner_config.etherbase);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let producer = BlockProducer::new(
        chain.clone(),
        mempool.clone(),
        candidates_rx,
        config.producer.clone(),
    );
    let producer_handle = tokio::spawn(producer.run(shutdown_rx));

    let rpc = if config.rpc.enabled {
        let ctx = RpcContext {
            chain: chain.clone(),
            mempool: mempool.clone(),
            miner: miner.clone(),
        };
        let (close_handle, bound, join_handle) =
            RpcServer::new(config.rpc_config(), ctx).spawn()?;
        info!("RPC server started on http://{}", bound);

        let ws = Arc::new(HeadSubscriptionServer::new(config.rpc.ws_addr, chain.clone()));
        tokio::spawn(async move {
            if let Err(e) = ws.start().await {
                error!("WebSocket server stopped: {}", e);
            }
        });

        Some((close_handle, join_handle))
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    if let Err(e) = miner.close() {
        warn!("Miner did not close cleanly: {}", e);
    }
    let _ = shutdown_tx.send(true);
    if let Err(e) = producer_handle.await {
        warn!("Block producer task failed: {}", e);
    }

    if let Some((close_handle, join_handle)) = rpc {
        // Signal server to close and join its OS thread
        close_handle.close();
        tokio::task::spawn_blocking(move || {
            let _ = join_handle.join();
        })
        .await
        .ok();
    }

    Ok(())
}
