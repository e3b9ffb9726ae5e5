// meridian/cli/src/main.rs

mod checks;
mod client;
mod heads;

use anyhow::{anyhow, Result};
use checks::{AnchorMode, CheckConfig, MevCheck, Outcome};
use clap::{Parser, Subcommand};
use client::{ChainClient, RpcClient};
use colored::Colorize;
use heads::WsHeads;
use meridian_consensus::crypto::keypair_from_hex;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mev-checks")]
#[command(about = "End-to-end bundle checks against a Meridian node")]
struct Cli {
    /// HTTP JSON-RPC endpoint
    #[arg(long, env = "MERIDIAN_RPC", default_value = "http://127.0.0.1:8545")]
    rpc: String,

    /// WebSocket endpoint for newHeads
    #[arg(long, env = "MERIDIAN_WS", default_value = "ws://127.0.0.1:8546")]
    ws: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy the payment contract and drive a bundle into a block
    Run {
        /// Funded private key (hex)
        #[arg(long, env = "MEV_CHECKS_KEY")]
        key: String,

        /// Parent the bundle is built on
        #[arg(long, value_enum, default_value = "head")]
        anchor: AnchorMode,

        /// Minimum coinbase payment in wei
        #[arg(long, default_value = "100000000000000000")]
        coinbase_diff: u128,

        /// Bundle deadline in seconds from submission
        #[arg(long, default_value = "45")]
        deadline_secs: u64,

        /// Seconds past the deadline to keep watching
        #[arg(long, default_value = "15")]
        observe_secs: u64,

        /// Submissions before giving up
        #[arg(long, default_value = "3")]
        attempts: usize,
    },

    /// Show the pipelines and their counters
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let client = RpcClient::new(&cli.rpc);

    match cli.command {
        Commands::Run {
            key,
            anchor,
            coinbase_diff,
            deadline_secs,
            observe_secs,
            attempts,
        } => {
            let key = keypair_from_hex(&key).ok_or_else(|| anyhow!("Invalid private key"))?;
            let config = CheckConfig {
                anchor,
                coinbase_diff,
                deadline: Duration::from_secs(deadline_secs),
                observation: Duration::from_secs(observe_secs),
                max_attempts: attempts,
                ..Default::default()
            };
            let mut heads = WsHeads::connect(&cli.ws).await?;
            let check = MevCheck::new(&client, &mut heads, key, config);
            println!("Sender: {}", check.sender().to_hex().cyan());

            match check.run().await? {
                Outcome::Confirmed {
                    block,
                    tx,
                    paid,
                    attempts,
                } => {
                    println!("{}", "✓ Bundle confirmed".green());
                    println!("Block:    {}", block);
                    println!("Tx:       0x{}", tx.to_hex());
                    println!("Paid:     {} wei", paid);
                    println!("Attempts: {}", attempts);
                }
                Outcome::Lost { attempts } => {
                    println!(
                        "{}",
                        format!("✗ Bundle not included after {} attempts", attempts).red()
                    );
                    std::process::exit(1);
                }
            }
        }
        Commands::Status => show_status(&client).await?,
    }

    Ok(())
}

async fn show_status(client: &RpcClient) -> Result<()> {
    let chain_id = client.chain_id().await?;
    let head = client.latest_head().await?;
    println!("Chain {} at block {} ({})", chain_id, head.number, head.hash);

    let status = client.miner_status().await?;

    println!(
        "Miner: {}{}",
        if status["running"] == true {
            "running".green()
        } else {
            "stopped".yellow()
        },
        if status["closed"] == true { " (closed)" } else { "" }
    );
    for pipeline in status["pipelines"].as_array().into_iter().flatten() {
        let stats = &pipeline["stats"];
        println!(
            "  • {:<17} bundles={} stale={} expired={} sealed={}{}",
            pipeline["policy"].as_str().unwrap_or("?").bold(),
            stats["bundles_received"],
            stats["bundles_stale"],
            stats["bundles_expired"],
            stats["candidates_sealed"],
            if pipeline["workerAlive"] == false {
                format!(" {}", "worker gone".red())
            } else {
                String::new()
            }
        );
    }
    Ok(())
}
