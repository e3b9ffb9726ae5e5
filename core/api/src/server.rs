// meridian/core/api/src/server.rs

use crate::rpc::{register_methods, RpcContext};
use anyhow::Result;
use jsonrpc_core::IoHandler;
use jsonrpc_http_server::{AccessControlAllowOrigin, CloseHandle, DomainsValidation, ServerBuilder};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::info;

/// RPC Server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RpcConfig {
    pub listen_addr: SocketAddr,
    pub ws_addr: SocketAddr,
    pub cors_domains: Vec<String>,
    pub threads: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8545)),
            ws_addr: SocketAddr::from(([127, 0, 0, 1], 8546)),
            cors_domains: vec!["*".to_string()],
            threads: 4,
        }
    }
}

/// JSON-RPC over HTTP
pub struct RpcServer {
    config: RpcConfig,
    io_handler: IoHandler,
}

impl RpcServer {
    pub fn new(config: RpcConfig, ctx: RpcContext) -> Self {
        let mut io_handler = IoHandler::new();
        register_methods(&mut io_handler, ctx);
        Self { config, io_handler }
    }

    /// Spawn the RPC server on a dedicated OS thread and return a CloseHandle and JoinHandle.
    /// If startup fails (e.g., port already in use), returns an error instead of panicking.
    pub fn spawn(self) -> Result<(CloseHandle, SocketAddr, std::thread::JoinHandle<()>)> {
        let listen_addr = self.config.listen_addr;
        let threads = self.config.threads;
        let cors_any = !self.config.cors_domains.is_empty();
        let io = self.io_handler;

        // Channel to report startup result
        let (result_tx, result_rx) =
            std::sync::mpsc::sync_channel::<Result<(CloseHandle, SocketAddr), String>>(1);

        let join_handle = std::thread::spawn(move || {
            let mut builder = ServerBuilder::new(io);
            if cors_any {
                builder = builder.cors(DomainsValidation::AllowOnly(vec![
                    AccessControlAllowOrigin::Any,
                ]));
            }
            match builder
                .max_request_body_size(10 * 1024 * 1024)
                .threads(threads)
                .start_http(&listen_addr)
            {
                Ok(server) => {
                    let bound = *server.address();
                    info!("RPC server listening on {}", bound);
                    let _ = result_tx.send(Ok((server.close_handle(), bound)));
                    // Block until closed
                    server.wait();
                }
                Err(e) => {
                    let _ = result_tx.send(Err(format!(
                        "Failed to start RPC server on {}: {}",
                        listen_addr, e
                    )));
                }
            }
        });

        match result_rx.recv() {
            Ok(Ok((close, bound))) => Ok((close, bound, join_handle)),
            Ok(Err(msg)) => {
                let _ = join_handle.join();
                Err(anyhow::anyhow!(msg))
            }
            Err(e) => {
                let _ = join_handle.join();
                Err(anyhow::anyhow!("RPC thread failed: {}", e))
            }
        }
    }
}
