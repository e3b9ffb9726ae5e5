// meridian/core/api/src/rpc.rs

use crate::types::request::{
    decode_transaction, encode_hash, encode_quantity, parse_address, parse_hash, parse_u64,
    BlockTag,
};
use crate::types::response::{
    BlockResponse, MinerStatusResponse, PaymentResponse, PipelineStatus, ReceiptResponse,
};
use crate::types::{ApiError, MegaBundleRequest};
use futures::executor::block_on;
use jsonrpc_core::{IoHandler, Params, Value};
use meridian_sequencer::{Mempool, MultiPipeline};
use meridian_storage::ChainStore;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything the RPC methods read from or submit to
#[derive(Clone)]
pub struct RpcContext {
    pub chain: Arc<ChainStore>,
    pub mempool: Arc<Mempool>,
    pub miner: Arc<MultiPipeline>,
}

fn positional(params: Params) -> Result<Vec<Value>, jsonrpc_core::Error> {
    match params {
        Params::None => Ok(vec![]),
        other => other.parse(),
    }
}

fn string_param<'a>(params: &'a [Value], index: usize, name: &str) -> Result<&'a str, ApiError> {
    params
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::invalid(format!("Missing {}", name)))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, jsonrpc_core::Error> {
    serde_json::to_value(value).map_err(|_| jsonrpc_core::Error::internal_error())
}

/// Register the `eth_*` and `meridian_*` methods on `io_handler`
pub fn register_methods(io_handler: &mut IoHandler, ctx: RpcContext) {
    let chain_id = ctx.chain.config().chain_id;

    // eth_chainId
    io_handler.add_sync_method("eth_chainId", move |_params: Params| {
        Ok(Value::String(encode_quantity(chain_id as u128)))
    });

    // eth_blockNumber
    let chain = ctx.chain.clone();
    io_handler.add_sync_method("eth_blockNumber", move |_params: Params| {
        Ok(Value::String(encode_quantity(chain.height() as u128)))
    });

    // eth_getBlockByNumber - [number | tag, includeTransactions]
    let chain = ctx.chain.clone();
    io_handler.add_sync_method("eth_getBlockByNumber", move |params: Params| {
        let params = positional(params)?;
        let number = match BlockTag::parse(params.first())? {
            BlockTag::Earliest => 0,
            BlockTag::Latest | BlockTag::Pending => chain.height(),
            BlockTag::Number(n) => n,
        };
        let full = params.get(1).and_then(Value::as_bool).unwrap_or(false);

        match chain.block_by_number(number) {
            Some(block) => to_value(BlockResponse::new(&block, full)),
            None => Ok(Value::Null),
        }
    });

    // eth_getBlockByHash - [hash, includeTransactions]
    let chain = ctx.chain.clone();
    io_handler.add_sync_method("eth_getBlockByHash", move |params: Params| {
        let params = positional(params)?;
        let hash = parse_hash(string_param(&params, 0, "block hash")?)?;
        let full = params.get(1).and_then(Value::as_bool).unwrap_or(false);

        match chain.block_by_hash(&hash) {
            Some(block) => to_value(BlockResponse::new(&block, full)),
            None => Ok(Value::Null),
        }
    });

    // eth_getBalance - [address, tag]
    let chain = ctx.chain.clone();
    io_handler.add_sync_method("eth_getBalance", move |params: Params| {
        let params = positional(params)?;
        let address = parse_address(string_param(&params, 0, "address")?)?;
        let balance = chain.latest_state().balance(&address);
        Ok(Value::String(encode_quantity(balance)))
    });

    // eth_getTransactionCount - [address, tag]; "pending" counts the mempool
    let chain = ctx.chain.clone();
    let mempool = ctx.mempool.clone();
    io_handler.add_sync_method("eth_getTransactionCount", move |params: Params| {
        let params = positional(params)?;
        let address = parse_address(string_param(&params, 0, "address")?)?;
        let mut nonce = chain.latest_state().nonce(&address);
        if BlockTag::parse(params.get(1))? == BlockTag::Pending {
            if let Some(next) = block_on(mempool.next_nonce(&address)) {
                nonce = nonce.max(next);
            }
        }
        Ok(Value::String(encode_quantity(nonce as u128)))
    });

    // eth_sendRawTransaction - [hex(bincode(tx))]
    let mempool = ctx.mempool.clone();
    io_handler.add_sync_method("eth_sendRawTransaction", move |params: Params| {
        let params = positional(params)?;
        let raw = string_param(&params, 0, "raw transaction")?;
        let tx = decode_transaction(raw).map_err(ApiError::InvalidParams)?;
        let hash = tx.hash;

        block_on(mempool.add_transaction(tx)).map_err(ApiError::from)?;
        debug!("Accepted raw transaction {}", hash);
        Ok(Value::String(encode_hash(&hash)))
    });

    // eth_getTransactionReceipt - [hash]
    let chain = ctx.chain.clone();
    io_handler.add_sync_method("eth_getTransactionReceipt", move |params: Params| {
        let params = positional(params)?;
        let hash = parse_hash(string_param(&params, 0, "transaction hash")?)?;

        let Some((number, index)) = chain.transaction_location(&hash) else {
            return Ok(Value::Null);
        };
        let receipt = chain.block_by_number(number).and_then(|block| {
            let receipts = chain.receipts(&block.hash())?;
            receipts
                .get(index)
                .map(|r| ReceiptResponse::new(r, &block, index))
        });
        match receipt {
            Some(receipt) => to_value(receipt),
            None => Ok(Value::Null),
        }
    });

    // eth_sendMegaBundle - [{transactionList, timestamp, coinbaseDiff, parentHash}]
    let miner = ctx.miner.clone();
    io_handler.add_sync_method("eth_sendMegaBundle", move |params: Params| {
        let (request,): (MegaBundleRequest,) = params.parse()?;
        let bundle = request.into_bundle()?;

        let receipt = block_on(miner.submit_bundle(bundle)).map_err(ApiError::from)?;
        info!(
            "eth_sendMegaBundle accepted {} for {} pipelines",
            receipt.bundle_hash, receipt.subscribers
        );
        Ok(Value::String(encode_hash(&receipt.bundle_hash)))
    });

    // meridian_getPayments - [number]
    let chain = ctx.chain.clone();
    io_handler.add_sync_method("meridian_getPayments", move |params: Params| {
        let params = positional(params)?;
        let number = match params.first() {
            Some(v) => parse_u64(v)?,
            None => return Err(ApiError::invalid("Missing block number").into()),
        };
        match chain.payments(number) {
            Some(events) => to_value(
                events
                    .iter()
                    .map(PaymentResponse::from)
                    .collect::<Vec<_>>(),
            ),
            None => Ok(Value::Null),
        }
    });

    // meridian_minerStatus
    let miner = ctx.miner;
    io_handler.add_sync_method("meridian_minerStatus", move |_params: Params| {
        let stats = miner.stats();
        let alive = miner.workers_alive();
        let pipelines = miner
            .pipeline_settings()
            .into_iter()
            .map(|(policy, settings)| {
                let snapshot = stats
                    .iter()
                    .find(|(p, _)| *p == policy)
                    .map(|(_, s)| *s)
                    .unwrap_or_default();
                let worker_alive = alive.iter().any(|(p, up)| *p == policy && *up);
                PipelineStatus::new(policy, &settings, worker_alive, snapshot)
            })
            .collect();

        to_value(MinerStatusResponse {
            running: miner.is_running(),
            closed: miner.is_closed(),
            pipelines,
        })
    });

    // web3_clientVersion
    io_handler.add_sync_method("web3_clientVersion", |_params: Params| {
        Ok(json!(format!("meridian/v{}", env!("CARGO_PKG_VERSION"))))
    });
}
