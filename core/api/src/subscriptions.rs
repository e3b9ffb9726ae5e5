// meridian/core/api/src/subscriptions.rs
//
// WebSocket `eth_subscribe("newHeads")` / `eth_unsubscribe`

use crate::types::response::HeadResponse;
use futures::{SinkExt, StreamExt};
use meridian_consensus::types::HeadNotification;
use meridian_storage::ChainStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Subscription request from client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    pub jsonrpc: String,
    pub id: Value,
    pub result: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: SubscriptionParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionParams {
    pub subscription: String,
    pub result: Value,
}

impl SubscriptionNotification {
    pub fn new_head(subscription: &str, head: &HeadNotification) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: "eth_subscription".to_string(),
            params: SubscriptionParams {
                subscription: subscription.to_string(),
                result: serde_json::to_value(HeadResponse::from(head)).unwrap_or_default(),
            },
        }
    }
}

fn error_response(id: Value, code: i64, message: String) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
    .to_string()
}

/// Per-connection subscription state
#[derive(Debug, Default)]
struct ConnectionState {
    subscriptions: HashSet<String>,
    next_id: u64,
}

impl ConnectionState {
    /// Returns the response to send back
    fn handle_message(&mut self, text: &str) -> String {
        let request: SubscriptionRequest = match serde_json::from_str(text) {
            Ok(r) => r,
            Err(e) => return error_response(Value::Null, -32700, format!("Parse error: {}", e)),
        };

        match request.method.as_str() {
            "eth_subscribe" => match request.params.first().and_then(Value::as_str) {
                Some("newHeads") => {
                    self.next_id += 1;
                    let sub_id = format!("0x{:x}", self.next_id);
                    self.subscriptions.insert(sub_id.clone());
                    debug!("Created newHeads subscription {}", sub_id);
                    respond(request.id, Value::String(sub_id))
                }
                Some(other) => error_response(
                    request.id,
                    -32602,
                    format!("Unsupported subscription type: {}", other),
                ),
                None => error_response(request.id, -32602, "Missing subscription type".into()),
            },
            "eth_unsubscribe" => {
                let removed = request
                    .params
                    .first()
                    .and_then(Value::as_str)
                    .map(|id| self.subscriptions.remove(id))
                    .unwrap_or(false);
                respond(request.id, Value::Bool(removed))
            }
            method => error_response(
                request.id,
                -32601,
                format!("Method not found: {}", method),
            ),
        }
    }
}

fn respond(id: Value, result: Value) -> String {
    serde_json::to_string(&SubscriptionResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result,
    })
    .unwrap_or_default()
}

/// WebSocket server pushing every new head to its subscribers
pub struct HeadSubscriptionServer {
    addr: SocketAddr,
    chain: Arc<ChainStore>,
}

impl HeadSubscriptionServer {
    pub fn new(addr: SocketAddr, chain: Arc<ChainStore>) -> Self {
        Self { addr, chain }
    }

    /// Accept connections until the listener fails
    pub async fn start(self: Arc<Self>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("newHeads WebSocket server listening on ws://{}", self.addr);
        self.serve(listener).await
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                    error!("WebSocket connection error from {}: {}", peer_addr, e);
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer_addr: SocketAddr) -> anyhow::Result<()> {
        debug!("New WebSocket connection from {}", peer_addr);

        let ws_stream = accept_async(stream).await?;
        let (mut write, mut read) = ws_stream.split();
        let mut state = ConnectionState::default();
        let mut heads = self.chain.subscribe_heads();

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let response = state.handle_message(&text);
                        write.send(Message::Text(response)).await?;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket connection {} closed", peer_addr);
                        break;
                    }
                    Some(Err(e)) => return Err(e.into()),
                    _ => {}
                },

                head = heads.recv() => match head {
                    Ok(head) => {
                        for sub_id in &state.subscriptions {
                            let notification = SubscriptionNotification::new_head(sub_id, &head);
                            write.send(Message::Text(serde_json::to_string(&notification)?)).await?;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket {} skipped {} heads", peer_addr, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        Ok(())
    }
}
