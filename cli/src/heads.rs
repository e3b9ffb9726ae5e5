// meridian/cli/src/heads.rs

use crate::client::parse_head;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use meridian_consensus::types::HeadNotification;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Source of new chain heads
#[async_trait]
pub trait HeadStream: Send {
    /// `None` once the source is exhausted
    async fn next_head(&mut self) -> Result<Option<HeadNotification>>;
}

/// `eth_subscribe("newHeads")` over a WebSocket
pub struct WsHeads {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    subscription: String,
}

impl WsHeads {
    pub async fn connect(url: &str) -> Result<Self> {
        let (mut stream, _) = connect_async(url)
            .await
            .with_context(|| format!("Failed to connect to {}", url))?;

        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_subscribe",
            "params": ["newHeads"]
        });
        stream.send(Message::Text(request.to_string())).await?;

        while let Some(msg) = stream.next().await {
            if let Message::Text(text) = msg? {
                let response: Value = serde_json::from_str(&text)?;
                if let Some(error) = response.get("error") {
                    bail!("eth_subscribe failed: {}", error["message"]);
                }
                let subscription = response["result"]
                    .as_str()
                    .ok_or_else(|| anyhow!("Unexpected subscription response: {}", text))?
                    .to_string();
                debug!("Subscribed to newHeads as {}", subscription);
                return Ok(Self {
                    stream,
                    subscription,
                });
            }
        }
        bail!("Connection closed before the subscription was confirmed")
    }
}

#[async_trait]
impl HeadStream for WsHeads {
    async fn next_head(&mut self) -> Result<Option<HeadNotification>> {
        while let Some(msg) = self.stream.next().await {
            match msg? {
                Message::Text(text) => {
                    let notification: Value = serde_json::from_str(&text)?;
                    let params = &notification["params"];
                    if params["subscription"].as_str() == Some(self.subscription.as_str()) {
                        return parse_head(&params["result"]).map(Some);
                    }
                }
                Message::Ping(data) => self.stream.send(Message::Pong(data)).await?,
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }
}
