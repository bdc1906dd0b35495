use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Text(String),
    Error(String),
}

/// An open bidirectional channel. Dropping `outbound` closes the channel;
/// `inbound` ends when the remote side closes.
pub struct ChannelLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn open(&self, url: &str) -> Result<ChannelLink>;
}

pub struct WebSocketConnector;

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn open(&self, url: &str) -> Result<ChannelLink> {
        let parsed = Url::parse(url).with_context(|| format!("invalid channel url: {url}"))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(anyhow!("channel url must start with ws:// or wss://: {url}"));
        }

        let (ws_stream, _) = connect_async(parsed.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {url}"))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel::<LinkEvent>();

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(err) = ws_writer.send(Message::Text(text)).await {
                    debug!(%err, "transport: websocket send failed");
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let event = match msg {
                    Ok(Message::Text(text)) => LinkEvent::Text(text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => LinkEvent::Text(text),
                        Err(_) => LinkEvent::Error("received non-utf8 binary frame".into()),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        let _ = inbound_tx.send(LinkEvent::Error(format!(
                            "websocket receive failed: {err}"
                        )));
                        break;
                    }
                };
                if inbound_tx.send(event).is_err() {
                    break;
                }
            }
        });

        Ok(ChannelLink { outbound, inbound })
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
