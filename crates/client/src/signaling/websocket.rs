//! WebSocket relay link

use super::connection::{SignalingConnector, SignalingLink};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Opens relay links over WebSocket, one JSON envelope per text frame
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Sender task: forwards queued frames to the socket, closes it when the queue ends
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<String>,
    ) {
        while let Some(text) = rx.recv().await {
            if let Err(e) = write.send(Message::Text(text)).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }

        if let Err(e) = write.close().await {
            debug!("WebSocket close handshake failed: {}", e);
        }
        debug!("Sender task terminated");
    }

    /// Receiver task: forwards text frames until the socket closes
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        tx: mpsc::UnboundedSender<String>,
    ) {
        while let Some(msg_result) = read.next().await {
            let text = match msg_result {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!("Ignoring non-UTF-8 binary frame from relay");
                        continue;
                    }
                },
                Ok(Message::Close(frame)) => {
                    info!("WebSocket connection closed by relay: {:?}", frame);
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
            };

            if tx.send(text).is_err() {
                break;
            }
        }

        debug!("Receiver task terminated");
    }
}

#[async_trait]
impl SignalingConnector for WebSocketConnector {
    async fn open(&self, url: &str) -> Result<SignalingLink> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        info!("Connected to signaling relay: {}", url);

        let (write, read) = ws_stream.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::sender_task(write, out_rx));
        tokio::spawn(Self::receiver_task(read, in_tx));

        Ok(SignalingLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_relay_is_websocket_error() {
        // Port 9 (discard) on localhost is closed in test environments
        let err = WebSocketConnector
            .open("ws://127.0.0.1:9/ws/rtc/")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WebSocketError(_)));
        assert!(err.is_transport_error());
    }
}
