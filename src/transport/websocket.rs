// src/transport/websocket.rs
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Mutex as StdMutex, PoisonError};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing;

use super::{DisconnectReason, Transport, TransportEvent, TransportEventSender};
use crate::errors::{SyncError, SyncResult};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// `{"event": "...", "data": {...}}` text frame.
#[derive(Debug, Serialize, Deserialize)]
struct WireFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// WebSocket transport carrying JSON event frames.
pub struct WsTransport {
    url: String,
    sink: Mutex<Option<WsSink>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sink: Mutex::new(None),
            reader: StdMutex::new(None),
        }
    }

    fn stop_reader(&self) {
        let reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(reader) = reader {
            reader.abort();
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, token: &str, events: TransportEventSender) -> SyncResult<()> {
        // A reconnect replaces whatever was left of the previous socket
        self.close().await;

        let mut request = self.url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| SyncError::MissingCredential(format!("unusable bearer token: {}", e)))?;
        request.headers_mut().insert("Authorization", bearer);

        tracing::debug!("Opening WebSocket to {}", self.url);
        let (socket, _response) = connect_async(request).await?;
        let (sink, mut stream) = socket.split();
        *self.sink.lock().await = Some(sink);

        if events.send(TransportEvent::Connected).is_err() {
            return Err(SyncError::ChannelClosed);
        }

        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let event = match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<WireFrame>(&text) {
                        Ok(frame) => TransportEvent::Frame { event: frame.event, data: frame.data },
                        Err(e) => {
                            tracing::warn!("Ignoring unreadable frame: {}", e);
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::info!("Server closed the channel: {:?}", frame);
                        let _ = events.send(TransportEvent::Disconnected(DisconnectReason::ServerInitiated));
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            let _ = events.send(TransportEvent::Disconnected(DisconnectReason::TransportClosed));
        });
        *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(reader);

        Ok(())
    }

    async fn emit(&self, event: &str, data: Value) -> SyncResult<()> {
        let text = serde_json::to_string(&WireFrame { event: event.to_string(), data })?;
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(SyncError::NotConnected)?;
        sink.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&self) {
        self.stop_reader();
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                tracing::debug!("Error while closing WebSocket: {}", e);
            }
        }
    }
}
