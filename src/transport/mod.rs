// src/transport/mod.rs
//! Bidirectional event channel to the ride server.
//!
//! Transports report their lifecycle and inbound frames on the sender handed
//! to [`Transport::connect`]; delivery is at-least-once and may be reordered.
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::errors::SyncResult;

pub mod websocket;

pub use websocket::WsTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed the channel on purpose.
    ServerInitiated,
    /// We closed it ourselves.
    ClientInitiated,
    /// The underlying connection dropped.
    TransportClosed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected(DisconnectReason),
    Error(String),
    Frame { event: String, data: Value },
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the channel with a bearer credential. On success the transport
    /// reports `Connected` on `events`, followed by frames and lifecycle changes.
    async fn connect(&self, token: &str, events: TransportEventSender) -> SyncResult<()>;

    async fn emit(&self, event: &str, data: Value) -> SyncResult<()>;

    async fn close(&self);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::errors::SyncError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Transport double that records every call.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub connects: AtomicUsize,
        pub closes: AtomicUsize,
        pub fail_connect: AtomicBool,
        pub fail_emit: AtomicBool,
        pub connect_delay: Mutex<Option<Duration>>,
        pub emitted: Mutex<Vec<(String, Value)>>,
        pub sender: Mutex<Option<TransportEventSender>>,
    }

    impl RecordingTransport {
        pub fn failing() -> Self {
            let transport = Self::default();
            transport.fail_connect.store(true, Ordering::SeqCst);
            transport
        }

        pub fn connect_count(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        pub fn emit_count(&self) -> usize {
            self.emitted.lock().unwrap().len()
        }

        pub fn emitted_names(&self) -> Vec<String> {
            self.emitted.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
        }

        /// True while a connect has succeeded and no close followed it.
        pub fn is_open(&self) -> bool {
            self.sender.lock().unwrap().is_some()
        }

        pub fn last_emitted(&self) -> Option<(String, Value)> {
            self.emitted.lock().unwrap().last().cloned()
        }

        /// Push an event as if it came from the server.
        pub fn inject(&self, event: TransportEvent) {
            if let Some(tx) = self.sender.lock().unwrap().as_ref() {
                let _ = tx.send(event);
            }
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn connect(&self, _token: &str, events: TransportEventSender) -> SyncResult<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(SyncError::WebSocketConnection("connection refused".to_string()));
            }
            let delay = *self.connect_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let _ = events.send(TransportEvent::Connected);
            *self.sender.lock().unwrap() = Some(events);
            Ok(())
        }

        async fn emit(&self, event: &str, data: Value) -> SyncResult<()> {
            if self.fail_emit.load(Ordering::SeqCst) {
                return Err(SyncError::WebSocketConnection("broken pipe".to_string()));
            }
            self.emitted.lock().unwrap().push((event.to_string(), data));
            Ok(())
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.sender.lock().unwrap().take();
        }
    }
}
