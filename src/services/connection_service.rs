// src/services/connection_service.rs
//! Owns the channel lifecycle: authenticate, connect, join the customer room
//! and reconnect with linear backoff until the attempt budget runs out.
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing;
use uuid::Uuid;

use crate::{
    errors::{SyncError, SyncResult},
    models::events::OutboundCommand,
    services::storage_service::StorageService,
    transport::{DisconnectReason, Transport, TransportEvent, TransportEventReceiver, TransportEventSender},
};

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(1000),
        }
    }
}

struct Session {
    id: Uuid,
    events: TransportEventSender,
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    storage: StorageService,
    config: ConnectionConfig,
    connected: AtomicBool,
    attempts: AtomicU32,
    session: Mutex<Option<Session>>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, storage: StorageService, config: ConnectionConfig) -> Self {
        Self {
            transport,
            storage,
            config,
            connected: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
            session: Mutex::new(None),
            reconnect_timer: Mutex::new(None),
        }
    }

    /// Open the channel with the stored bearer credential.
    ///
    /// Returns the stream of transport events the caller must feed back through
    /// [`ConnectionManager::handle_event`]. Returns `None`, after logging, when
    /// there is no credential or a session is already running.
    pub async fn initialize(self: &Arc<Self>) -> Option<TransportEventReceiver> {
        let token = match self.storage.auth_token().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::warn!("No auth token available, socket connection skipped");
                return None;
            }
            Err(e) => {
                tracing::error!("Could not read auth token: {}", e);
                return None;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            if session.is_some() {
                tracing::warn!("Socket already initialized, call cleanup() first");
                return None;
            }
            let id = Uuid::new_v4();
            tracing::info!("Starting socket session {}", id);
            *session = Some(Session { id, events: tx.clone() });
        }

        if let Err(e) = self.transport.connect(&token, tx).await {
            self.handle_error(&e.to_string());
        }

        Some(rx)
    }

    /// React to a lifecycle event. Frames are handed back to the caller.
    pub async fn handle_event(self: &Arc<Self>, event: TransportEvent) -> Option<(String, Value)> {
        match event {
            TransportEvent::Connected => {
                self.handle_connect().await;
                None
            }
            TransportEvent::Disconnected(reason) => {
                self.handle_disconnect(reason);
                None
            }
            TransportEvent::Error(message) => {
                self.handle_error(&message);
                None
            }
            TransportEvent::Frame { event, data } => Some((event, data)),
        }
    }

    async fn handle_connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.attempts.store(0, Ordering::SeqCst);
        self.cancel_reconnect();
        tracing::info!("Socket connected");

        match self.storage.user_id().await {
            Ok(Some(user_id)) => {
                if let Err(e) = self.send(OutboundCommand::JoinCustomerRoom { user_id }).await {
                    tracing::error!("Failed to join customer room: {}", e);
                }
            }
            Ok(None) => tracing::warn!("No user id stored, customer room not joined"),
            Err(e) => tracing::error!("Could not read user id: {}", e),
        }
    }

    fn handle_disconnect(self: &Arc<Self>, reason: DisconnectReason) {
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("Socket disconnected: {:?}", reason);

        match reason {
            DisconnectReason::ServerInitiated => self.schedule_reconnect(Duration::ZERO),
            DisconnectReason::TransportClosed => self.handle_error("transport closed"),
            DisconnectReason::ClientInitiated => {}
        }
    }

    fn handle_error(self: &Arc<Self>, message: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::error!("Socket error (attempt {}): {}", attempt, message);

        if attempt >= self.config.max_reconnect_attempts {
            tracing::warn!("Giving up after {} reconnection attempts", attempt);
            self.cancel_reconnect();
            return;
        }

        self.schedule_reconnect(self.config.reconnect_base_delay * attempt);
    }

    fn schedule_reconnect(self: &Arc<Self>, delay: Duration) {
        if self.session.lock().unwrap_or_else(PoisonError::into_inner).is_none() {
            return;
        }

        tracing::debug!("Reconnecting in {:?}", delay);
        let mut timer = self.reconnect_timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        let this = Arc::clone(self);
        // The handle stays in the slot until `reconnect` returns so `cleanup()`
        // can abort an in-flight connect. A failed attempt replaces it without
        // awaiting again, so that abort never lands.
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.reconnect().await;
        }));
    }

    async fn reconnect(self: &Arc<Self>) {
        let Some((session_id, events)) = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| (s.id, s.events.clone()))
        else {
            return;
        };

        let token = match self.storage.auth_token().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::warn!("Auth token gone, not reconnecting session {}", session_id);
                return;
            }
            Err(e) => {
                tracing::error!("Could not read auth token: {}", e);
                return;
            }
        };

        tracing::info!(
            "Reconnecting session {} (attempt {})",
            session_id,
            self.attempts.load(Ordering::SeqCst)
        );
        if let Err(e) = self.transport.connect(&token, events).await {
            self.handle_error(&e.to_string());
            return;
        }

        let current = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.id);
        if current != Some(session_id) {
            tracing::info!("Session {} ended while reconnecting, closing", session_id);
            self.transport.close().await;
        }
    }

    fn cancel_reconnect(&self) {
        let timer = self.reconnect_timer.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(timer) = timer {
            timer.abort();
        }
    }

    /// Emit a command, failing with `NotConnected` while the channel is down.
    pub async fn send(&self, command: OutboundCommand) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let (event, data) = command.into_frame()?;
        self.transport.emit(event, data).await
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of reconnect timers still waiting to fire.
    pub fn pending_timers(&self) -> usize {
        self.reconnect_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |timer| usize::from(!timer.is_finished()))
    }

    /// Cancel timers and close the channel. A later `initialize()` starts cold.
    pub async fn cleanup(&self) {
        self.cancel_reconnect();
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(session) = session {
            tracing::info!("Closing socket session {}", session.id);
        }
        self.transport.close().await;
        self.connected.store(false, Ordering::SeqCst);
        self.attempts.store(0, Ordering::SeqCst);
    }
}
