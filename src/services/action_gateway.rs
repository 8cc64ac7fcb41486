// src/services/action_gateway.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing;

use crate::{
    errors::SyncError,
    models::events::{ActionAck, ActionKind, OutboundCommand},
    services::connection_service::ConnectionManager,
    utils::{IdGenerator, IdType},
};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub ack_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(30),
        }
    }
}

/// What happened to a user action. Actions never fail loudly; results arrive
/// later as acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionDispatch {
    Sent { correlation_id: String },
    NotConnected,
    AlreadyInFlight, // Same action for the same ride still awaiting its ack
    /// The channel was up but the frame could not be written.
    SendFailed { reason: String },
}

impl ActionDispatch {
    pub fn is_sent(&self) -> bool {
        matches!(self, ActionDispatch::Sent { .. })
    }
}

#[derive(Debug, Clone)]
struct InFlight {
    correlation_id: String,
    sent_at: Instant,
}

pub struct ActionGateway {
    connection: Arc<ConnectionManager>,
    config: GatewayConfig,
    in_flight: Mutex<HashMap<(String, ActionKind), InFlight>>,
}

impl ActionGateway {
    pub fn new(connection: Arc<ConnectionManager>, config: GatewayConfig) -> Self {
        Self {
            connection,
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn cancel_ride(&self, ride_id: &str, reason: Option<String>) -> ActionDispatch {
        self.send(ride_id, ActionKind::CancelRide, |correlation_id| OutboundCommand::CancelRide {
            ride_id: ride_id.to_string(),
            reason,
            correlation_id: Some(correlation_id),
        })
        .await
    }

    pub async fn confirm_pin(&self, ride_id: &str, pin_code: &str) -> ActionDispatch {
        self.send(ride_id, ActionKind::ConfirmPin, |correlation_id| OutboundCommand::ConfirmPin {
            ride_id: ride_id.to_string(),
            pin_code: pin_code.to_string(),
            correlation_id: Some(correlation_id),
        })
        .await
    }

    pub async fn send_message_to_driver(&self, ride_id: &str, message: &str) -> ActionDispatch {
        self.send(ride_id, ActionKind::MessageDriver, |correlation_id| OutboundCommand::MessageDriver {
            ride_id: ride_id.to_string(),
            message: message.to_string(),
            correlation_id: Some(correlation_id),
        })
        .await
    }

    pub async fn call_driver(&self, ride_id: &str) -> ActionDispatch {
        self.send(ride_id, ActionKind::CallDriver, |correlation_id| OutboundCommand::CallDriver {
            ride_id: ride_id.to_string(),
            correlation_id: Some(correlation_id),
        })
        .await
    }

    async fn send<F>(&self, ride_id: &str, kind: ActionKind, build: F) -> ActionDispatch
    where
        F: FnOnce(String) -> OutboundCommand,
    {
        if !self.connection.is_connected() {
            tracing::debug!("Socket not connected, {} for ride {} dropped", kind, ride_id);
            return ActionDispatch::NotConnected;
        }

        let key = (ride_id.to_string(), kind);
        let correlation_id = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = in_flight.get(&key) {
                if entry.sent_at.elapsed() < self.config.ack_timeout {
                    let error = SyncError::ActionInFlight {
                        ride_id: ride_id.to_string(),
                        action: kind.to_string(),
                    };
                    tracing::warn!("{}", error);
                    return ActionDispatch::AlreadyInFlight;
                }
                tracing::warn!("No acknowledgement for {} ({}), releasing", kind, entry.correlation_id);
            }

            let correlation_id = IdGenerator::generate(IdType::Action);
            in_flight.insert(
                key.clone(),
                InFlight {
                    correlation_id: correlation_id.clone(),
                    sent_at: Instant::now(),
                },
            );
            correlation_id
        };

        match self.connection.send(build(correlation_id.clone())).await {
            Ok(()) => {
                tracing::info!("Sent {} for ride {} ({})", kind, ride_id, correlation_id);
                ActionDispatch::Sent { correlation_id }
            }
            Err(e) => {
                tracing::error!("Failed to send {} for ride {}: {}", kind, ride_id, e);
                let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
                if in_flight.get(&key).is_some_and(|entry| entry.correlation_id == correlation_id) {
                    in_flight.remove(&key);
                }
                match e {
                    SyncError::NotConnected => ActionDispatch::NotConnected,
                    other => ActionDispatch::SendFailed {
                        reason: other.to_string(),
                    },
                }
            }
        }
    }

    /// Release whatever the acknowledgement answers. Matches on correlation id
    /// first, then ride id, and otherwise releases every action of that kind.
    pub fn on_ack(&self, ack: &ActionAck) -> usize {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let before = in_flight.len();

        if let Some(correlation_id) = &ack.correlation_id {
            in_flight.retain(|_, entry| &entry.correlation_id != correlation_id);
            if in_flight.len() < before {
                return before - in_flight.len();
            }
        }

        match &ack.ride_id {
            Some(ride_id) => {
                in_flight.remove(&(ride_id.clone(), ack.kind));
            }
            None => in_flight.retain(|(_, kind), _| *kind != ack.kind),
        }
        before - in_flight.len()
    }

    pub fn is_in_flight(&self, ride_id: &str, kind: ActionKind) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(ride_id.to_string(), kind))
            .is_some_and(|entry| entry.sent_at.elapsed() < self.config.ack_timeout)
    }

    pub fn clear(&self) {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
