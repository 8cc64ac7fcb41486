// src/services/ride_sync_service.rs
//! Front door for the UI: wires inbound frames through the ride store into
//! notifications and callbacks, and exposes the user actions.
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing;

use crate::{
    errors::SyncResult,
    models::{
        events::{AckOutcome, ActionAck, ActionKind, Inbound, InboundEvent, OutboundCommand},
        notification::NotificationAction,
        ride::{RideEvent, RideProgressRecord, RideStatus},
    },
    services::{
        action_gateway::{ActionDispatch, ActionGateway},
        callback_registry::{CallbackCategory, CallbackPayload, CallbackRegistry},
        connection_service::ConnectionManager,
        messaging_service::NotificationDispatcher,
        push_service::PushRegistrationService,
        ride_store::{RideStateStore, Transition},
    },
};

pub struct RideSyncService {
    connection: Arc<ConnectionManager>,
    store: Mutex<RideStateStore>,
    dispatcher: NotificationDispatcher,
    callbacks: CallbackRegistry,
    gateway: ActionGateway,
    push: Option<Arc<PushRegistrationService>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl RideSyncService {
    pub fn new(
        connection: Arc<ConnectionManager>,
        dispatcher: NotificationDispatcher,
        gateway: ActionGateway,
        push: Option<Arc<PushRegistrationService>>,
    ) -> Self {
        Self {
            connection,
            store: Mutex::new(RideStateStore::new()),
            dispatcher,
            callbacks: CallbackRegistry::new(),
            gateway,
            push,
            pump: Mutex::new(None),
        }
    }

    /// Start push refresh and open the channel. Returns false when the channel
    /// could not be started; the service stays usable and reports disconnected.
    pub async fn initialize(self: &Arc<Self>) -> bool {
        if let Some(push) = &self.push {
            push.start_periodic_refresh();
        }

        let Some(mut events) = self.connection.initialize().await else {
            return false;
        };

        let this = Arc::clone(self);
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Some((name, data)) = this.connection.handle_event(event).await {
                    this.handle_frame(&name, data).await;
                }
            }
            tracing::debug!("Transport event stream ended");
        });

        let previous = self.pump.lock().unwrap_or_else(PoisonError::into_inner).replace(pump);
        if let Some(previous) = previous {
            previous.abort();
        }
        true
    }

    /// Decode one inbound frame and route it. Bad frames are logged and dropped.
    pub async fn handle_frame(&self, event: &str, data: Value) {
        let inbound = match InboundEvent::decode(event, data) {
            Ok(decoded) => decoded.into_inbound(),
            Err(e) => {
                tracing::warn!("Dropping frame: {}", e);
                return;
            }
        };

        match inbound {
            Inbound::Ride { ride_id, event } => self.apply_ride_event(&ride_id, event).await,
            Inbound::Ack(ack) => self.handle_ack(ack).await,
        }
    }

    async fn apply_ride_event(&self, ride_id: &str, event: RideEvent) {
        let pin_event = matches!(event, RideEvent::PinGenerated { .. });
        let transition = self
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(ride_id, event);

        match transition {
            Transition::Created(record) => {
                self.send_if_connected(OutboundCommand::SubscribeToRide {
                    ride_id: ride_id.to_string(),
                })
                .await;
                self.publish(&record, false).await;
            }
            Transition::Updated(record) => self.publish(&record, pin_event).await,
            Transition::Finished(record) => {
                self.publish(&record, false).await;
                self.send_if_connected(OutboundCommand::UnsubscribeFromRide {
                    ride_id: ride_id.to_string(),
                })
                .await;
            }
            Transition::Duplicate(_) | Transition::Dropped(_) => {}
        }
    }

    async fn publish(&self, record: &RideProgressRecord, pin_event: bool) {
        if let Err(e) = self.dispatcher.dispatch(record).await {
            tracing::error!("Notification for ride {} failed: {}", record.ride_id, e);
        }

        match record.status {
            RideStatus::Completed => {
                self.callbacks
                    .trigger(CallbackCategory::RideCompleted, &CallbackPayload::RideCompleted(record.clone()));
            }
            _ => {
                self.callbacks
                    .trigger(CallbackCategory::RideProgress, &CallbackPayload::RideProgress(record.clone()));
            }
        }

        if let (true, Some(pin_code)) = (pin_event, &record.pin_code) {
            self.callbacks.trigger(
                CallbackCategory::PinConfirmation,
                &CallbackPayload::PinConfirmation {
                    ride_id: record.ride_id.clone(),
                    pin_code: pin_code.clone(),
                },
            );
        }
    }

    async fn handle_ack(&self, ack: ActionAck) {
        self.gateway.on_ack(&ack);
        let category = CallbackCategory::for_ack(&ack);
        if let Some(error) = ack.clone().into_error() {
            tracing::warn!("{}", error);
        }

        // An accepted PIN takes the sticky PIN notification down right away
        let confirmed_ride = match (ack.kind, ack.outcome, &ack.ride_id) {
            (ActionKind::ConfirmPin, AckOutcome::Success, Some(ride_id)) => Some(ride_id.clone()),
            _ => None,
        };
        self.callbacks.trigger(category, &CallbackPayload::ActionAck(ack));

        if let Some(ride_id) = confirmed_ride {
            let transition = self
                .store
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .confirm_pin(&ride_id);
            if let Transition::Updated(record) = transition {
                self.publish(&record, false).await;
            }
        }
    }

    async fn send_if_connected(&self, command: OutboundCommand) {
        if !self.connection.is_connected() {
            return;
        }
        let name = command.event_name();
        if let Err(e) = self.connection.send(command).await {
            tracing::warn!("Failed to send {}: {}", name, e);
        }
    }

    /// A button on a ride notification was tapped. `call` goes straight out;
    /// the others need input from the UI and are forwarded as callbacks.
    pub async fn handle_notification_action(
        &self,
        ride_id: &str,
        action: NotificationAction,
    ) -> Option<ActionDispatch> {
        tracing::info!("Notification action {} for ride {}", action, ride_id);
        match CallbackCategory::for_tap(action) {
            None => Some(self.gateway.call_driver(ride_id).await),
            Some(category) => {
                self.callbacks.trigger(
                    category,
                    &CallbackPayload::UserAction {
                        ride_id: ride_id.to_string(),
                        action,
                    },
                );
                None
            }
        }
    }

    pub fn register_callback<F>(&self, category: CallbackCategory, handler: F)
    where
        F: Fn(&CallbackPayload) -> SyncResult<()> + Send + Sync + 'static,
    {
        self.callbacks.register(category, handler);
    }

    pub fn unregister_callback(&self, category: CallbackCategory) -> bool {
        self.callbacks.unregister(category)
    }

    pub fn get_current_ride(&self, ride_id: &str) -> Option<RideProgressRecord> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(ride_id)
            .cloned()
    }

    pub fn get_all_active_rides(&self) -> Vec<RideProgressRecord> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner).all()
    }

    pub fn is_socket_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub async fn cancel_ride(&self, ride_id: &str, reason: Option<String>) -> ActionDispatch {
        self.gateway.cancel_ride(ride_id, reason).await
    }

    pub async fn confirm_pin(&self, ride_id: &str, pin_code: &str) -> ActionDispatch {
        self.gateway.confirm_pin(ride_id, pin_code).await
    }

    pub async fn send_message_to_driver(&self, ride_id: &str, message: &str) -> ActionDispatch {
        self.gateway.send_message_to_driver(ride_id, message).await
    }

    pub async fn call_driver(&self, ride_id: &str) -> ActionDispatch {
        self.gateway.call_driver(ride_id).await
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Stop every timer and task, close the channel and forget all state.
    pub async fn cleanup(&self) {
        let pump = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(pump) = pump {
            pump.abort();
        }
        if let Some(push) = &self.push {
            push.stop();
        }

        self.connection.cleanup().await;
        self.dispatcher.clear().await;
        self.store.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.gateway.clear();
        self.callbacks.clear();
        tracing::info!("Ride sync service cleaned up");
    }
}
