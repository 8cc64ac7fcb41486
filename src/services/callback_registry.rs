// src/services/callback_registry.rs
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};
use tracing;

use crate::{
    errors::{SyncError, SyncResult},
    models::{
        events::{AckOutcome, ActionAck, ActionKind},
        notification::NotificationAction,
        ride::RideProgressRecord,
    },
};

/// Named categories the UI can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackCategory {
    RideProgress,
    PinConfirmation,
    RideCompleted,
    CancelRide,    // Notification "cancel" tapped
    MessageDriver, // Notification "message" tapped
    ConfirmPin,    // Notification "confirm PIN" tapped
    PinConfirmationSuccess,
    PinConfirmationError,
    MessageDriverSuccess,
    MessageDriverError,
    CallDriverSuccess,
    CallDriverError,
    RideCancellationSuccess,
    RideCancellationError,
}

impl CallbackCategory {
    pub const ALL: [CallbackCategory; 14] = [
        CallbackCategory::RideProgress,
        CallbackCategory::PinConfirmation,
        CallbackCategory::RideCompleted,
        CallbackCategory::CancelRide,
        CallbackCategory::MessageDriver,
        CallbackCategory::ConfirmPin,
        CallbackCategory::PinConfirmationSuccess,
        CallbackCategory::PinConfirmationError,
        CallbackCategory::MessageDriverSuccess,
        CallbackCategory::MessageDriverError,
        CallbackCategory::CallDriverSuccess,
        CallbackCategory::CallDriverError,
        CallbackCategory::RideCancellationSuccess,
        CallbackCategory::RideCancellationError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackCategory::RideProgress => "ride_progress",
            CallbackCategory::PinConfirmation => "pin_confirmation",
            CallbackCategory::RideCompleted => "ride_completed",
            CallbackCategory::CancelRide => "cancel_ride",
            CallbackCategory::MessageDriver => "message_driver",
            CallbackCategory::ConfirmPin => "confirm_pin",
            CallbackCategory::PinConfirmationSuccess => "pin_confirmation_success",
            CallbackCategory::PinConfirmationError => "pin_confirmation_error",
            CallbackCategory::MessageDriverSuccess => "message_driver_success",
            CallbackCategory::MessageDriverError => "message_driver_error",
            CallbackCategory::CallDriverSuccess => "call_driver_success",
            CallbackCategory::CallDriverError => "call_driver_error",
            CallbackCategory::RideCancellationSuccess => "ride_cancellation_success",
            CallbackCategory::RideCancellationError => "ride_cancellation_error",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.as_str() == name)
    }

    /// Category an acknowledgement is delivered on.
    pub fn for_ack(ack: &ActionAck) -> Self {
        use AckOutcome::{Error, Success};

        match (ack.kind, ack.outcome) {
            (ActionKind::ConfirmPin, Success) => CallbackCategory::PinConfirmationSuccess,
            (ActionKind::ConfirmPin, Error) => CallbackCategory::PinConfirmationError,
            (ActionKind::MessageDriver, Success) => CallbackCategory::MessageDriverSuccess,
            (ActionKind::MessageDriver, Error) => CallbackCategory::MessageDriverError,
            (ActionKind::CallDriver, Success) => CallbackCategory::CallDriverSuccess,
            (ActionKind::CallDriver, Error) => CallbackCategory::CallDriverError,
            (ActionKind::CancelRide, Success) => CallbackCategory::RideCancellationSuccess,
            (ActionKind::CancelRide, Error) => CallbackCategory::RideCancellationError,
        }
    }

    /// Category a notification tap is forwarded on, when the UI has to finish it.
    pub fn for_tap(action: NotificationAction) -> Option<Self> {
        match action {
            NotificationAction::Cancel => Some(CallbackCategory::CancelRide),
            NotificationAction::Message => Some(CallbackCategory::MessageDriver),
            NotificationAction::ConfirmPin => Some(CallbackCategory::ConfirmPin),
            NotificationAction::Call => None,
        }
    }
}

impl fmt::Display for CallbackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a handler receives.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackPayload {
    RideProgress(RideProgressRecord),
    PinConfirmation { ride_id: String, pin_code: String },
    RideCompleted(RideProgressRecord),
    UserAction { ride_id: String, action: NotificationAction },
    ActionAck(ActionAck),
}

pub type CallbackHandler = Arc<dyn Fn(&CallbackPayload) -> SyncResult<()> + Send + Sync>;

/// One handler per category; registering again replaces the previous one.
#[derive(Default)]
pub struct CallbackRegistry {
    handlers: RwLock<HashMap<CallbackCategory, CallbackHandler>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, category: CallbackCategory, handler: F)
    where
        F: Fn(&CallbackPayload) -> SyncResult<()> + Send + Sync + 'static,
    {
        let previous = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(category, Arc::new(handler));
        if previous.is_some() {
            tracing::debug!("Replaced handler for {}", category);
        }
    }

    pub fn unregister(&self, category: CallbackCategory) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&category)
            .is_some()
    }

    pub fn is_registered(&self, category: CallbackCategory) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&category)
    }

    /// Run the handler for `category`, if any. Handler errors and panics are
    /// logged and swallowed. Returns whether a handler ran to success.
    pub fn trigger(&self, category: CallbackCategory, payload: &CallbackPayload) -> bool {
        // Clone out so a handler may re-register without deadlocking
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .cloned();
        let Some(handler) = handler else {
            tracing::debug!("No handler registered for {}", category);
            return false;
        };

        match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                let error = SyncError::handler_failed(category.as_str(), e.to_string());
                tracing::error!("{}", error);
                false
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                let error = SyncError::handler_failed(category.as_str(), reason);
                tracing::error!("{}", error);
                false
            }
        }
    }

    pub fn clear(&self) {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
