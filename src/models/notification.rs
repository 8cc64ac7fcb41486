// src/models/notification.rs
use serde::{Deserialize, Serialize};
use std::fmt;

/// Buttons attached to an on-device ride notification.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    Call,
    Cancel,
    Message,
    ConfirmPin,
}

impl NotificationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationAction::Call => "call",
            NotificationAction::Cancel => "cancel",
            NotificationAction::Message => "message",
            NotificationAction::ConfirmPin => "confirm_pin",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NotificationAction::Call => "Call driver",
            NotificationAction::Cancel => "Cancel ride",
            NotificationAction::Message => "Message",
            NotificationAction::ConfirmPin => "Confirm PIN",
        }
    }
}

impl fmt::Display for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OS-level channel the notification is posted on.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    RideProgress,
    PinConfirmation,
    RideCompleted,
    RideCancelled,
}

impl NotificationChannel {
    pub fn id(&self) -> &'static str {
        match self {
            NotificationChannel::RideProgress => "ride_progress",
            NotificationChannel::PinConfirmation => "pin_confirmation",
            NotificationChannel::RideCompleted => "ride_completed",
            NotificationChannel::RideCancelled => "ride_cancelled",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Normal,
    #[default]
    High, // Will wake sleeping devices
}

/// Fully rendered notification. Equal records render equal values.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenderedNotification {
    pub ride_id: String,
    pub title: String,
    pub body: String,
    pub actions: Vec<NotificationAction>,
    pub channel: NotificationChannel,
    pub priority: NotificationPriority,
    pub sticky: bool,
    pub auto_dismiss: bool,
}

/// Link between a ride and the notification currently shown for it.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationHandle {
    pub ride_id: String,
    pub notification_id: String,
    pub rendered: RenderedNotification,
}
