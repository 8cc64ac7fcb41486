// src/models/events.rs
//! Wire protocol: every frame is `{"event": <name>, "data": {...}}` with
//! camelCase payload fields.
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

use crate::{
    errors::{SyncError, SyncResult},
    models::{driver::DriverInfo, ride::RideEvent},
};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RideAcceptedPayload {
    pub ride_id: String,
    pub driver_info: DriverInfo,
    #[serde(default)]
    pub pickup_location: String,
    #[serde(default)]
    pub dropoff_location: String,
    #[serde(default)]
    pub eta: String,
    #[serde(default)]
    pub distance: String,
    #[serde(default)]
    pub progress: f64,
}

/// Payload shared by `ride_en_route` and `ride_in_progress`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RideLegPayload {
    pub ride_id: String,
    #[serde(default)]
    pub eta: Option<String>,
    #[serde(default)]
    pub distance: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RideRef {
    pub ride_id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RideCompletedPayload {
    pub ride_id: String,
    pub fare: f64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RideCancelledPayload {
    pub ride_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverLocationPayload {
    pub ride_id: String,
    pub driver_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub eta: Option<String>,
    #[serde(default)]
    pub distance: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PinGeneratedPayload {
    pub ride_id: String,
    pub pin_code: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    pub message: String,
    #[serde(default)]
    pub ride_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// Every event the server may push to the customer channel.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    RideAccepted(RideAcceptedPayload),
    RideEnRoute(RideLegPayload),
    RideArrived(RideRef),
    RideStarted(RideRef),
    RideInProgress(RideLegPayload),
    RideCompleted(RideCompletedPayload),
    RideCancelled(RideCancelledPayload),
    DriverLocationUpdate(DriverLocationPayload),
    PinGenerated(PinGeneratedPayload),
    PinConfirmationSuccess(AckPayload),
    PinConfirmationError(AckPayload),
    MessageDriverSuccess(AckPayload),
    MessageDriverError(AckPayload),
    CallDriverSuccess(AckPayload),
    CallDriverError(AckPayload),
    RideCancellationSuccess(AckPayload),
    RideCancellationError(AckPayload),
}

pub const INBOUND_EVENT_NAMES: &[&str] = &[
    "ride_accepted",
    "ride_en_route",
    "ride_arrived",
    "ride_started",
    "ride_in_progress",
    "ride_completed",
    "ride_cancelled",
    "driver_location_update",
    "pin_generated",
    "pin_confirmation_success",
    "pin_confirmation_error",
    "message_driver_success",
    "message_driver_error",
    "call_driver_success",
    "call_driver_error",
    "ride_cancellation_success",
    "ride_cancellation_error",
];

/// Outbound user action kinds. Each has a command name and an
/// acknowledgement prefix (`<prefix>_success` / `<prefix>_error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CancelRide,
    ConfirmPin,
    MessageDriver,
    CallDriver,
}

impl ActionKind {
    pub fn command_name(&self) -> &'static str {
        match self {
            ActionKind::CancelRide => "cancel_ride",
            ActionKind::ConfirmPin => "confirm_pin",
            ActionKind::MessageDriver => "message_driver",
            ActionKind::CallDriver => "call_driver",
        }
    }

    pub fn ack_prefix(&self) -> &'static str {
        match self {
            ActionKind::CancelRide => "ride_cancellation",
            ActionKind::ConfirmPin => "pin_confirmation",
            ActionKind::MessageDriver => "message_driver",
            ActionKind::CallDriver => "call_driver",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckOutcome {
    Success,
    Error,
}

/// Server acknowledgement of an outbound action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionAck {
    pub kind: ActionKind,
    pub outcome: AckOutcome,
    pub message: String,
    pub ride_id: Option<String>,
    pub correlation_id: Option<String>,
}

impl ActionAck {
    fn new(kind: ActionKind, outcome: AckOutcome, payload: AckPayload) -> Self {
        Self {
            kind,
            outcome,
            message: payload.message,
            ride_id: payload.ride_id,
            correlation_id: payload.correlation_id,
        }
    }

    pub fn event_name(&self) -> String {
        let suffix = match self.outcome {
            AckOutcome::Success => "success",
            AckOutcome::Error => "error",
        };
        format!("{}_{}", self.kind.ack_prefix(), suffix)
    }

    /// Action errors surface verbatim to the UI.
    pub fn into_error(self) -> Option<SyncError> {
        match self.outcome {
            AckOutcome::Success => None,
            AckOutcome::Error => Some(SyncError::ActionRejected {
                action: self.kind.command_name().to_string(),
                message: self.message,
            }),
        }
    }
}

/// Inbound traffic split by who consumes it.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Ride { ride_id: String, event: RideEvent },
    Ack(ActionAck),
}

impl InboundEvent {
    /// Decode a raw frame, rejecting unknown names and incomplete payloads.
    pub fn decode(event: &str, data: Value) -> SyncResult<Self> {
        if !INBOUND_EVENT_NAMES.contains(&event) {
            return Err(SyncError::UnknownEvent(event.to_string()));
        }
        serde_json::from_value(json!({ "event": event, "data": data }))
            .map_err(|e| SyncError::malformed(event, e.to_string()))
    }

    pub fn into_inbound(self) -> Inbound {
        use AckOutcome::{Error, Success};

        let ride = |ride_id: String, event: RideEvent| Inbound::Ride { ride_id, event };
        let ack = |kind, outcome, payload| Inbound::Ack(ActionAck::new(kind, outcome, payload));

        match self {
            InboundEvent::RideAccepted(p) => ride(
                p.ride_id,
                RideEvent::Accepted {
                    driver_info: p.driver_info,
                    pickup_location: p.pickup_location,
                    dropoff_location: p.dropoff_location,
                    eta: p.eta,
                    distance: p.distance,
                    progress: p.progress,
                },
            ),
            InboundEvent::RideEnRoute(p) => ride(
                p.ride_id,
                RideEvent::EnRoute { eta: p.eta, distance: p.distance, progress: p.progress },
            ),
            InboundEvent::RideArrived(p) => ride(p.ride_id, RideEvent::Arrived),
            InboundEvent::RideStarted(p) => ride(p.ride_id, RideEvent::Started),
            InboundEvent::RideInProgress(p) => ride(
                p.ride_id,
                RideEvent::InProgress { eta: p.eta, distance: p.distance, progress: p.progress },
            ),
            InboundEvent::RideCompleted(p) => ride(p.ride_id, RideEvent::Completed { fare: p.fare }),
            InboundEvent::RideCancelled(p) => {
                ride(p.ride_id, RideEvent::Cancelled { reason: p.reason })
            }
            InboundEvent::DriverLocationUpdate(p) => ride(
                p.ride_id,
                RideEvent::LocationUpdate { eta: p.eta, distance: p.distance, progress: p.progress },
            ),
            InboundEvent::PinGenerated(p) => {
                ride(p.ride_id, RideEvent::PinGenerated { pin_code: p.pin_code })
            }
            InboundEvent::PinConfirmationSuccess(p) => ack(ActionKind::ConfirmPin, Success, p),
            InboundEvent::PinConfirmationError(p) => ack(ActionKind::ConfirmPin, Error, p),
            InboundEvent::MessageDriverSuccess(p) => ack(ActionKind::MessageDriver, Success, p),
            InboundEvent::MessageDriverError(p) => ack(ActionKind::MessageDriver, Error, p),
            InboundEvent::CallDriverSuccess(p) => ack(ActionKind::CallDriver, Success, p),
            InboundEvent::CallDriverError(p) => ack(ActionKind::CallDriver, Error, p),
            InboundEvent::RideCancellationSuccess(p) => ack(ActionKind::CancelRide, Success, p),
            InboundEvent::RideCancellationError(p) => ack(ActionKind::CancelRide, Error, p),
        }
    }
}

/// Every command the client may send on the channel.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundCommand {
    #[serde(rename_all = "camelCase")]
    JoinCustomerRoom { user_id: String },
    #[serde(rename_all = "camelCase")]
    SubscribeToRide { ride_id: String },
    #[serde(rename_all = "camelCase")]
    UnsubscribeFromRide { ride_id: String },
    #[serde(rename_all = "camelCase")]
    CancelRide {
        ride_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ConfirmPin {
        ride_id: String,
        pin_code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    MessageDriver {
        ride_id: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    CallDriver {
        ride_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
}

impl OutboundCommand {
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundCommand::JoinCustomerRoom { .. } => "join_customer_room",
            OutboundCommand::SubscribeToRide { .. } => "subscribe_to_ride",
            OutboundCommand::UnsubscribeFromRide { .. } => "unsubscribe_from_ride",
            OutboundCommand::CancelRide { .. } => ActionKind::CancelRide.command_name(),
            OutboundCommand::ConfirmPin { .. } => ActionKind::ConfirmPin.command_name(),
            OutboundCommand::MessageDriver { .. } => ActionKind::MessageDriver.command_name(),
            OutboundCommand::CallDriver { .. } => ActionKind::CallDriver.command_name(),
        }
    }

    /// Split into the `(event, data)` pair handed to the transport.
    pub fn into_frame(self) -> SyncResult<(&'static str, Value)> {
        let name = self.event_name();
        let mut frame = serde_json::to_value(&self)?;
        let data = frame
            .get_mut("data")
            .map(Value::take)
            .ok_or_else(|| SyncError::JsonSerialization(format!("{} has no data", name)))?;
        Ok((name, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ride_accepted() {
        let event = InboundEvent::decode(
            "ride_accepted",
            json!({
                "rideId": "r1",
                "driverInfo": {"id": "drv-1", "name": "John"},
                "pickupLocation": "Osu",
                "dropoffLocation": "Airport",
                "eta": "5 min",
                "distance": "2 km",
                "progress": 10
            }),
        )
        .unwrap();

        match event.into_inbound() {
            Inbound::Ride { ride_id, event: RideEvent::Accepted { driver_info, eta, .. } } => {
                assert_eq!(ride_id, "r1");
                assert_eq!(driver_info.name, "John");
                assert_eq!(eta, "5 min");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_unknown_event() {
        let err = InboundEvent::decode("ride_teleported", json!({"rideId": "r1"})).unwrap_err();
        assert!(matches!(err, SyncError::UnknownEvent(name) if name == "ride_teleported"));
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let err = InboundEvent::decode("pin_generated", json!({"rideId": "r1"})).unwrap_err();
        assert!(err.is_protocol());
        let err = InboundEvent::decode("ride_completed", json!({"fare": 10})).unwrap_err();
        assert!(matches!(err, SyncError::MalformedPayload { .. }));
    }

    #[test]
    fn test_decode_ack() {
        let event = InboundEvent::decode(
            "ride_cancellation_error",
            json!({"message": "Too late to cancel", "rideId": "r1"}),
        )
        .unwrap();
        let Inbound::Ack(ack) = event.into_inbound() else {
            panic!("expected ack");
        };
        assert_eq!(ack.kind, ActionKind::CancelRide);
        assert_eq!(ack.outcome, AckOutcome::Error);
        assert_eq!(ack.event_name(), "ride_cancellation_error");
        assert!(matches!(
            ack.into_error(),
            Some(SyncError::ActionRejected { message, .. }) if message == "Too late to cancel"
        ));
    }

    #[test]
    fn test_every_known_name_is_a_variant() {
        for name in INBOUND_EVENT_NAMES {
            let err = InboundEvent::decode(name, json!({})).unwrap_err();
            assert!(
                matches!(err, SyncError::MalformedPayload { .. }),
                "{} should be known but incomplete",
                name
            );
        }
    }

    #[test]
    fn test_outbound_frame() {
        let (name, data) = OutboundCommand::ConfirmPin {
            ride_id: "r1".to_string(),
            pin_code: "1234".to_string(),
            correlation_id: None,
        }
        .into_frame()
        .unwrap();
        assert_eq!(name, "confirm_pin");
        assert_eq!(data, json!({"rideId": "r1", "pinCode": "1234"}));

        let (name, data) = OutboundCommand::JoinCustomerRoom { user_id: "usr-1".to_string() }
            .into_frame()
            .unwrap();
        assert_eq!(name, "join_customer_room");
        assert_eq!(data, json!({"userId": "usr-1"}));
    }
}
