// src/models/ride.rs
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::driver::DriverInfo;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Accepted,   // Driver accepted the ride request
    EnRoute,    // Driver is on the way to pickup
    Arrived,    // Driver is waiting at pickup, PIN may be required
    Started,    // Rider picked up, trip begins
    InProgress, // Heading to destination
    Completed,  // Trip finished, fare known
    Cancelled,  // Terminal from any non-terminal status
}

/// Which half of the trip the progress percentage refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RideLeg {
    ToPickup,
    ToDestination,
}

impl RideStatus {
    /// Position in `accepted < en_route < arrived < started < in_progress < completed`.
    /// `Cancelled` shares the terminal rank with `Completed`.
    pub fn rank(&self) -> u8 {
        match self {
            RideStatus::Accepted => 0,
            RideStatus::EnRoute => 1,
            RideStatus::Arrived => 2,
            RideStatus::Started => 3,
            RideStatus::InProgress => 4,
            RideStatus::Completed | RideStatus::Cancelled => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// Statuses during which the rider can message the driver.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RideStatus::EnRoute | RideStatus::Arrived | RideStatus::Started | RideStatus::InProgress
        )
    }

    pub fn leg(&self) -> RideLeg {
        match self {
            RideStatus::Accepted | RideStatus::EnRoute | RideStatus::Arrived => RideLeg::ToPickup,
            _ => RideLeg::ToDestination,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Accepted => "accepted",
            RideStatus::EnRoute => "en_route",
            RideStatus::Arrived => "arrived",
            RideStatus::Started => "started",
            RideStatus::InProgress => "in_progress",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of one ride as held by the ride state store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RideProgressRecord {
    pub ride_id: String,
    pub driver_info: DriverInfo,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub eta: String,
    pub distance: String,
    pub progress: u8, // 0-100 within the current leg
    pub status: RideStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin_code: Option<String>, // Only while arrived
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fare: Option<f64>, // Only once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

impl RideProgressRecord {
    pub fn awaiting_pin(&self) -> bool {
        self.status == RideStatus::Arrived && self.pin_code.is_some()
    }
}

/// Clamp a wire progress value into `[0, 100]`.
pub fn clamp_progress(raw: f64) -> u8 {
    if raw.is_nan() {
        0
    } else {
        raw.round().clamp(0.0, 100.0) as u8
    }
}

/// Domain view of an inbound ride event, already stripped of its ride id.
#[derive(Debug, Clone, PartialEq)]
pub enum RideEvent {
    Accepted {
        driver_info: DriverInfo,
        pickup_location: String,
        dropoff_location: String,
        eta: String,
        distance: String,
        progress: f64,
    },
    EnRoute {
        eta: Option<String>,
        distance: Option<String>,
        progress: Option<f64>,
    },
    Arrived,
    Started,
    InProgress {
        eta: Option<String>,
        distance: Option<String>,
        progress: Option<f64>,
    },
    Completed {
        fare: f64,
    },
    Cancelled {
        reason: Option<String>,
    },
    LocationUpdate {
        eta: Option<String>,
        distance: Option<String>,
        progress: Option<f64>,
    },
    PinGenerated {
        pin_code: String,
    },
}

impl RideEvent {
    /// Status this event moves the ride into, if it is a status transition.
    pub fn target_status(&self) -> Option<RideStatus> {
        match self {
            RideEvent::Accepted { .. } => Some(RideStatus::Accepted),
            RideEvent::EnRoute { .. } => Some(RideStatus::EnRoute),
            RideEvent::Arrived => Some(RideStatus::Arrived),
            RideEvent::Started => Some(RideStatus::Started),
            RideEvent::InProgress { .. } => Some(RideStatus::InProgress),
            RideEvent::Completed { .. } => Some(RideStatus::Completed),
            RideEvent::Cancelled { .. } => Some(RideStatus::Cancelled),
            RideEvent::LocationUpdate { .. } | RideEvent::PinGenerated { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RideEvent::Accepted { .. } => "accepted",
            RideEvent::EnRoute { .. } => "en_route",
            RideEvent::Arrived => "arrived",
            RideEvent::Started => "started",
            RideEvent::InProgress { .. } => "in_progress",
            RideEvent::Completed { .. } => "completed",
            RideEvent::Cancelled { .. } => "cancelled",
            RideEvent::LocationUpdate { .. } => "location_update",
            RideEvent::PinGenerated { .. } => "pin_generated",
        }
    }
}
