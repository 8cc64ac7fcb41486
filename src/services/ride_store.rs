// src/services/ride_store.rs
//! Per-ride progress table. All mutation goes through [`RideStateStore::apply`],
//! which absorbs duplicated and reordered deliveries from the transport.
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing;

use crate::models::ride::{RideEvent, RideProgressRecord, RideStatus, clamp_progress};

#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// Event for a ride we hold no record for, other than `accepted`.
    UnknownRide,
    /// Status event ranked below the current status.
    Stale { current: RideStatus, attempted: RideStatus },
    /// Event that makes no sense in the current status.
    Inapplicable { current: RideStatus, event: &'static str },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::UnknownRide => write!(f, "no record for ride"),
            DropReason::Stale { current, attempted } => {
                write!(f, "stale transition {} -> {}", current, attempted)
            }
            DropReason::Inapplicable { current, event } => {
                write!(f, "{} not applicable while {}", event, current)
            }
        }
    }
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Created(RideProgressRecord),
    Updated(RideProgressRecord),
    /// Already applied; the existing record is returned unchanged.
    Duplicate(RideProgressRecord),
    /// Completed or cancelled. The record has already left the store, so this
    /// snapshot is the only copy.
    Finished(RideProgressRecord),
    Dropped(DropReason),
}

impl Transition {
    pub fn record(&self) -> Option<&RideProgressRecord> {
        match self {
            Transition::Created(r)
            | Transition::Updated(r)
            | Transition::Duplicate(r)
            | Transition::Finished(r) => Some(r),
            Transition::Dropped(_) => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct RideStateStore {
    rides: HashMap<String, RideProgressRecord>,
    pin_confirmed: HashSet<String>, // Rides whose PIN the server accepted
}

impl RideStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, ride_id: &str, event: RideEvent) -> Transition {
        let Some(current) = self.rides.get(ride_id).cloned() else {
            return self.create(ride_id, event);
        };

        let transition = match event.target_status() {
            Some(target) => self.advance(current, target, event),
            None => self.refine(current, event),
        };

        match &transition {
            Transition::Dropped(reason) => {
                tracing::debug!("Dropping event for ride {}: {}", ride_id, reason);
            }
            Transition::Duplicate(record) => {
                tracing::debug!("Duplicate event for ride {} in {}", ride_id, record.status);
            }
            Transition::Updated(record) => {
                self.rides.insert(ride_id.to_string(), record.clone());
            }
            Transition::Finished(record) => {
                self.rides.remove(ride_id);
                self.pin_confirmed.remove(ride_id);
                tracing::info!("Ride {} finished as {}", ride_id, record.status);
            }
            Transition::Created(_) => {}
        }

        transition
    }

    fn create(&mut self, ride_id: &str, event: RideEvent) -> Transition {
        let name = event.name();
        let RideEvent::Accepted {
            driver_info,
            pickup_location,
            dropoff_location,
            eta,
            distance,
            progress,
        } = event
        else {
            tracing::debug!("Dropping {} for unknown ride {}", name, ride_id);
            return Transition::Dropped(DropReason::UnknownRide);
        };

        let record = RideProgressRecord {
            ride_id: ride_id.to_string(),
            driver_info,
            pickup_location,
            dropoff_location,
            eta,
            distance,
            progress: clamp_progress(progress),
            status: RideStatus::Accepted,
            pin_code: None,
            fare: None,
            cancel_reason: None,
        };

        tracing::info!("Tracking ride {} with driver {}", ride_id, record.driver_info.name);
        self.rides.insert(ride_id.to_string(), record.clone());
        Transition::Created(record)
    }

    fn advance(
        &self,
        current: RideProgressRecord,
        target: RideStatus,
        event: RideEvent,
    ) -> Transition {
        if target == current.status {
            // A fresh `accepted` naming a different driver is a reassignment
            if let RideEvent::Accepted { driver_info, .. } = event {
                if driver_info != current.driver_info {
                    let mut next = current;
                    next.driver_info = driver_info;
                    return Transition::Updated(next);
                }
            }
            return Transition::Duplicate(current);
        }

        let event = match event {
            RideEvent::Cancelled { reason } => {
                let mut next = current;
                next.status = RideStatus::Cancelled;
                next.pin_code = None;
                next.cancel_reason = reason;
                return Transition::Finished(next);
            }
            other => other,
        };

        if target.rank() <= current.status.rank() {
            return Transition::Dropped(DropReason::Stale {
                current: current.status,
                attempted: target,
            });
        }

        let mut next = current;
        if next.status.leg() != target.leg() {
            next.progress = 0;
        }
        next.status = target;
        next.pin_code = None;

        match event {
            RideEvent::EnRoute { eta, distance, progress }
            | RideEvent::InProgress { eta, distance, progress } => {
                merge_leg(&mut next, eta, distance, progress);
                Transition::Updated(next)
            }
            RideEvent::Completed { fare } => {
                next.progress = 100;
                next.fare = Some(fare);
                Transition::Finished(next)
            }
            _ => Transition::Updated(next),
        }
    }

    fn refine(&self, current: RideProgressRecord, event: RideEvent) -> Transition {
        let mut next = current.clone();
        match event {
            RideEvent::LocationUpdate { eta, distance, progress } => {
                if !matches!(current.status, RideStatus::EnRoute | RideStatus::Arrived) {
                    return Transition::Dropped(DropReason::Inapplicable {
                        current: current.status,
                        event: "location_update",
                    });
                }
                merge_leg(&mut next, eta, distance, progress);
            }
            RideEvent::PinGenerated { pin_code } => {
                if current.status != RideStatus::Arrived {
                    return Transition::Dropped(DropReason::Inapplicable {
                        current: current.status,
                        event: "pin_generated",
                    });
                }
                // Redelivery after confirmation must not bring the PIN back
                if self.pin_confirmed.contains(&current.ride_id) {
                    return Transition::Duplicate(current);
                }
                next.pin_code = Some(pin_code);
            }
            other => {
                return Transition::Dropped(DropReason::Inapplicable {
                    current: current.status,
                    event: other.name(),
                });
            }
        }

        if next == current {
            Transition::Duplicate(current)
        } else {
            Transition::Updated(next)
        }
    }

    /// The server accepted the customer's PIN. The ride stays arrived until
    /// `ride_started`, but no longer waits on a PIN.
    pub fn confirm_pin(&mut self, ride_id: &str) -> Transition {
        let Some(current) = self.rides.get(ride_id).cloned() else {
            return Transition::Dropped(DropReason::UnknownRide);
        };
        if current.status != RideStatus::Arrived {
            return Transition::Dropped(DropReason::Inapplicable {
                current: current.status,
                event: "pin_confirmation_success",
            });
        }

        self.pin_confirmed.insert(ride_id.to_string());
        if current.pin_code.is_none() {
            return Transition::Duplicate(current);
        }

        let mut next = current;
        next.pin_code = None;
        tracing::info!("PIN confirmed for ride {}", ride_id);
        self.rides.insert(ride_id.to_string(), next.clone());
        Transition::Updated(next)
    }

    pub fn get(&self, ride_id: &str) -> Option<&RideProgressRecord> {
        self.rides.get(ride_id)
    }

    /// Snapshot of every active ride, ordered by ride id.
    pub fn all(&self) -> Vec<RideProgressRecord> {
        let mut rides: Vec<_> = self.rides.values().cloned().collect();
        rides.sort_by(|a, b| a.ride_id.cmp(&b.ride_id));
        rides
    }

    pub fn len(&self) -> usize {
        self.rides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rides.is_empty()
    }

    pub fn clear(&mut self) {
        self.rides.clear();
        self.pin_confirmed.clear();
    }
}

// Progress never goes backwards within a leg.
fn merge_leg(
    record: &mut RideProgressRecord,
    eta: Option<String>,
    distance: Option<String>,
    progress: Option<f64>,
) {
    if let Some(eta) = eta {
        record.eta = eta;
    }
    if let Some(distance) = distance {
        record.distance = distance;
    }
    if let Some(progress) = progress {
        record.progress = record.progress.max(clamp_progress(progress));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::driver::DriverInfo;

    fn driver(name: &str) -> DriverInfo {
        DriverInfo {
            id: format!("drv-{}", name.to_lowercase()),
            name: name.to_string(),
            phone: "+233200000000".to_string(),
            vehicle_plate: "GR 1234-21".to_string(),
            vehicle_model: "Toyota Corolla".to_string(),
            rating: 4.8,
            photo_url: None,
        }
    }

    fn accepted(name: &str, eta: &str) -> RideEvent {
        RideEvent::Accepted {
            driver_info: driver(name),
            pickup_location: "Osu".to_string(),
            dropoff_location: "Kotoka Airport".to_string(),
            eta: eta.to_string(),
            distance: "2.1 km".to_string(),
            progress: 0.0,
        }
    }

    fn en_route(eta: &str, progress: f64) -> RideEvent {
        RideEvent::EnRoute {
            eta: Some(eta.to_string()),
            distance: None,
            progress: Some(progress),
        }
    }

    fn location(progress: f64) -> RideEvent {
        RideEvent::LocationUpdate {
            eta: Some("1 min".to_string()),
            distance: Some("300 m".to_string()),
            progress: Some(progress),
        }
    }

    fn arrived_with_pin(store: &mut RideStateStore) {
        store.apply("r1", accepted("John", "5 min"));
        store.apply("r1", RideEvent::Arrived);
        store.apply("r1", RideEvent::PinGenerated { pin_code: "1234".to_string() });
    }

    #[test]
    fn test_accepted_then_en_route_keeps_driver() {
        let mut store = RideStateStore::new();
        assert!(matches!(store.apply("r1", accepted("John", "5 min")), Transition::Created(_)));

        let transition = store.apply("r1", en_route("3 min", 40.0));
        let Transition::Updated(record) = transition else {
            panic!("expected update, got {:?}", transition);
        };
        assert_eq!(record.status, RideStatus::EnRoute);
        assert_eq!(record.eta, "3 min");
        assert_eq!(record.progress, 40);
        assert_eq!(record.driver_info.name, "John");
        assert_eq!(store.get("r1"), Some(&record));
    }

    #[test]
    fn test_event_for_unknown_ride_is_dropped() {
        let mut store = RideStateStore::new();
        assert_eq!(
            store.apply("r9", RideEvent::Arrived),
            Transition::Dropped(DropReason::UnknownRide)
        );
        assert_eq!(
            store.apply("r9", RideEvent::Cancelled { reason: None }),
            Transition::Dropped(DropReason::UnknownRide)
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut store = RideStateStore::new();
        store.apply("r1", accepted("John", "5 min"));
        let first = store.apply("r1", en_route("3 min", 40.0));
        let second = store.apply("r1", en_route("3 min", 40.0));

        assert_eq!(second, Transition::Duplicate(first.record().unwrap().clone()));
        assert_eq!(store.get("r1"), first.record());

        let again = store.apply("r1", accepted("John", "5 min"));
        assert!(matches!(again, Transition::Dropped(DropReason::Stale { .. })));
    }

    #[test]
    fn test_duplicate_accepted_returns_existing() {
        let mut store = RideStateStore::new();
        let created = store.apply("r1", accepted("John", "5 min"));
        let dup = store.apply("r1", accepted("John", "5 min"));
        assert_eq!(dup, Transition::Duplicate(created.record().unwrap().clone()));
    }

    #[test]
    fn test_reassignment_replaces_driver() {
        let mut store = RideStateStore::new();
        store.apply("r1", accepted("John", "5 min"));
        let transition = store.apply("r1", accepted("Ama", "7 min"));
        assert!(matches!(transition, Transition::Updated(ref r) if r.driver_info.name == "Ama"));
    }

    #[test]
    fn test_status_never_regresses_under_reordering() {
        let events = || {
            vec![
                en_route("3 min", 40.0),
                RideEvent::Arrived,
                RideEvent::Started,
                RideEvent::InProgress { eta: None, distance: None, progress: Some(10.0) },
            ]
        };

        for order in permutations(4) {
            let mut store = RideStateStore::new();
            store.apply("r1", accepted("John", "5 min"));
            let mut highest = RideStatus::Accepted.rank();
            let all = events();
            for idx in order {
                store.apply("r1", all[idx].clone());
                let status = store.get("r1").unwrap().status;
                assert!(status.rank() >= highest, "regressed to {}", status);
                highest = status.rank();
            }
            assert_eq!(store.get("r1").unwrap().status, RideStatus::InProgress);
        }
    }

    fn permutations(n: usize) -> Vec<Vec<usize>> {
        if n == 0 {
            return vec![vec![]];
        }
        let mut out = Vec::new();
        for perm in permutations(n - 1) {
            for pos in 0..=perm.len() {
                let mut next = perm.clone();
                next.insert(pos, n - 1);
                out.push(next);
            }
        }
        out
    }

    #[test]
    fn test_forward_skip_is_allowed() {
        let mut store = RideStateStore::new();
        store.apply("r1", accepted("John", "5 min"));
        assert!(matches!(store.apply("r1", RideEvent::Arrived), Transition::Updated(_)));
        assert!(matches!(
            store.apply("r1", en_route("3 min", 40.0)),
            Transition::Dropped(DropReason::Stale { .. })
        ));
    }

    #[test]
    fn test_location_update_refines_without_status_change() {
        let mut store = RideStateStore::new();
        store.apply("r1", accepted("John", "5 min"));
        store.apply("r1", en_route("3 min", 40.0));

        let Transition::Updated(record) = store.apply("r1", location(70.0)) else {
            panic!("expected update");
        };
        assert_eq!(record.status, RideStatus::EnRoute);
        assert_eq!(record.eta, "1 min");
        assert_eq!(record.distance, "300 m");
        assert_eq!(record.progress, 70);

        // A late, lower reading never moves progress backwards
        let Transition::Duplicate(record) = store.apply("r1", location(55.0)) else {
            panic!("expected duplicate");
        };
        assert_eq!(record.progress, 70);
    }

    #[test]
    fn test_location_update_outside_pickup_leg_is_dropped() {
        let mut store = RideStateStore::new();
        store.apply("r1", accepted("John", "5 min"));
        assert!(matches!(
            store.apply("r1", location(10.0)),
            Transition::Dropped(DropReason::Inapplicable { current: RideStatus::Accepted, .. })
        ));

        store.apply("r1", RideEvent::Started);
        assert!(matches!(
            store.apply("r1", location(10.0)),
            Transition::Dropped(DropReason::Inapplicable { .. })
        ));
    }

    #[test]
    fn test_location_update_after_completion_does_not_recreate() {
        let mut store = RideStateStore::new();
        store.apply("r1", accepted("John", "5 min"));
        store.apply("r1", RideEvent::Completed { fare: 150.0 });

        assert_eq!(store.apply("r1", location(90.0)), Transition::Dropped(DropReason::UnknownRide));
        assert!(store.get("r1").is_none());
    }

    #[test]
    fn test_progress_resets_on_destination_leg() {
        let mut store = RideStateStore::new();
        store.apply("r1", accepted("John", "5 min"));
        store.apply("r1", en_route("1 min", 95.0));
        let Transition::Updated(record) = store.apply("r1", RideEvent::Started) else {
            panic!("expected update");
        };
        assert_eq!(record.progress, 0);

        let Transition::Updated(record) = store.apply(
            "r1",
            RideEvent::InProgress { eta: Some("12 min".to_string()), distance: None, progress: Some(15.0) },
        ) else {
            panic!("expected update");
        };
        assert_eq!(record.progress, 15);
        assert_eq!(record.eta, "12 min");
    }

    #[test]
    fn test_pin_only_while_arrived() {
        let mut store = RideStateStore::new();
        store.apply("r1", accepted("John", "5 min"));
        assert!(matches!(
            store.apply("r1", RideEvent::PinGenerated { pin_code: "1234".to_string() }),
            Transition::Dropped(DropReason::Inapplicable { .. })
        ));

        store.apply("r1", RideEvent::Arrived);
        let Transition::Updated(record) =
            store.apply("r1", RideEvent::PinGenerated { pin_code: "1234".to_string() })
        else {
            panic!("expected update");
        };
        assert!(record.awaiting_pin());
        assert_eq!(record.status, RideStatus::Arrived);
    }

    #[test]
    fn test_pin_cleared_when_leaving_arrived() {
        let mut store = RideStateStore::new();
        arrived_with_pin(&mut store);
        let Transition::Updated(record) = store.apply("r1", RideEvent::Started) else {
            panic!("expected update");
        };
        assert_eq!(record.pin_code, None);
    }

    #[test]
    fn test_confirmed_pin_stays_cleared() {
        let mut store = RideStateStore::new();
        store.apply("r1", accepted("John", "5 min"));
        assert!(matches!(
            store.confirm_pin("r1"),
            Transition::Dropped(DropReason::Inapplicable { current: RideStatus::Accepted, .. })
        ));
        assert_eq!(store.confirm_pin("r9"), Transition::Dropped(DropReason::UnknownRide));

        store.apply("r1", RideEvent::Arrived);
        store.apply("r1", RideEvent::PinGenerated { pin_code: "1234".to_string() });
        let Transition::Updated(record) = store.confirm_pin("r1") else {
            panic!("expected update");
        };
        assert_eq!(record.status, RideStatus::Arrived);
        assert!(!record.awaiting_pin());

        assert!(matches!(
            store.apply("r1", RideEvent::PinGenerated { pin_code: "1234".to_string() }),
            Transition::Duplicate(ref r) if r.pin_code.is_none()
        ));
        assert!(matches!(store.confirm_pin("r1"), Transition::Duplicate(_)));
    }

    #[test]
    fn test_cancel_after_pin_removes_record() {
        let mut store = RideStateStore::new();
        arrived_with_pin(&mut store);

        let transition = store.apply("r1", RideEvent::Cancelled { reason: Some("No show".to_string()) });
        let Transition::Finished(record) = transition else {
            panic!("expected finished");
        };
        assert_eq!(record.status, RideStatus::Cancelled);
        assert_eq!(record.pin_code, None);
        assert_eq!(record.cancel_reason.as_deref(), Some("No show"));
        assert!(store.get("r1").is_none());
    }

    #[test]
    fn test_completed_returns_final_snapshot() {
        let mut store = RideStateStore::new();
        store.apply("r1", accepted("John", "5 min"));
        store.apply("r1", RideEvent::Started);

        let Transition::Finished(record) = store.apply("r1", RideEvent::Completed { fare: 150.0 }) else {
            panic!("expected finished");
        };
        assert_eq!(record.status, RideStatus::Completed);
        assert_eq!(record.fare, Some(150.0));
        assert!(store.get("r1").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_all_is_sorted_and_clear_empties() {
        let mut store = RideStateStore::new();
        store.apply("r2", accepted("Ama", "4 min"));
        store.apply("r1", accepted("John", "5 min"));
        let ids: Vec<_> = store.all().into_iter().map(|r| r.ride_id).collect();
        assert_eq!(ids, vec!["r1", "r2"]);

        store.clear();
        assert_eq!(store.len(), 0);
    }
}
