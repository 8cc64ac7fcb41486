// src/models/driver.rs
use serde::{Deserialize, Serialize};

/// Driver attached to a ride once it has been accepted.
///
/// Only ever replaced wholesale by a fresh `ride_accepted` payload.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverInfo {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub vehicle_plate: String,
    #[serde(default)]
    pub vehicle_model: String,
    #[serde(default)]
    pub rating: f32, // Average rating (0-5)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl DriverInfo {
    /// "Toyota Corolla (GR 1234-21)", or whichever half is known.
    pub fn vehicle_label(&self) -> Option<String> {
        match (self.vehicle_model.is_empty(), self.vehicle_plate.is_empty()) {
            (false, false) => Some(format!("{} ({})", self.vehicle_model, self.vehicle_plate)),
            (false, true) => Some(self.vehicle_model.clone()),
            (true, false) => Some(self.vehicle_plate.clone()),
            (true, true) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_driver() {
        let driver: DriverInfo =
            serde_json::from_value(serde_json::json!({"id": "drv-1", "name": "John"})).unwrap();
        assert_eq!(driver.name, "John");
        assert!(driver.photo_url.is_none());
        assert_eq!(driver.vehicle_label(), None);
    }

    #[test]
    fn test_driver_without_id() {
        let driver: DriverInfo = serde_json::from_value(serde_json::json!({"name": "John"})).unwrap();
        assert_eq!(driver.name, "John");
        assert!(driver.id.is_empty());

        assert!(serde_json::from_value::<DriverInfo>(serde_json::json!({"id": "drv-1"})).is_err());
    }

    #[test]
    fn test_vehicle_label() {
        let driver: DriverInfo = serde_json::from_value(serde_json::json!({
            "id": "drv-1",
            "name": "Kwame",
            "vehiclePlate": "GR 1234-21",
            "vehicleModel": "Toyota Corolla"
        }))
        .unwrap();
        assert_eq!(driver.vehicle_label().as_deref(), Some("Toyota Corolla (GR 1234-21)"));
    }
}
