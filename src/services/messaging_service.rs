// src/services/messaging_service.rs
//! On-device ride notifications: rendering plus the one-notification-per-ride
//! bookkeeping in front of a [`NotificationSink`].
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::Mutex;
use tracing;

use crate::{
    errors::{SyncError, SyncResult},
    models::{
        notification::{
            NotificationAction, NotificationChannel, NotificationHandle, NotificationPriority,
            RenderedNotification,
        },
        ride::{RideProgressRecord, RideStatus},
    },
    utils::{IdGenerator, IdType},
};

#[derive(Debug, Clone)]
pub struct FcmConfig {
    pub fcm_server_key: String,
    pub fcm_url: String,
    pub device_token: String,
}

impl FcmConfig {
    pub fn new(fcm_server_key: impl Into<String>, device_token: impl Into<String>) -> Self {
        Self {
            fcm_server_key: fcm_server_key.into(),
            fcm_url: "https://fcm.googleapis.com/fcm/send".to_string(),
            device_token: device_token.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub currency: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            currency: "GHS".to_string(),
        }
    }
}

/// The on-device notification surface.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Show a notification and return its id.
    async fn display(&self, notification: &RenderedNotification) -> SyncResult<String>;

    /// Replace a visible notification. Sinks without a native update fall back
    /// to cancel-then-display.
    async fn update(&self, notification_id: &str, notification: &RenderedNotification) -> SyncResult<String> {
        self.cancel(notification_id).await?;
        self.display(notification).await
    }

    async fn cancel(&self, notification_id: &str) -> SyncResult<()>;
}

/// Pushes notifications to this device through FCM. Every ride uses its own
/// `tag`, so a newer message replaces the older one on the device.
pub struct FcmNotificationSink {
    config: FcmConfig,
    client: reqwest::Client,
}

impl FcmNotificationSink {
    pub fn new(config: FcmConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn tag(ride_id: &str) -> String {
        format!("ride-{}", ride_id)
    }

    async fn post(&self, message: serde_json::Value) -> SyncResult<()> {
        if self.config.device_token.is_empty() {
            return Err(SyncError::FcmInvalidToken("Empty device token".to_string()));
        }

        let response = self
            .client
            .post(&self.config.fcm_url)
            .header("Authorization", format!("key={}", self.config.fcm_server_key))
            .header("Content-Type", "application/json")
            .json(&message)
            .send()
            .await
            .map_err(|e| SyncError::NetworkConnection(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("FCM request failed: {}", error_text);
            return Err(SyncError::FcmDelivery(error_text));
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationSink for FcmNotificationSink {
    async fn display(&self, notification: &RenderedNotification) -> SyncResult<String> {
        let tag = Self::tag(&notification.ride_id);
        let actions: Vec<&str> = notification.actions.iter().map(|a| a.as_str()).collect();
        let labels: Vec<&str> = notification.actions.iter().map(|a| a.label()).collect();

        tracing::info!("Sending FCM notification {} for ride {}", tag, notification.ride_id);
        self.post(json!({
            "to": self.config.device_token,
            "notification": {
                "title": notification.title,
                "body": notification.body,
                "tag": tag,
                "android_channel_id": notification.channel.id(),
                "sticky": notification.sticky,
                "sound": "default"
            },
            "data": {
                "type": "ride_notification",
                "rideId": notification.ride_id,
                "actions": actions.join(","),
                "actionLabels": labels.join(","),
                "autoDismiss": notification.auto_dismiss.to_string(),
            },
            "priority": match notification.priority {
                NotificationPriority::High => "high",
                NotificationPriority::Normal => "normal",
            }
        }))
        .await?;

        tracing::debug!("FCM notification sent successfully");
        Ok(tag)
    }

    // Same tag replaces in place
    async fn update(&self, _notification_id: &str, notification: &RenderedNotification) -> SyncResult<String> {
        self.display(notification).await
    }

    async fn cancel(&self, notification_id: &str) -> SyncResult<()> {
        tracing::info!("Dismissing FCM notification {}", notification_id);
        self.post(json!({
            "to": self.config.device_token,
            "data": {
                "type": "dismiss_notification",
                "tag": notification_id,
            },
            "priority": "high"
        }))
        .await
    }
}

/// Development sink: logs every call and remembers what would be on screen.
#[derive(Debug, Default)]
pub struct LoggingNotificationSink {
    visible: StdMutex<HashMap<String, RenderedNotification>>,
    displays: AtomicUsize,
    cancels: AtomicUsize,
}

impl LoggingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visible(&self) -> Vec<RenderedNotification> {
        self.visible
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Visible notifications for one ride.
    pub fn visible_for(&self, ride_id: &str) -> Vec<RenderedNotification> {
        self.visible().into_iter().filter(|n| n.ride_id == ride_id).collect()
    }

    pub fn display_count(&self) -> usize {
        self.displays.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn display(&self, notification: &RenderedNotification) -> SyncResult<String> {
        let id = IdGenerator::generate(IdType::Notification);
        tracing::info!(
            "[MOCK] Would display {} for ride {}: {} - {}",
            id,
            notification.ride_id,
            notification.title,
            notification.body
        );
        self.displays.fetch_add(1, Ordering::SeqCst);
        self.visible
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), notification.clone());
        Ok(id)
    }

    async fn cancel(&self, notification_id: &str) -> SyncResult<()> {
        tracing::info!("[MOCK] Would cancel {}", notification_id);
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.visible
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(notification_id);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Displayed(String),
    Replaced(String),
    Unchanged,
    Finished, // Final alert shown, handle released
}

pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    config: DispatcherConfig,
    handles: Mutex<HashMap<String, NotificationHandle>>,
}

impl NotificationDispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>, config: DispatcherConfig) -> Self {
        Self {
            sink,
            config,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Deterministic rendering of a ride snapshot.
    pub fn render(&self, record: &RideProgressRecord) -> RenderedNotification {
        if record.awaiting_pin() {
            return self.render_pin(record);
        }

        let driver = &record.driver_info.name;
        let (title, body) = match record.status {
            RideStatus::Accepted => (
                "Driver assigned".to_string(),
                match record.driver_info.vehicle_label() {
                    Some(vehicle) => format!("{} accepted your ride in a {}. ETA {}", driver, vehicle, record.eta),
                    None => format!("{} accepted your ride. ETA {}", driver, record.eta),
                },
            ),
            RideStatus::EnRoute => (
                "Driver on the way".to_string(),
                format!("{} is {} away. ETA {}", driver, record.distance, record.eta),
            ),
            RideStatus::Arrived => (
                "Driver has arrived".to_string(),
                format!("{} is waiting at {}", driver, record.pickup_location),
            ),
            RideStatus::Started => (
                "Trip started".to_string(),
                format!("Heading to {}", record.dropoff_location),
            ),
            RideStatus::InProgress => (
                "On the way to your destination".to_string(),
                format!("{} to {}. ETA {}", record.distance, record.dropoff_location, record.eta),
            ),
            RideStatus::Completed => (
                "Ride completed".to_string(),
                match record.fare {
                    Some(fare) => format!(
                        "You have arrived at {}. Total fare: {}",
                        record.dropoff_location,
                        format_fare(&self.config.currency, fare)
                    ),
                    None => format!("You have arrived at {}", record.dropoff_location),
                },
            ),
            RideStatus::Cancelled => (
                "Ride cancelled".to_string(),
                record
                    .cancel_reason
                    .clone()
                    .unwrap_or_else(|| "Your ride has been cancelled".to_string()),
            ),
        };

        let (channel, priority) = match record.status {
            RideStatus::Completed => (NotificationChannel::RideCompleted, NotificationPriority::Normal),
            RideStatus::Cancelled => (NotificationChannel::RideCancelled, NotificationPriority::High),
            _ => (NotificationChannel::RideProgress, NotificationPriority::Normal),
        };
        let terminal = record.status.is_terminal();

        RenderedNotification {
            ride_id: record.ride_id.clone(),
            title,
            body,
            actions: actions_for(record.status),
            channel,
            priority,
            sticky: false,
            auto_dismiss: terminal,
        }
    }

    fn render_pin(&self, record: &RideProgressRecord) -> RenderedNotification {
        RenderedNotification {
            ride_id: record.ride_id.clone(),
            title: "Confirm your ride".to_string(),
            body: format!(
                "Share PIN {} with {} to start your trip",
                record.pin_code.as_deref().unwrap_or_default(),
                record.driver_info.name
            ),
            actions: vec![NotificationAction::ConfirmPin, NotificationAction::Call],
            channel: NotificationChannel::PinConfirmation,
            priority: NotificationPriority::High,
            sticky: true,
            auto_dismiss: false,
        }
    }

    /// Show or replace the notification for a ride. Terminal records go
    /// through the final-alert path and release the handle.
    pub async fn dispatch(&self, record: &RideProgressRecord) -> SyncResult<DispatchOutcome> {
        if record.status.is_terminal() {
            return self.finish(record).await;
        }

        let rendered = self.render(record);
        let mut handles = self.handles.lock().await;

        let previous = handles
            .get(&record.ride_id)
            .map(|h| (h.rendered == rendered, h.notification_id.clone()));
        let previous_id = match previous {
            None => {
                let notification_id = self.sink.display(&rendered).await?;
                handles.insert(
                    record.ride_id.clone(),
                    NotificationHandle {
                        ride_id: record.ride_id.clone(),
                        notification_id: notification_id.clone(),
                        rendered,
                    },
                );
                return Ok(DispatchOutcome::Displayed(notification_id));
            }
            Some((true, _)) => return Ok(DispatchOutcome::Unchanged),
            Some((false, previous_id)) => previous_id,
        };

        match self.sink.update(&previous_id, &rendered).await {
            Ok(notification_id) => {
                handles.insert(
                    record.ride_id.clone(),
                    NotificationHandle {
                        ride_id: record.ride_id.clone(),
                        notification_id: notification_id.clone(),
                        rendered,
                    },
                );
                Ok(DispatchOutcome::Replaced(notification_id))
            }
            Err(e) => {
                // Keep the old handle: the next dispatch retries against it
                // instead of stacking a second notification for the ride
                tracing::warn!(
                    "Notification update for ride {} failed, keeping {}",
                    record.ride_id,
                    previous_id
                );
                Err(e)
            }
        }
    }

    async fn finish(&self, record: &RideProgressRecord) -> SyncResult<DispatchOutcome> {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.remove(&record.ride_id) {
            if let Err(e) = self.sink.cancel(&handle.notification_id).await {
                tracing::warn!("Failed to dismiss notification for ride {}: {}", record.ride_id, e);
            }
        }

        let rendered = self.render(record);
        self.sink.display(&rendered).await?;
        tracing::info!("Final {} notification shown for ride {}", record.status, record.ride_id);
        Ok(DispatchOutcome::Finished)
    }

    pub async fn handle(&self, ride_id: &str) -> Option<NotificationHandle> {
        self.handles.lock().await.get(ride_id).cloned()
    }

    pub async fn live_count(&self) -> usize {
        self.handles.lock().await.len()
    }

    /// Cancel every live notification.
    pub async fn clear(&self) {
        let handles: Vec<NotificationHandle> = self.handles.lock().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            if let Err(e) = self.sink.cancel(&handle.notification_id).await {
                tracing::warn!("Failed to dismiss notification for ride {}: {}", handle.ride_id, e);
            }
        }
    }
}

fn actions_for(status: RideStatus) -> Vec<NotificationAction> {
    let mut actions = vec![NotificationAction::Call];
    if status.is_active() {
        actions.push(NotificationAction::Message);
    }
    if !status.is_terminal() {
        actions.push(NotificationAction::Cancel);
    }
    actions
}

/// "GHS 150" for whole amounts, "GHS 150.50" otherwise.
pub fn format_fare(currency: &str, fare: f64) -> String {
    if fare.fract() == 0.0 {
        format!("{} {:.0}", currency, fare)
    } else {
        format!("{} {:.2}", currency, fare)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::driver::DriverInfo;

    fn record(status: RideStatus) -> RideProgressRecord {
        RideProgressRecord {
            ride_id: "r1".to_string(),
            driver_info: DriverInfo {
                id: "drv-1".to_string(),
                name: "John".to_string(),
                phone: "+233200000000".to_string(),
                vehicle_plate: "GR 1234-21".to_string(),
                vehicle_model: "Toyota Corolla".to_string(),
                rating: 4.8,
                photo_url: None,
            },
            pickup_location: "Osu".to_string(),
            dropoff_location: "Kotoka Airport".to_string(),
            eta: "5 min".to_string(),
            distance: "2.1 km".to_string(),
            progress: 0,
            status,
            pin_code: None,
            fare: None,
            cancel_reason: None,
        }
    }

    fn dispatcher() -> (Arc<LoggingNotificationSink>, NotificationDispatcher) {
        let sink = Arc::new(LoggingNotificationSink::new());
        let dispatcher = NotificationDispatcher::new(sink.clone(), DispatcherConfig::default());
        (sink, dispatcher)
    }

    #[test]
    fn test_action_sets_per_status() {
        use NotificationAction::{Call, Cancel, Message};

        assert_eq!(actions_for(RideStatus::Accepted), vec![Call, Cancel]);
        for status in [RideStatus::EnRoute, RideStatus::Arrived, RideStatus::Started, RideStatus::InProgress] {
            assert_eq!(actions_for(status), vec![Call, Message, Cancel]);
        }
        assert_eq!(actions_for(RideStatus::Completed), vec![Call]);
        assert_eq!(actions_for(RideStatus::Cancelled), vec![Call]);
    }

    #[test]
    fn test_render_is_deterministic() {
        let (_, dispatcher) = dispatcher();
        let record = record(RideStatus::EnRoute);
        assert_eq!(dispatcher.render(&record), dispatcher.render(&record.clone()));
        assert_eq!(dispatcher.render(&record).body, "John is 2.1 km away. ETA 5 min");
    }

    #[test]
    fn test_pin_path() {
        let (_, dispatcher) = dispatcher();
        let mut record = record(RideStatus::Arrived);
        record.pin_code = Some("1234".to_string());

        let rendered = dispatcher.render(&record);
        assert_eq!(rendered.title, "Confirm your ride");
        assert!(rendered.body.contains("1234"));
        assert_eq!(rendered.actions, vec![NotificationAction::ConfirmPin, NotificationAction::Call]);
        assert!(rendered.sticky);
        assert_eq!(rendered.priority, NotificationPriority::High);
    }

    #[test]
    fn test_fare_formatting() {
        assert_eq!(format_fare("GHS", 150.0), "GHS 150");
        assert_eq!(format_fare("GHS", 42.5), "GHS 42.50");
    }

    #[tokio::test]
    async fn test_identical_dispatch_is_unchanged() {
        let (sink, dispatcher) = dispatcher();
        let record = record(RideStatus::Accepted);

        assert!(matches!(dispatcher.dispatch(&record).await.unwrap(), DispatchOutcome::Displayed(_)));
        assert_eq!(dispatcher.dispatch(&record).await.unwrap(), DispatchOutcome::Unchanged);
        assert_eq!(sink.display_count(), 1);
        assert_eq!(sink.visible_for("r1").len(), 1);
    }

    #[tokio::test]
    async fn test_update_replaces_in_place() {
        let (sink, dispatcher) = dispatcher();
        dispatcher.dispatch(&record(RideStatus::Accepted)).await.unwrap();
        let outcome = dispatcher.dispatch(&record(RideStatus::EnRoute)).await.unwrap();

        assert!(matches!(outcome, DispatchOutcome::Replaced(_)));
        let visible = sink.visible_for("r1");
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].title, "Driver on the way");
        assert_eq!(sink.cancel_count(), 1);
    }

    #[tokio::test]
    async fn test_completed_shows_final_fare() {
        let (sink, dispatcher) = dispatcher();
        dispatcher.dispatch(&record(RideStatus::InProgress)).await.unwrap();

        let mut done = record(RideStatus::Completed);
        done.fare = Some(150.0);
        done.progress = 100;
        assert_eq!(dispatcher.dispatch(&done).await.unwrap(), DispatchOutcome::Finished);

        assert!(dispatcher.handle("r1").await.is_none());
        let visible = sink.visible_for("r1");
        assert_eq!(visible.len(), 1);
        assert!(visible[0].body.contains("150"));
        assert!(!visible[0].sticky);
        assert!(visible[0].auto_dismiss);
    }

    #[tokio::test]
    async fn test_cancelled_replaces_pin_notification() {
        let (sink, dispatcher) = dispatcher();
        let mut arrived = record(RideStatus::Arrived);
        arrived.pin_code = Some("1234".to_string());
        dispatcher.dispatch(&arrived).await.unwrap();

        let mut cancelled = record(RideStatus::Cancelled);
        cancelled.cancel_reason = Some("Driver unavailable".to_string());
        dispatcher.dispatch(&cancelled).await.unwrap();

        assert_eq!(dispatcher.live_count().await, 0);
        let visible = sink.visible_for("r1");
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].title, "Ride cancelled");
        assert!(!visible[0].body.contains("1234"));
    }

    #[tokio::test]
    async fn test_clear_cancels_live_notifications() {
        let (sink, dispatcher) = dispatcher();
        let mut other = record(RideStatus::EnRoute);
        other.ride_id = "r2".to_string();
        dispatcher.dispatch(&record(RideStatus::Accepted)).await.unwrap();
        dispatcher.dispatch(&other).await.unwrap();

        dispatcher.clear().await;
        assert_eq!(dispatcher.live_count().await, 0);
        assert!(sink.visible().is_empty());
    }

    /// Sink whose next `cancel` fails, leaving the old notification on screen.
    #[derive(Default)]
    struct FlakySink {
        inner: LoggingNotificationSink,
        fail_next_cancel: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl NotificationSink for FlakySink {
        async fn display(&self, notification: &RenderedNotification) -> SyncResult<String> {
            self.inner.display(notification).await
        }

        async fn cancel(&self, notification_id: &str) -> SyncResult<()> {
            if self.fail_next_cancel.swap(false, Ordering::SeqCst) {
                return Err(SyncError::NetworkTimeout);
            }
            self.inner.cancel(notification_id).await
        }
    }

    #[tokio::test]
    async fn test_failed_update_keeps_single_notification() {
        let sink = Arc::new(FlakySink::default());
        let dispatcher = NotificationDispatcher::new(sink.clone(), DispatcherConfig::default());
        dispatcher.dispatch(&record(RideStatus::Accepted)).await.unwrap();
        let first = dispatcher.handle("r1").await.unwrap();

        sink.fail_next_cancel.store(true, Ordering::SeqCst);
        assert!(dispatcher.dispatch(&record(RideStatus::EnRoute)).await.is_err());
        assert_eq!(dispatcher.handle("r1").await, Some(first));
        assert_eq!(sink.inner.visible_for("r1").len(), 1);

        let outcome = dispatcher.dispatch(&record(RideStatus::EnRoute)).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Replaced(_)));
        let visible = sink.inner.visible_for("r1");
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].title, "Driver on the way");
    }

    #[tokio::test]
    async fn test_fcm_sink_rejects_missing_device_token() {
        let sink = FcmNotificationSink::new(FcmConfig::new("server-key", ""));
        let err = sink.display(&dispatcher().1.render(&record(RideStatus::Accepted))).await.unwrap_err();
        assert!(matches!(err, SyncError::FcmInvalidToken(_)));
    }
}
