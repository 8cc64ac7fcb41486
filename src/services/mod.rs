// src/services/mod.rs
pub mod action_gateway;
pub mod callback_registry;
pub mod connection_service;
pub mod messaging_service;
pub mod push_service;
pub mod ride_store;
pub mod ride_sync_service;
pub mod storage_service;

pub use action_gateway::{ActionDispatch, ActionGateway, GatewayConfig};
pub use callback_registry::{CallbackCategory, CallbackPayload, CallbackRegistry};
pub use connection_service::{ConnectionConfig, ConnectionManager};
pub use messaging_service::{
    DispatcherConfig, FcmNotificationSink, LoggingNotificationSink, NotificationDispatcher, NotificationSink,
};
pub use push_service::{PushConfig, PushRegistrationService};
pub use ride_store::{RideStateStore, Transition};
pub use ride_sync_service::RideSyncService;
pub use storage_service::StorageService;
