// src/state.rs
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    errors::{SyncError, SyncResult},
    services::{
        action_gateway::{ActionGateway, GatewayConfig},
        connection_service::{ConnectionConfig, ConnectionManager},
        messaging_service::{
            DispatcherConfig, FcmConfig, FcmNotificationSink, LoggingNotificationSink, NotificationDispatcher,
            NotificationSink,
        },
        push_service::{
            ConfiguredTokenProvider, HttpRegistrationMirror, PushConfig, PushRegistrationService, RegistrationMirror,
        },
        ride_sync_service::RideSyncService,
        storage_service::StorageService,
    },
    transport::WsTransport,
};

pub struct AppState {
    pub storage: StorageService,
    pub connection: Arc<ConnectionManager>,
    pub push_service: Arc<PushRegistrationService>,
    pub ride_sync: Arc<RideSyncService>,
    pub config: AppConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub socket_url: String,
    pub api_base_url: Option<String>,
    pub redis_url: Option<String>,
    pub fcm_server_key: Option<String>,
    pub device_push_token: Option<String>,
    pub push_platform: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub push_refresh_interval: Duration,
    pub action_ack_timeout: Duration,
    pub fare_currency: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let connection = ConnectionConfig::default();
        let push = PushConfig::default();
        Self {
            socket_url: "ws://127.0.0.1:3001/socket".to_string(),
            api_base_url: None,
            redis_url: None,
            fcm_server_key: None,
            device_push_token: None,
            push_platform: "android".to_string(),
            max_reconnect_attempts: connection.max_reconnect_attempts,
            reconnect_base_delay: connection.reconnect_base_delay,
            push_refresh_interval: push.refresh_interval,
            action_ack_timeout: GatewayConfig::default().ack_timeout,
            fare_currency: DispatcherConfig::default().currency,
        }
    }
}

impl AppConfig {
    /// Read the configuration from the environment, falling back to defaults.
    pub fn from_env() -> SyncResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            socket_url: env::var("SOCKET_URL").unwrap_or(defaults.socket_url),
            api_base_url: optional_var("API_BASE_URL"),
            redis_url: optional_var("REDIS_URL"),
            fcm_server_key: optional_var("FCM_SERVER_KEY"),
            device_push_token: optional_var("DEVICE_PUSH_TOKEN"),
            push_platform: env::var("PUSH_PLATFORM").unwrap_or(defaults.push_platform),
            max_reconnect_attempts: parsed_var("MAX_RECONNECT_ATTEMPTS")?.unwrap_or(defaults.max_reconnect_attempts),
            reconnect_base_delay: parsed_var("RECONNECT_BASE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_base_delay),
            push_refresh_interval: parsed_var("PUSH_REFRESH_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.push_refresh_interval),
            action_ack_timeout: parsed_var("ACTION_ACK_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.action_ack_timeout),
            fare_currency: env::var("FARE_CURRENCY").unwrap_or(defaults.fare_currency),
        })
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_base_delay: self.reconnect_base_delay,
        }
    }

    pub fn push(&self) -> PushConfig {
        PushConfig {
            refresh_interval: self.push_refresh_interval,
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T: FromStr>(name: &str) -> SyncResult<Option<T>> {
    match optional_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SyncError::InvalidConfiguration(format!("{} has an invalid value: {}", name, raw))),
        None => Ok(None),
    }
}

impl AppState {
    pub fn new(config: AppConfig) -> SyncResult<Self> {
        let storage = match &config.redis_url {
            Some(redis_url) => StorageService::new_redis(redis_url)?,
            None => {
                tracing::warn!("REDIS_URL not set, credentials are kept in memory");
                StorageService::new_memory()
            }
        };

        let transport = Arc::new(WsTransport::new(config.socket_url.clone()));
        let connection = Arc::new(ConnectionManager::new(transport, storage.clone(), config.connection()));

        let sink: Arc<dyn NotificationSink> = match (&config.fcm_server_key, &config.device_push_token) {
            (Some(server_key), Some(device_token)) => {
                Arc::new(FcmNotificationSink::new(FcmConfig::new(server_key, device_token)))
            }
            _ => {
                tracing::warn!("FCM_SERVER_KEY or DEVICE_PUSH_TOKEN not set, using logging notification sink");
                Arc::new(LoggingNotificationSink::new())
            }
        };
        let dispatcher = NotificationDispatcher::new(
            sink,
            DispatcherConfig {
                currency: config.fare_currency.clone(),
            },
        );

        let gateway = ActionGateway::new(
            connection.clone(),
            GatewayConfig {
                ack_timeout: config.action_ack_timeout,
            },
        );

        let mirror: Option<Arc<dyn RegistrationMirror>> = match &config.api_base_url {
            Some(api_base_url) => Some(Arc::new(HttpRegistrationMirror::new(api_base_url))),
            None => {
                tracing::warn!("API_BASE_URL not set, push registrations are not mirrored");
                None
            }
        };
        let push_service = Arc::new(PushRegistrationService::new(
            storage.clone(),
            Arc::new(ConfiguredTokenProvider::new(
                config.device_push_token.clone(),
                config.push_platform.clone(),
            )),
            mirror,
            config.push(),
        ));

        let ride_sync = Arc::new(RideSyncService::new(
            connection.clone(),
            dispatcher,
            gateway,
            Some(push_service.clone()),
        ));

        Ok(Self {
            storage,
            connection,
            push_service,
            ride_sync,
            config,
        })
    }
}
