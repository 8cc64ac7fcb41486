// src/services/push_service.rs
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing;

use crate::{
    errors::{SyncError, SyncResult},
    models::push::{IssuedPushToken, PushRegistration},
    services::storage_service::StorageService,
    utils::id_generator::generate_device_id,
};

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub refresh_interval: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Platform push service that hands out device tokens.
#[async_trait]
pub trait PushTokenProvider: Send + Sync {
    async fn issue_token(&self) -> SyncResult<IssuedPushToken>;
}

/// Server-side copy of the registration.
#[async_trait]
pub trait RegistrationMirror: Send + Sync {
    async fn mirror(&self, registration: &PushRegistration, bearer_token: &str) -> SyncResult<()>;
}

/// Token provider fed from configuration, for hosts that receive the token
/// out of band.
pub struct ConfiguredTokenProvider {
    token: Option<String>,
    platform: String,
    device_id: String,
}

impl ConfiguredTokenProvider {
    pub fn new(token: Option<String>, platform: impl Into<String>) -> Self {
        Self {
            token,
            platform: platform.into(),
            device_id: generate_device_id(),
        }
    }
}

#[async_trait]
impl PushTokenProvider for ConfiguredTokenProvider {
    async fn issue_token(&self) -> SyncResult<IssuedPushToken> {
        let token = self
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| SyncError::MissingCredential("no device push token configured".to_string()))?;

        Ok(IssuedPushToken {
            token: token.to_string(),
            platform: self.platform.clone(),
            device_id: self.device_id.clone(),
        })
    }
}

pub struct HttpRegistrationMirror {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRegistrationMirror {
    pub fn new(api_base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/notifications/register", api_base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl RegistrationMirror for HttpRegistrationMirror {
    async fn mirror(&self, registration: &PushRegistration, bearer_token: &str) -> SyncResult<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(bearer_token)
            .json(registration)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SyncError::HttpClient(format!("{}: {}", status, error_text)));
        }

        tracing::debug!("Push registration mirrored to {}", self.endpoint);
        Ok(())
    }
}

/// Keeps this device's push registration fresh, locally and on the server.
pub struct PushRegistrationService {
    storage: StorageService,
    provider: Arc<dyn PushTokenProvider>,
    mirror: Option<Arc<dyn RegistrationMirror>>, // None keeps registrations local
    config: PushConfig,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl PushRegistrationService {
    pub fn new(
        storage: StorageService,
        provider: Arc<dyn PushTokenProvider>,
        mirror: Option<Arc<dyn RegistrationMirror>>,
        config: PushConfig,
    ) -> Self {
        Self {
            storage,
            provider,
            mirror,
            config,
            refresh_task: Mutex::new(None),
        }
    }

    /// Issue a fresh token, persist it and mirror it. Only persistence
    /// failures are returned; mirroring is best effort.
    pub async fn register(&self) -> SyncResult<PushRegistration> {
        let issued = self.provider.issue_token().await?;
        let user_id = self.storage.user_id().await?;
        let registration = PushRegistration::new(issued, user_id);

        self.storage.save_push_registration(&registration).await?;
        tracing::info!(
            "Push registration saved for device {} ({})",
            registration.device_id,
            registration.platform
        );

        let Some(mirror) = &self.mirror else {
            return Ok(registration);
        };
        match self.storage.auth_token().await {
            Ok(Some(token)) => {
                if let Err(e) = mirror.mirror(&registration, &token).await {
                    tracing::warn!("Could not mirror push registration: {}", e);
                }
            }
            Ok(None) => tracing::warn!("No auth token, push registration kept locally only"),
            Err(e) => tracing::warn!("Could not read auth token for mirroring: {}", e),
        }

        Ok(registration)
    }

    /// Re-register when the stored registration is stale or belongs to another
    /// user. Returns the new registration, if one was made.
    pub async fn refresh_if_needed(&self) -> SyncResult<Option<PushRegistration>> {
        let max_age = chrono::Duration::from_std(self.config.refresh_interval)
            .map_err(|e| SyncError::InvalidConfiguration(format!("push refresh interval: {}", e)))?;
        let user_id = self.storage.user_id().await?;

        match self.storage.push_registration().await? {
            Some(current) if !current.needs_refresh(user_id.as_deref(), max_age, Utc::now()) => Ok(None),
            _ => self.register().await.map(Some),
        }
    }

    /// Check the registration now and then on every refresh interval.
    pub fn start_periodic_refresh(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let period = self.config.refresh_interval;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = this.refresh_if_needed().await {
                    tracing::warn!("Push registration refresh failed: {}", e);
                }
            }
        });

        let previous = self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn stop(&self) {
        let task = self.refresh_task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.abort();
            tracing::debug!("Push registration refresh stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProvider {
        issued: AtomicUsize,
    }

    #[async_trait]
    impl PushTokenProvider for CountingProvider {
        async fn issue_token(&self) -> SyncResult<IssuedPushToken> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(IssuedPushToken {
                token: format!("fcm-token-{}", n),
                platform: "android".to_string(),
                device_id: "dev-1".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingMirror {
        calls: Mutex<Vec<(String, String)>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl RegistrationMirror for RecordingMirror {
        async fn mirror(&self, registration: &PushRegistration, bearer_token: &str) -> SyncResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push((registration.token.clone(), bearer_token.to_string()));
            if self.fail.load(Ordering::SeqCst) {
                return Err(SyncError::NetworkConnection("offline".to_string()));
            }
            Ok(())
        }
    }

    async fn service() -> (Arc<CountingProvider>, Arc<RecordingMirror>, StorageService, Arc<PushRegistrationService>) {
        let storage = StorageService::new_memory();
        storage.set_auth_token("bearer-abc").await.unwrap();
        storage.set_user_id("usr-1").await.unwrap();
        let provider = Arc::new(CountingProvider::default());
        let mirror = Arc::new(RecordingMirror::default());
        let service = Arc::new(PushRegistrationService::new(
            storage.clone(),
            provider.clone(),
            Some(mirror.clone() as Arc<dyn RegistrationMirror>),
            PushConfig::default(),
        ));
        (provider, mirror, storage, service)
    }

    #[tokio::test]
    async fn test_register_persists_and_mirrors() {
        let (_, mirror, storage, service) = service().await;

        let registration = service.register().await.unwrap();
        assert_eq!(registration.user_id.as_deref(), Some("usr-1"));
        assert_eq!(storage.push_registration().await.unwrap(), Some(registration));
        assert_eq!(
            mirror.calls.lock().unwrap().clone(),
            vec![("fcm-token-1".to_string(), "bearer-abc".to_string())]
        );
    }

    #[tokio::test]
    async fn test_mirror_failure_is_not_fatal() {
        let (_, mirror, storage, service) = service().await;
        mirror.fail.store(true, Ordering::SeqCst);

        assert!(service.register().await.is_ok());
        assert!(storage.push_registration().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_refresh_only_when_stale_or_user_changed() {
        let (provider, _, storage, service) = service().await;

        assert!(service.refresh_if_needed().await.unwrap().is_some());
        assert!(service.refresh_if_needed().await.unwrap().is_none());
        assert_eq!(provider.issued.load(Ordering::SeqCst), 1);

        storage.set_user_id("usr-2").await.unwrap();
        let refreshed = service.refresh_if_needed().await.unwrap().unwrap();
        assert_eq!(refreshed.user_id.as_deref(), Some("usr-2"));
        assert_eq!(provider.issued.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_configured_provider_requires_token() {
        let provider = ConfiguredTokenProvider::new(None, "android");
        assert!(matches!(provider.issue_token().await, Err(SyncError::MissingCredential(_))));

        let provider = ConfiguredTokenProvider::new(Some("fcm-token".to_string()), "ios");
        let issued = provider.issue_token().await.unwrap();
        assert_eq!(issued.platform, "ios");
        assert_eq!(issued.device_id.len(), 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_refresh_runs_until_stopped() {
        let (provider, _, _, service) = service().await;

        service.start_periodic_refresh();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(provider.issued.load(Ordering::SeqCst), 1);
        assert!(service.is_refreshing());

        service.stop();
        assert!(!service.is_refreshing());
        tokio::time::sleep(Duration::from_secs(3 * 24 * 60 * 60)).await;
        assert_eq!(provider.issued.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_without_mirror_registration_stays_local() {
        let storage = StorageService::new_memory();
        let service = PushRegistrationService::new(
            storage.clone(),
            Arc::new(CountingProvider::default()),
            None,
            PushConfig::default(),
        );
        service.register().await.unwrap();
        assert!(storage.push_registration().await.unwrap().is_some());
    }

    #[test]
    fn test_mirror_endpoint() {
        let mirror = HttpRegistrationMirror::new("https://api.example.com/v1/");
        assert_eq!(mirror.endpoint, "https://api.example.com/v1/notifications/register");
    }
}
