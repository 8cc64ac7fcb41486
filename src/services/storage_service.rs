// src/services/storage_service.rs
use async_trait::async_trait;
use redis::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing;

use crate::errors::SyncError;
use crate::models::push::PushRegistration;

// Cache key strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheKey {
    Simple(String),
    Composite(Vec<String>),
}

impl CacheKey {
    pub fn to_key_string(&self) -> String {
        match self {
            CacheKey::Simple(key) => key.clone(),
            CacheKey::Composite(parts) => parts.join(":"),
        }
    }
}

#[async_trait]
pub trait KeyOperations: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &CacheKey, value: &str) -> Result<(), CacheError>;
    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError>;
}

// Enum to wrap different store implementations
pub enum Store {
    Redis(RedisStore),
    Memory(MemoryStore),
}

// Redis-backed durable store
pub struct RedisStore {
    client: Client,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url).map_err(|e| CacheError::ConnectionError(e.to_string()))?;
        Ok(Self { client })
    }

    async fn get_connection(&self) -> Result<redis::aio::Connection, CacheError> {
        self.client
            .get_async_connection()
            .await
            .map_err(|e| CacheError::ConnectionError(e.to_string()))
    }
}

#[async_trait]
impl KeyOperations for RedisStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheError> {
        let mut conn = self.get_connection().await?;
        let data: Option<String> = redis::cmd("GET")
            .arg(key.to_key_string())
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::OperationError(e.to_string()))?;
        Ok(data)
    }

    async fn set(&self, key: &CacheKey, value: &str) -> Result<(), CacheError> {
        let mut conn = self.get_connection().await?;
        let _: () = redis::cmd("SET")
            .arg(key.to_key_string())
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::OperationError(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        let mut conn = self.get_connection().await?;
        let _: () = redis::cmd("DEL")
            .arg(key.to_key_string())
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::OperationError(e.to_string()))?;
        Ok(())
    }
}

// Memory store for development/testing
#[derive(Default)]
pub struct MemoryStore {
    store: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyOperations for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheError> {
        Ok(self.store.read().await.get(&key.to_key_string()).cloned())
    }

    async fn set(&self, key: &CacheKey, value: &str) -> Result<(), CacheError> {
        self.store.write().await.insert(key.to_key_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        self.store.write().await.remove(&key.to_key_string());
        Ok(())
    }
}

#[async_trait]
impl KeyOperations for Store {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheError> {
        match self {
            Store::Redis(store) => store.get(key).await,
            Store::Memory(store) => store.get(key).await,
        }
    }

    async fn set(&self, key: &CacheKey, value: &str) -> Result<(), CacheError> {
        match self {
            Store::Redis(store) => store.set(key, value).await,
            Store::Memory(store) => store.set(key, value).await,
        }
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        match self {
            Store::Redis(store) => store.delete(key).await,
            Store::Memory(store) => store.delete(key).await,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Operation error: {0}")]
    OperationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<CacheError> for SyncError {
    fn from(error: CacheError) -> Self {
        match error {
            CacheError::ConnectionError(msg) => SyncError::StorageConnection(msg),
            CacheError::OperationError(msg) => SyncError::StorageQuery(msg),
            CacheError::SerializationError(msg) => SyncError::JsonSerialization(msg),
        }
    }
}

// Keys for everything this client persists
pub struct CacheKeys;

impl CacheKeys {
    pub fn auth_token() -> CacheKey {
        CacheKey::Composite(vec!["auth".to_string(), "token".to_string()])
    }

    pub fn user_id() -> CacheKey {
        CacheKey::Composite(vec!["auth".to_string(), "user_id".to_string()])
    }

    pub fn push_registration() -> CacheKey {
        CacheKey::Composite(vec!["push".to_string(), "registration".to_string()])
    }
}

/// Typed access to the durable key-value store.
#[derive(Clone)]
pub struct StorageService {
    store: Arc<Store>,
}

impl StorageService {
    pub fn new(store: Store) -> Self {
        Self { store: Arc::new(store) }
    }

    pub fn new_redis(redis_url: &str) -> Result<Self, SyncError> {
        Ok(Self::new(Store::Redis(RedisStore::new(redis_url)?)))
    }

    pub fn new_memory() -> Self {
        Self::new(Store::Memory(MemoryStore::new()))
    }

    pub async fn auth_token(&self) -> Result<Option<String>, SyncError> {
        Ok(self.non_empty(&CacheKeys::auth_token()).await?)
    }

    pub async fn set_auth_token(&self, token: &str) -> Result<(), SyncError> {
        Ok(self.store.set(&CacheKeys::auth_token(), token).await?)
    }

    pub async fn user_id(&self) -> Result<Option<String>, SyncError> {
        Ok(self.non_empty(&CacheKeys::user_id()).await?)
    }

    pub async fn set_user_id(&self, user_id: &str) -> Result<(), SyncError> {
        Ok(self.store.set(&CacheKeys::user_id(), user_id).await?)
    }

    /// Forget the signed-in identity.
    pub async fn clear_credentials(&self) -> Result<(), SyncError> {
        self.store.delete(&CacheKeys::auth_token()).await?;
        self.store.delete(&CacheKeys::user_id()).await?;
        Ok(())
    }

    pub async fn push_registration(&self) -> Result<Option<PushRegistration>, SyncError> {
        let Some(json) = self.store.get(&CacheKeys::push_registration()).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(registration) => Ok(Some(registration)),
            Err(e) => {
                // An unreadable record is as good as none; it will be re-issued
                tracing::warn!("Discarding unreadable push registration: {}", e);
                Ok(None)
            }
        }
    }

    pub async fn save_push_registration(&self, registration: &PushRegistration) -> Result<(), SyncError> {
        let json = serde_json::to_string(registration)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;
        Ok(self.store.set(&CacheKeys::push_registration(), &json).await?)
    }

    async fn non_empty(&self, key: &CacheKey) -> Result<Option<String>, CacheError> {
        Ok(self.store.get(key).await?.filter(|v| !v.trim().is_empty()))
    }
}
