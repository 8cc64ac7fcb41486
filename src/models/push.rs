// src/models/push.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// What the platform push service hands back when asked for a token.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssuedPushToken {
    pub token: String,
    pub platform: String,   // "android", "ios"
    pub device_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushRegistration {
    pub token: String,
    pub platform: String,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl PushRegistration {
    pub fn new(issued: IssuedPushToken, user_id: Option<String>) -> Self {
        Self {
            token: issued.token,
            platform: issued.platform,
            device_id: issued.device_id,
            user_id,
            issued_at: Utc::now(),
        }
    }

    /// Stale once older than `max_age`, or when it belongs to someone else.
    pub fn needs_refresh(&self, user_id: Option<&str>, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.user_id.as_deref() != user_id || now.signed_duration_since(self.issued_at) >= max_age
    }
}
