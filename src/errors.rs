// src/errors.rs
use std::fmt;

/// Main error type for the ride sync core
#[derive(Debug)]
pub enum SyncError {
    // Transport errors
    WebSocketConnection(String),
    WebSocketMessage(String),
    ChannelClosed,
    NotConnected,
    MissingCredential(String),

    // Protocol errors
    UnknownEvent(String),
    MalformedPayload { event: String, reason: String },

    // Action errors
    ActionRejected { action: String, message: String },
    ActionInFlight { ride_id: String, action: String },

    // Callback handler errors
    HandlerFailed { category: String, reason: String },

    // Durable storage errors
    StorageConnection(String),
    StorageQuery(String),

    // Push registration and HTTP client errors
    NetworkTimeout,
    NetworkConnection(String),
    HttpClient(String),
    FcmDelivery(String),
    FcmInvalidToken(String),

    // Serialization errors
    JsonParsing(String),
    JsonSerialization(String),

    // Configuration errors
    InvalidConfiguration(String),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::WebSocketConnection(msg) => write!(f, "WebSocket connection error: {}", msg),
            SyncError::WebSocketMessage(msg) => write!(f, "WebSocket message error: {}", msg),
            SyncError::ChannelClosed => write!(f, "Communication channel closed"),
            SyncError::NotConnected => write!(f, "Socket is not connected"),
            SyncError::MissingCredential(what) => write!(f, "Missing credential: {}", what),

            SyncError::UnknownEvent(name) => write!(f, "Unknown event: {}", name),
            SyncError::MalformedPayload { event, reason } => {
                write!(f, "Malformed payload for '{}': {}", event, reason)
            }

            SyncError::ActionRejected { action, message } => {
                write!(f, "Action '{}' rejected: {}", action, message)
            }
            SyncError::ActionInFlight { ride_id, action } => {
                write!(f, "Action '{}' already in flight for ride {}", action, ride_id)
            }

            SyncError::HandlerFailed { category, reason } => {
                write!(f, "Callback for '{}' failed: {}", category, reason)
            }

            SyncError::StorageConnection(msg) => write!(f, "Storage connection error: {}", msg),
            SyncError::StorageQuery(msg) => write!(f, "Storage query error: {}", msg),

            SyncError::NetworkTimeout => write!(f, "Network request timed out"),
            SyncError::NetworkConnection(msg) => write!(f, "Network connection error: {}", msg),
            SyncError::HttpClient(msg) => write!(f, "HTTP client error: {}", msg),
            SyncError::FcmDelivery(msg) => write!(f, "FCM delivery error: {}", msg),
            SyncError::FcmInvalidToken(msg) => write!(f, "Invalid FCM token: {}", msg),

            SyncError::JsonParsing(msg) => write!(f, "JSON parsing error: {}", msg),
            SyncError::JsonSerialization(msg) => write!(f, "JSON serialization error: {}", msg),

            SyncError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for SyncError {}

// Convenience type alias for Results
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Transport failures are recovered by the connection manager and only
    /// ever surface as the connectivity flag.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncError::WebSocketConnection(_)
                | SyncError::WebSocketMessage(_)
                | SyncError::ChannelClosed
                | SyncError::NotConnected
                | SyncError::MissingCredential(_)
        )
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, SyncError::UnknownEvent(_) | SyncError::MalformedPayload { .. })
    }

    pub fn malformed(event: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::MalformedPayload {
            event: event.into(),
            reason: reason.into(),
        }
    }

    pub fn handler_failed(category: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::HandlerFailed {
            category: category.into(),
            reason: reason.into(),
        }
    }
}

// Conversion implementations for common error types
impl From<redis::RedisError> for SyncError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::IoError => SyncError::StorageConnection(err.to_string()),
            redis::ErrorKind::AuthenticationFailed => {
                SyncError::StorageConnection("Authentication failed".to_string())
            }
            _ => SyncError::StorageQuery(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::NetworkTimeout
        } else if err.is_connect() {
            SyncError::NetworkConnection(err.to_string())
        } else {
            SyncError::HttpClient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_eof() {
            SyncError::JsonParsing(err.to_string())
        } else {
            SyncError::JsonSerialization(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => SyncError::ChannelClosed,
            WsError::Io(e) => SyncError::WebSocketConnection(e.to_string()),
            other => SyncError::WebSocketMessage(other.to_string()),
        }
    }
}
