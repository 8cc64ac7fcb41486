pub mod errors;
pub mod models;
pub mod services;
pub mod state;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use errors::{SyncError, SyncResult};
pub use services::RideSyncService;
pub use state::{AppConfig, AppState};
