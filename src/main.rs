use sparrow_ride_sync::{
    services::{CallbackCategory, CallbackPayload},
    state::{AppConfig, AppState},
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sparrow_ride_sync=info".into()),
        )
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let app_state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to build application state: {}", e);
            std::process::exit(1);
        }
    };

    for category in CallbackCategory::ALL {
        app_state.ride_sync.register_callback(category, move |payload| {
            log_payload(category, payload);
            Ok(())
        });
    }

    if !app_state.ride_sync.initialize().await {
        tracing::warn!("Running without a live socket, store credentials and restart to connect");
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }

    tracing::info!("Shutting down");
    app_state.ride_sync.cleanup().await;
}

fn log_payload(category: CallbackCategory, payload: &CallbackPayload) {
    match payload {
        CallbackPayload::RideProgress(record) | CallbackPayload::RideCompleted(record) => tracing::info!(
            "[{}] ride {} is {} (ETA {}, {}%)",
            category,
            record.ride_id,
            record.status,
            record.eta,
            record.progress
        ),
        CallbackPayload::PinConfirmation { ride_id, pin_code } => {
            tracing::info!("[{}] ride {} PIN {}", category, ride_id, pin_code)
        }
        CallbackPayload::UserAction { ride_id, action } => {
            tracing::info!("[{}] ride {} needs input for {}", category, ride_id, action)
        }
        CallbackPayload::ActionAck(ack) => tracing::info!("[{}] {}", category, ack.message),
    }
}
