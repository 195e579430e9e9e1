mod bluetooth;
mod config;
mod delivery;
mod models;
mod utils;

use log::{error, info};

use bluetooth::listen;
use config::GatewayConfig;
use delivery::{Dispatcher, Forwarder, HttpSink, RateLimitState, MAX_IN_FLIGHT};
use utils::error_chain;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match GatewayConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", error_chain(&e));
            return Err(e.into());
        }
    };

    let sink = match HttpSink::new(
        config.data_endpoint.clone(),
        &config.api_key,
        config.request_timeout,
    ) {
        Ok(sink) => sink,
        Err(e) => {
            error!("Failed to create HTTP client: {}", error_chain(&e));
            return Err(e.into());
        }
    };

    let forwarder = Forwarder::new(sink, RateLimitState::default());
    let mut dispatcher = Dispatcher::new(forwarder, MAX_IN_FLIGHT);

    info!(
        "Starting SwitchBot gateway, forwarding to {}",
        config.data_endpoint
    );

    // Run the listener until it fails or Ctrl+C arrives
    let result: Result<(), Box<dyn std::error::Error>> = tokio::select! {
        result = listen(&config, &mut dispatcher) => result.map_err(Into::into),
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                info!("Program terminated by user. Exiting gracefully.");
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
    };

    // Deliveries already dispatched run to completion
    if dispatcher.in_flight() > 0 {
        info!("Waiting for {} deliveries to finish", dispatcher.in_flight());
    }
    dispatcher.drain().await;

    if let Err(e) = result {
        error!("Fatal error: {}", error_chain(e.as_ref()));
        return Err(e);
    }

    Ok(())
}
