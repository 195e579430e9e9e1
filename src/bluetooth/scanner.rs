/// Bluetooth Low Energy listening for SwitchBot meter advertisements
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Uuid};
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::collections::HashMap;
use thiserror::Error;

use crate::bluetooth::decoder::decode;
use crate::config::GatewayConfig;
use crate::delivery::{Dispatcher, Sink};
use crate::models::Reading;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to open bluetooth session")]
    Session(#[source] bluer::Error),
    #[error("failed to get default bluetooth adapter")]
    Adapter(#[source] bluer::Error),
    #[error("failed to enable bluetooth adapter")]
    Enable(#[source] bluer::Error),
    #[error("failed to start scanning")]
    StartScan(#[source] bluer::Error),
    #[error("advertisement stream ended")]
    Ended,
}

/// Decode every service data entry of one advertisement
///
/// Entries that are not meter frames are skipped and logged at debug level.
///
/// # Arguments
/// * `address` - Hardware address of the advertising device
/// * `service_data` - Service data entries keyed by service UUID
///
/// # Returns
/// The readings decoded from the advertisement, possibly none
pub fn readings_from_service_data(
    address: &str,
    service_data: &HashMap<Uuid, Vec<u8>>,
) -> Vec<Reading> {
    service_data
        .iter()
        .filter_map(|(uuid, data)| match decode(address, data) {
            Ok(reading) => Some(reading),
            Err(rejection) => {
                debug!("Skipping service data {} from {}: {}", uuid, address, rejection);
                None
            }
        })
        .collect()
}

/// Listen for meter advertisements and dispatch their readings
///
/// Powers the default adapter and runs an LE discovery that reports repeated
/// advertisements. Every advertisement is decoded inline; accepted readings
/// are handed to the dispatcher. Only initialization failures are returned;
/// problems with single devices are logged and skipped.
///
/// # Arguments
/// * `config` - Gateway configuration with the optional device allow-list
/// * `dispatcher` - Dispatcher running the delivery attempts
pub async fn listen<S: Sink + 'static>(
    config: &GatewayConfig,
    dispatcher: &mut Dispatcher<S>,
) -> Result<(), ScanError> {
    let session = bluer::Session::new().await.map_err(ScanError::Session)?;
    let adapter = session.default_adapter().await.map_err(ScanError::Adapter)?;

    adapter.set_powered(true).await.map_err(ScanError::Enable)?;

    // Report every broadcast, not just the first one per device
    let filter = DiscoveryFilter {
        transport: DiscoveryTransport::Le,
        duplicate_data: true,
        ..Default::default()
    };
    if let Err(e) = adapter.set_discovery_filter(filter).await {
        warn!("Failed to set discovery filter: {}", e);
    }

    let events = adapter
        .discover_devices_with_changes()
        .await
        .map_err(ScanError::StartScan)?;
    tokio::pin!(events);

    info!("Listening for SwitchBot meters on {}", adapter.name());

    while let Some(event) = events.next().await {
        if let AdapterEvent::DeviceAdded(addr) = event {
            forward_advertisement(&adapter, addr, config, dispatcher).await;
        }
    }

    Err(ScanError::Ended)
}

async fn forward_advertisement<S: Sink + 'static>(
    adapter: &Adapter,
    addr: Address,
    config: &GatewayConfig,
    dispatcher: &mut Dispatcher<S>,
) {
    let device = match adapter.device(addr) {
        Ok(device) => device,
        Err(e) => {
            debug!("Device {} vanished: {}", addr, e);
            return;
        }
    };

    let service_data = match device.service_data().await {
        Ok(Some(service_data)) => service_data,
        Ok(None) => return,
        Err(e) => {
            debug!("Failed to get service data for {}: {}", addr, e);
            return;
        }
    };

    let address = addr.to_string();
    debug!("Found device {} with {} service data entries", address, service_data.len());

    for reading in readings_from_service_data(&address, &service_data) {
        if !config.accepts(&reading.device_id) {
            debug!("Ignoring unconfigured meter {}", reading.device_id);
            continue;
        }

        info!(
            "[{}] temp: {:.1}°C, humidity: {}%, battery: {}%, tempFlag: {}",
            config.label(&reading.device_id),
            reading.temperature_celsius,
            reading.humidity_percent,
            reading.battery_percent,
            u8::from(reading.temperature_flag)
        );
        dispatcher.dispatch(reading).await;
    }
}
