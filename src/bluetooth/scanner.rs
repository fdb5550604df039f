/// Bluetooth Low Energy discovery of nearby heaters
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::time::{sleep, Duration};

use crate::error::{HeaterError, Result};
use crate::models::DeviceAddress;

/// Advertised name prefix of the supported heaters
pub const HEATER_NAME_PREFIX: &str = "Terma";

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredDevice {
    pub address: DeviceAddress,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// Whether a discovered device should be reported under the given name filter
pub fn matches_name(name: Option<&str>, prefix: Option<&str>) -> bool {
    match prefix {
        None => true,
        Some(prefix) => name
            .map(|n| n.to_lowercase().starts_with(&prefix.to_lowercase()))
            .unwrap_or(false),
    }
}

/// Scan for heaters and report what BlueZ saw
///
/// Discovery runs for `duration` and is then stopped, so the scan never
/// blocks indefinitely. With a `name_prefix`, devices whose advertised name
/// does not start with it are skipped.
///
/// # Returns
/// Discovered devices sorted by address
pub async fn scan_for_heaters(
    adapter: &bluer::Adapter,
    duration: Duration,
    name_prefix: Option<&str>,
) -> Result<Vec<DiscoveredDevice>> {
    if duration.is_zero() {
        return Err(HeaterError::Validation("scan duration must be positive".into()));
    }

    info!("Scanning for Bluetooth devices for {:?}...", duration);

    // Configure discovery filter for Low Energy devices only
    let filter = bluer::DiscoveryFilter {
        transport: bluer::DiscoveryTransport::Le,
        duplicate_data: false,
        ..Default::default()
    };

    // Apply the discovery filter (warn if it fails, but continue)
    if let Err(e) = adapter.set_discovery_filter(filter).await {
        warn!("Failed to set discovery filter: {}", e);
    }

    // Start device discovery in background
    let discovery_handle = match adapter.discover_devices().await {
        Ok(discovery_stream) => tokio::spawn(async move {
            let mut stream = Box::pin(discovery_stream);
            while let Some(event) = stream.next().await {
                debug!("Discovery event: {:?}", event);
            }
        }),
        Err(e) => {
            error!("Failed to start device discovery: {}", e);
            return Err(HeaterError::Adapter(e.to_string()));
        }
    };

    sleep(duration).await;
    discovery_handle.abort();

    let addresses = adapter.device_addresses().await.map_err(|e| {
        error!("Failed to get device addresses: {}", e);
        HeaterError::Adapter(e.to_string())
    })?;

    let mut found = Vec::new();
    for addr in addresses {
        let device = match adapter.device(addr) {
            Ok(device) => device,
            Err(_) => continue,
        };

        let name = device.name().await.unwrap_or_else(|e| {
            debug!("No name for {}: {}", addr, e);
            None
        });
        if !matches_name(name.as_deref(), name_prefix) {
            continue;
        }
        let rssi = device.rssi().await.unwrap_or(None);

        let discovered = DiscoveredDevice {
            address: DeviceAddress::new(addr.to_string()),
            name,
            rssi,
        };
        info!(
            "Found device: Name: {}, Address: {}, RSSI: {}",
            discovered.name.as_deref().unwrap_or("Unknown"),
            discovered.address,
            discovered
                .rssi
                .map(|r| format!("{} dBm", r))
                .unwrap_or_else(|| "N/A".to_string())
        );
        found.push(discovered);
    }

    if found.is_empty() {
        info!("No Bluetooth devices found within timeout.");
    }

    found.sort_by(|a, b| a.address.cmp(&b.address));
    Ok(found)
}
