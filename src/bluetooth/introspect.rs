/// Diagnostic dump of every readable characteristic on a heater
use std::collections::BTreeMap;

use log::{debug, info, warn};
use tokio::time::timeout;
use uuid::Uuid;

use super::session::Timeouts;
use super::transport::{GattLink, Transport};
use crate::error::{HeaterError, Result};
use crate::models::DeviceAddress;
use crate::protocol::ProtocolProfile;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldReading {
    pub service: Uuid,
    pub description: String,
    /// Upper-case hex of the value, when the read succeeded
    pub value_hex: Option<String>,
    pub error: Option<String>,
}

/// Connect once and read every readable characteristic
///
/// Used to map out undocumented firmware fields, not by room control. A failed
/// read is recorded next to its characteristic and the walk continues.
pub async fn enumerate_fields(
    transport: &dyn Transport,
    profile: &ProtocolProfile,
    address: &DeviceAddress,
    timeouts: Timeouts,
) -> Result<BTreeMap<Uuid, FieldReading>> {
    info!("Enumerating characteristics of {}", address);

    let mut link = match timeout(timeouts.connect, transport.connect(address)).await {
        Ok(link) => link?,
        Err(_) => {
            return Err(HeaterError::Timeout {
                address: address.clone(),
                operation: "connect",
                after: timeouts.connect,
            })
        }
    };

    let result = walk(link.as_mut(), profile, address, timeouts).await;

    match timeout(timeouts.operation, link.disconnect()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to disconnect from {}: {}", address, e),
        Err(_) => warn!("Disconnect from {} timed out", address),
    }

    result
}

async fn walk(
    link: &mut dyn GattLink,
    profile: &ProtocolProfile,
    address: &DeviceAddress,
    timeouts: Timeouts,
) -> Result<BTreeMap<Uuid, FieldReading>> {
    let characteristics = match timeout(timeouts.operation, link.characteristics()).await {
        Ok(found) => found?,
        Err(_) => {
            return Err(HeaterError::Timeout {
                address: address.clone(),
                operation: "enumerate characteristics",
                after: timeouts.operation,
            })
        }
    };

    let mut fields = BTreeMap::new();
    for characteristic in characteristics.into_iter().filter(|c| c.readable) {
        let description = profile
            .describe(characteristic.uuid)
            .unwrap_or("Unknown")
            .to_string();

        let (value_hex, error) = match timeout(timeouts.operation, link.read(characteristic.uuid)).await {
            Ok(Ok(value)) => (Some(to_hex(&value)), None),
            Ok(Err(e)) => (None, Some(e.to_string())),
            Err(_) => (None, Some(format!("read timed out after {:?}", timeouts.operation))),
        };

        match &error {
            None => debug!("{} {}: {:?}", address, characteristic.uuid, value_hex),
            Some(e) => warn!("{} {}: {}", address, characteristic.uuid, e),
        }

        fields.insert(
            characteristic.uuid,
            FieldReading {
                service: characteristic.service,
                description,
                value_hex,
                error,
            },
        );
    }

    info!("Read {} characteristics from {}", fields.len(), address);
    Ok(fields)
}

fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02X}", b)).collect()
}
