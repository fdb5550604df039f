/// BlueZ-backed transport built on bluer
use std::future::Future;

use async_trait::async_trait;
use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, AdapterEvent, Address, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use super::transport::{CharacteristicInfo, GattLink, Transport};
use crate::error::{HeaterError, Result};
use crate::models::DeviceAddress;

const SERVICES_POLL_MS: u64 = 100;

pub struct BluezTransport {
    adapter: Adapter,
}

impl BluezTransport {
    /// Open a BlueZ session on the named adapter, or the default one
    pub async fn new(adapter_name: Option<&str>) -> Result<Self> {
        let session = match bluer::Session::new().await {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to create Bluetooth session: {}", e);
                return Err(HeaterError::Adapter(e.to_string()));
            }
        };

        let adapter = match adapter_name {
            Some(name) => session.adapter(name),
            None => session.default_adapter().await,
        }
        .map_err(|e| {
            error!("Failed to get Bluetooth adapter: {}", e);
            HeaterError::Adapter(e.to_string())
        })?;

        // Ensure Bluetooth adapter is powered on
        if let Err(e) = adapter.set_powered(true).await {
            error!("Failed to power on adapter: {}", e);
            return Err(HeaterError::Adapter(e.to_string()));
        }

        info!("Using Bluetooth adapter {}", adapter.name());
        Ok(BluezTransport { adapter })
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// BlueZ only connects to devices it has seen, so discover unknown ones first
    async fn ensure_known(&self, address: &DeviceAddress, addr: Address) -> Result<()> {
        let adapter_err = |e: bluer::Error| HeaterError::Connection {
            address: address.clone(),
            reason: e.to_string(),
        };

        let known = self.adapter.device_addresses().await.map_err(adapter_err)?;
        if known.contains(&addr) {
            return Ok(());
        }

        debug!("{} not yet known to BlueZ, discovering", address);
        let events = self.adapter.discover_devices().await.map_err(adapter_err)?;
        let mut events = Box::pin(events);
        while let Some(event) = events.next().await {
            if let AdapterEvent::DeviceAdded(found) = event {
                if found == addr {
                    debug!("Discovered {}", address);
                    return Ok(());
                }
            }
        }

        Err(HeaterError::Connection {
            address: address.clone(),
            reason: "discovery ended before the device was seen".into(),
        })
    }
}

#[async_trait]
impl Transport for BluezTransport {
    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn GattLink>> {
        let addr: Address = address.as_str().parse().map_err(|e| HeaterError::Connection {
            address: address.clone(),
            reason: format!("invalid BLE address: {}", e),
        })?;

        self.ensure_known(address, addr).await?;

        let device = self.adapter.device(addr).map_err(|e| HeaterError::Connection {
            address: address.clone(),
            reason: e.to_string(),
        })?;
        // If the caller's timeout drops this future mid-connect, BlueZ may still
        // finish the connection in the background and keep the slot
        let pending = PendingConnect::new({
            let device = device.clone();
            let address = address.clone();
            async move {
                if let Err(e) = device.disconnect().await {
                    debug!("Cleanup disconnect of {} failed: {}", address, e);
                }
            }
        });
        device.connect().await.map_err(|e| HeaterError::Connection {
            address: address.clone(),
            reason: e.to_string(),
        })?;
        pending.disarm();

        Ok(Box::new(BluezLink {
            address: address.clone(),
            device,
            characteristics: None,
        }))
    }
}

/// Runs `cleanup` on the runtime unless disarmed before being dropped
struct PendingConnect<F>
where
    F: Future<Output = ()> + Send + 'static,
{
    cleanup: Option<F>,
}

impl<F> PendingConnect<F>
where
    F: Future<Output = ()> + Send + 'static,
{
    fn new(cleanup: F) -> Self {
        PendingConnect {
            cleanup: Some(cleanup),
        }
    }

    fn disarm(mut self) {
        self.cleanup = None;
    }
}

impl<F> Drop for PendingConnect<F>
where
    F: Future<Output = ()> + Send + 'static,
{
    fn drop(&mut self) {
        let Some(cleanup) = self.cleanup.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!("Connect abandoned, disconnecting in the background");
                runtime.spawn(cleanup);
            }
            Err(_) => warn!("Connect abandoned outside a runtime, cannot disconnect"),
        }
    }
}

struct BluezLink {
    address: DeviceAddress,
    device: Device,
    characteristics: Option<Vec<(CharacteristicInfo, Characteristic)>>,
}

impl BluezLink {
    fn transport_err(&self, e: bluer::Error) -> HeaterError {
        HeaterError::Transport {
            address: self.address.clone(),
            reason: e.to_string(),
        }
    }

    /// Walk services once per connection and cache the characteristic handles
    async fn resolve(&mut self) -> Result<()> {
        if self.characteristics.is_some() {
            return Ok(());
        }

        while !self
            .device
            .is_services_resolved()
            .await
            .map_err(|e| self.transport_err(e))?
        {
            sleep(Duration::from_millis(SERVICES_POLL_MS)).await;
        }

        let mut found = Vec::new();
        for service in self.device.services().await.map_err(|e| self.transport_err(e))? {
            let service_uuid = service.uuid().await.map_err(|e| self.transport_err(e))?;
            for characteristic in service
                .characteristics()
                .await
                .map_err(|e| self.transport_err(e))?
            {
                let uuid = characteristic.uuid().await.map_err(|e| self.transport_err(e))?;
                let flags = characteristic.flags().await.map_err(|e| self.transport_err(e))?;
                found.push((
                    CharacteristicInfo {
                        service: service_uuid,
                        uuid,
                        readable: flags.read,
                    },
                    characteristic,
                ));
            }
        }

        debug!("{} exposes {} characteristics", self.address, found.len());
        self.characteristics = Some(found);
        Ok(())
    }

    async fn find(&mut self, uuid: Uuid) -> Result<Characteristic> {
        self.resolve().await?;
        self.characteristics
            .iter()
            .flatten()
            .find(|(info, _)| info.uuid == uuid)
            .map(|(_, characteristic)| characteristic.clone())
            .ok_or_else(|| HeaterError::CharacteristicNotFound {
                address: self.address.clone(),
                uuid,
            })
    }
}

#[async_trait]
impl GattLink for BluezLink {
    async fn read(&mut self, characteristic: Uuid) -> Result<Vec<u8>> {
        let handle = self.find(characteristic).await?;
        handle.read().await.map_err(|e| self.transport_err(e))
    }

    async fn write(&mut self, characteristic: Uuid, value: &[u8]) -> Result<()> {
        let handle = self.find(characteristic).await?;
        handle.write(value).await.map_err(|e| self.transport_err(e))
    }

    async fn characteristics(&mut self) -> Result<Vec<CharacteristicInfo>> {
        self.resolve().await?;
        Ok(self
            .characteristics
            .iter()
            .flatten()
            .map(|(info, _)| info.clone())
            .collect())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.device.disconnect().await.map_err(|e| self.transport_err(e))
    }
}
