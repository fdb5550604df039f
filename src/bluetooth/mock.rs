/// In-memory transport for tests
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use super::transport::{CharacteristicInfo, GattLink, Transport};
use crate::controller::CancelToken;
use crate::error::{HeaterError, Result};
use crate::models::DeviceAddress;
use crate::protocol::profile::{HEATING_ELEMENT_TEMPERATURE_UUID, MODE_UUID, ROOM_TEMPERATURE_UUID};

pub const HEATER_SERVICE: Uuid = Uuid::from_u128(0xd97352b0_d19e_11e2_9e96_0800200c9a66);

#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    pub values: HashMap<Uuid, Vec<u8>>,
    pub refuse_connect: bool,
    pub hang_connect: bool,
    pub hang_on: HashSet<Uuid>,
    pub fail_reads: HashSet<Uuid>,
    pub write_only: HashSet<Uuid>,
    pub connect_delay: Option<Duration>,
    /// Applied to every read, keeping the link open for a while
    pub read_delay: Option<Duration>,
    /// Cancelled as soon as this device connects
    pub cancel_on_connect: Option<CancelToken>,
}

impl MockDevice {
    /// A heater exposing the three known characteristics
    pub fn heater(mode: u8, room: [u8; 4], element: [u8; 4]) -> Self {
        let mut values = HashMap::new();
        values.insert(MODE_UUID, vec![mode]);
        values.insert(ROOM_TEMPERATURE_UUID, room.to_vec());
        values.insert(HEATING_ELEMENT_TEMPERATURE_UUID, element.to_vec());
        MockDevice {
            values,
            ..Default::default()
        }
    }

    pub fn idle() -> Self {
        MockDevice::heater(0, [0xD2, 0x00, 0xC8, 0x00], [0x2C, 0x01, 0x58, 0x02])
    }
}

/// Counts contacts and records every write in order across all devices
#[derive(Default)]
pub struct MockTransport {
    devices: HashMap<DeviceAddress, MockDevice>,
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    writes: Arc<Mutex<Vec<(DeviceAddress, Uuid, Vec<u8>)>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport::default()
    }

    pub fn with_device(mut self, address: &str, device: MockDevice) -> Self {
        self.devices.insert(DeviceAddress::new(address), device);
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open links seen
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<(DeviceAddress, Uuid, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn GattLink>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let device = self
            .devices
            .get(address)
            .cloned()
            .ok_or_else(|| HeaterError::Connection {
                address: address.clone(),
                reason: "no such device".into(),
            })?;

        if let Some(delay) = device.connect_delay {
            sleep(delay).await;
        }
        if device.hang_connect {
            std::future::pending::<()>().await;
        }
        if device.refuse_connect {
            return Err(HeaterError::Connection {
                address: address.clone(),
                reason: "connection rejected".into(),
            });
        }
        if let Some(token) = &device.cancel_on_connect {
            token.cancel();
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        Ok(Box::new(MockLink {
            address: address.clone(),
            device,
            active: Arc::clone(&self.active),
            disconnects: Arc::clone(&self.disconnects),
            writes: Arc::clone(&self.writes),
            open: true,
        }))
    }
}

struct MockLink {
    address: DeviceAddress,
    device: MockDevice,
    active: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
    writes: Arc<Mutex<Vec<(DeviceAddress, Uuid, Vec<u8>)>>>,
    open: bool,
}

impl MockLink {
    fn transport_err(&self, reason: &str) -> HeaterError {
        HeaterError::Transport {
            address: self.address.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl GattLink for MockLink {
    async fn read(&mut self, characteristic: Uuid) -> Result<Vec<u8>> {
        if let Some(delay) = self.device.read_delay {
            sleep(delay).await;
        }
        if self.device.hang_on.contains(&characteristic) {
            std::future::pending::<()>().await;
        }
        if self.device.fail_reads.contains(&characteristic) {
            return Err(self.transport_err("read not permitted"));
        }
        self.device
            .values
            .get(&characteristic)
            .cloned()
            .ok_or_else(|| HeaterError::CharacteristicNotFound {
                address: self.address.clone(),
                uuid: characteristic,
            })
    }

    async fn write(&mut self, characteristic: Uuid, value: &[u8]) -> Result<()> {
        if self.device.hang_on.contains(&characteristic) {
            std::future::pending::<()>().await;
        }
        if !self.device.values.contains_key(&characteristic) {
            return Err(HeaterError::CharacteristicNotFound {
                address: self.address.clone(),
                uuid: characteristic,
            });
        }
        self.device.values.insert(characteristic, value.to_vec());
        self.writes
            .lock()
            .unwrap()
            .push((self.address.clone(), characteristic, value.to_vec()));
        Ok(())
    }

    async fn characteristics(&mut self) -> Result<Vec<CharacteristicInfo>> {
        let mut found: Vec<CharacteristicInfo> = self
            .device
            .values
            .keys()
            .map(|uuid| CharacteristicInfo {
                service: HEATER_SERVICE,
                uuid: *uuid,
                readable: !self.device.write_only.contains(uuid),
            })
            .collect();
        found.sort_by_key(|c| c.uuid);
        Ok(found)
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
