/// Transport seam between sessions and the Bluetooth stack
use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::DeviceAddress;

/// One GATT characteristic as seen during enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub service: Uuid,
    pub uuid: Uuid,
    pub readable: bool,
}

/// Opens connections to heaters
///
/// Sessions only ever see a [`GattLink`], so the room controller runs against
/// BlueZ in production and an in-memory transport in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn GattLink>>;
}

/// An open connection to one heater
#[async_trait]
pub trait GattLink: Send {
    async fn read(&mut self, characteristic: Uuid) -> Result<Vec<u8>>;

    async fn write(&mut self, characteristic: Uuid, value: &[u8]) -> Result<()>;

    /// Every characteristic of every service the device exposes
    async fn characteristics(&mut self) -> Result<Vec<CharacteristicInfo>>;

    async fn disconnect(&mut self) -> Result<()>;
}
