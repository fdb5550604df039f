/// Connection lifecycle for a single heater
use std::fmt;

use log::{debug, info, warn};
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use super::transport::{GattLink, Transport};
use crate::error::{HeaterError, Result};
use crate::models::{DeviceAddress, DeviceStatus, DeviceTemperatures, TargetType};
use crate::protocol::temperature::{decode_temperature, encode_temperature_payload};
use crate::protocol::{ModeReading, OperatingMode, ProtocolProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Operating,
    Disconnecting,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Operating => "operating",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    /// Bound on each individual read, write or disconnect
    pub operation: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            connect: Duration::from_secs(10),
            operation: Duration::from_secs(5),
        }
    }
}

/// One short sequence of reads and writes against a heater
///
/// ```text
/// Disconnected -> Connecting -> Connected <-> Operating
///                     |                          |
///                     +--------> Failed <--------+
/// Connected | Failed -> Disconnecting -> Disconnected
/// ```
///
/// Every transport call is bounded by a timeout. A transport error or timeout
/// leaves the session `Failed` until it is disconnected.
pub struct DeviceSession<'a> {
    address: DeviceAddress,
    profile: &'a ProtocolProfile,
    transport: &'a dyn Transport,
    timeouts: Timeouts,
    state: SessionState,
    link: Option<Box<dyn GattLink>>,
}

impl<'a> DeviceSession<'a> {
    pub fn new(
        address: DeviceAddress,
        profile: &'a ProtocolProfile,
        transport: &'a dyn Transport,
        timeouts: Timeouts,
    ) -> Self {
        DeviceSession {
            address,
            profile,
            transport,
            timeouts,
            state: SessionState::Disconnected,
            link: None,
        }
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Open the transport. Never retries; that is left to the caller.
    pub async fn connect(&mut self) -> Result<()> {
        self.expect_state(SessionState::Disconnected)?;
        self.state = SessionState::Connecting;
        info!("Connecting to heater {}", self.address);

        let after = self.timeouts.connect;
        match timeout(after, self.transport.connect(&self.address)).await {
            Ok(Ok(link)) => {
                self.link = Some(link);
                self.state = SessionState::Connected;
                debug!("Connected to heater {}", self.address);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("Connection to {} failed: {}", self.address, e);
                self.state = SessionState::Failed;
                Err(e)
            }
            Err(_) => {
                warn!("Connection to {} timed out after {:?}", self.address, after);
                self.state = SessionState::Failed;
                Err(HeaterError::Timeout {
                    address: self.address.clone(),
                    operation: "connect",
                    after,
                })
            }
        }
    }

    pub async fn read_mode(&mut self) -> Result<ModeReading> {
        let data = self.read(self.profile.mode_uuid, "read mode").await?;
        let reading = self.profile.decode_mode(&data)?;
        info!(
            "Heater {} mode: {}",
            self.address,
            reading.mode.description()
        );
        Ok(reading)
    }

    pub async fn read_temperatures(&mut self) -> Result<DeviceTemperatures> {
        let room = self
            .read(self.profile.room_temperature_uuid, "read room temperature")
            .await?;
        let element = self
            .read(
                self.profile.heating_element_temperature_uuid,
                "read heating element temperature",
            )
            .await?;

        let temperatures = DeviceTemperatures {
            room: decode_temperature(&room)?,
            heating_element: decode_temperature(&element)?,
        };
        info!(
            "Heater {} room: {:.1}°C (target {:.1}°C), element: {:.1}°C (target {:.1}°C)",
            self.address,
            temperatures.room.current,
            temperatures.room.target,
            temperatures.heating_element.current,
            temperatures.heating_element.target
        );
        Ok(temperatures)
    }

    /// Mode and both temperatures
    pub async fn read_status(&mut self) -> Result<DeviceStatus> {
        let mode = self.read_mode().await?;
        let temperatures = self.read_temperatures().await?;
        Ok(DeviceStatus { mode, temperatures })
    }

    pub async fn set_mode(&mut self, mode: OperatingMode) -> Result<()> {
        let payload = self.profile.encode_mode(mode)?;
        self.write(self.profile.mode_uuid, &payload, "write mode")
            .await?;
        info!("Heater {} mode set to {}", self.address, mode.description());
        Ok(())
    }

    /// Write only the target temperature characteristic for `target`
    ///
    /// The heater ignores the value unless it is already in the matching
    /// manual mode; see [`DeviceSession::apply_target_temperature`].
    pub async fn set_target_temperature(&mut self, celsius: f64, target: TargetType) -> Result<()> {
        let payload = encode_temperature_payload(celsius)?;
        self.write(
            self.profile.temperature_uuid(target),
            &payload,
            "write target temperature",
        )
        .await?;
        info!(
            "Heater {} {} target set to {:.1}°C",
            self.address, target, celsius
        );
        Ok(())
    }

    /// Switch to the manual mode for `target`, then write the temperature
    ///
    /// Mode first, temperature second. If the mode write fails the temperature
    /// is not written.
    pub async fn apply_target_temperature(&mut self, celsius: f64, target: TargetType) -> Result<()> {
        // Encode both up front so a bad value never leaves the mode half-applied
        encode_temperature_payload(celsius)?;
        self.profile.encode_mode(target.manual_mode())?;

        self.set_mode(target.manual_mode()).await?;
        self.set_target_temperature(celsius, target).await
    }

    /// Release the transport. Calling this on a disconnected session does nothing.
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(mut link) = self.link.take() else {
            self.state = SessionState::Disconnected;
            return Ok(());
        };

        self.state = SessionState::Disconnecting;
        let after = self.timeouts.operation;
        let result = match timeout(after, link.disconnect()).await {
            Ok(result) => result,
            Err(_) => Err(HeaterError::Timeout {
                address: self.address.clone(),
                operation: "disconnect",
                after,
            }),
        };
        self.state = SessionState::Disconnected;

        match &result {
            Ok(()) => debug!("Disconnected from heater {}", self.address),
            Err(e) => warn!("Disconnect from {} failed: {}", self.address, e),
        }
        result
    }

    async fn read(&mut self, uuid: Uuid, operation: &'static str) -> Result<Vec<u8>> {
        self.begin()?;
        let after = self.timeouts.operation;
        let result = match self.link.as_mut() {
            Some(link) => timeout(after, link.read(uuid)).await,
            None => Ok(Err(self.state_error(SessionState::Connected))),
        };
        let data = self.finish(operation, after, result)?;
        debug!("{} {}: {:02X?}", self.address, operation, data);
        Ok(data)
    }

    async fn write(&mut self, uuid: Uuid, value: &[u8], operation: &'static str) -> Result<()> {
        self.begin()?;
        debug!("{} {}: {:02X?}", self.address, operation, value);
        let after = self.timeouts.operation;
        let result = match self.link.as_mut() {
            Some(link) => timeout(after, link.write(uuid, value)).await,
            None => Ok(Err(self.state_error(SessionState::Connected))),
        };
        self.finish(operation, after, result)
    }

    fn begin(&mut self) -> Result<()> {
        self.expect_state(SessionState::Connected)?;
        self.state = SessionState::Operating;
        Ok(())
    }

    fn finish<T>(
        &mut self,
        operation: &'static str,
        after: Duration,
        result: std::result::Result<Result<T>, tokio::time::error::Elapsed>,
    ) -> Result<T> {
        let result = result.unwrap_or_else(|_| {
            Err(HeaterError::Timeout {
                address: self.address.clone(),
                operation,
                after,
            })
        });

        self.state = match &result {
            Err(e) if e.is_transport() => {
                warn!("{} on {} failed: {}", operation, self.address, e);
                SessionState::Failed
            }
            _ => SessionState::Connected,
        };
        result
    }

    fn expect_state(&self, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.state_error(expected))
        }
    }

    fn state_error(&self, expected: SessionState) -> HeaterError {
        HeaterError::InvalidState {
            address: self.address.clone(),
            state: self.state.as_str(),
            expected: expected.as_str(),
        }
    }
}

impl Drop for DeviceSession<'_> {
    fn drop(&mut self) {
        if self.link.is_some() {
            warn!("Session for {} dropped without disconnecting", self.address);
        }
    }
}
