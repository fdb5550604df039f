use std::fmt;
use std::str::FromStr;

use time::OffsetDateTime;

use crate::error::HeaterError;
use crate::protocol::{ModeReading, OperatingMode};

/// BLE address of one heater, normalised to upper case
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl AsRef<str>) -> Self {
        DeviceAddress(address.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DeviceAddress {
    fn from(address: String) -> Self {
        DeviceAddress::new(address)
    }
}

impl From<DeviceAddress> for String {
    fn from(address: DeviceAddress) -> Self {
        address.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which of the two temperature characteristics a target applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetType {
    Room,
    HeatingElement,
}

impl TargetType {
    /// Mode the heater must be in for a target of this type to take effect
    pub fn manual_mode(self) -> OperatingMode {
        match self {
            TargetType::Room => OperatingMode::ManualRoom,
            TargetType::HeatingElement => OperatingMode::ManualHeatingElement,
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Room => f.write_str("room"),
            TargetType::HeatingElement => f.write_str("heating-element"),
        }
    }
}

impl FromStr for TargetType {
    type Err = HeaterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "room" => Ok(TargetType::Room),
            "heating-element" | "element" => Ok(TargetType::HeatingElement),
            other => Err(HeaterError::Validation(format!(
                "unknown target type '{}', expected 'room' or 'heating-element'",
                other
            ))),
        }
    }
}

/// Current and target temperature from one 4-byte characteristic
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureReading {
    pub current: f64,
    pub target: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceTemperatures {
    pub room: TemperatureReading,
    pub heating_element: TemperatureReading,
}

/// Everything a status read returns for one heater
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub mode: ModeReading,
    pub temperatures: DeviceTemperatures,
}

#[derive(Debug)]
pub enum Outcome {
    Succeeded,
    Failed(HeaterError),
    /// Skipped because the fan-out was cancelled before this device started
    Cancelled,
}

#[derive(Debug)]
pub struct RoomOperationResult {
    pub address: DeviceAddress,
    pub outcome: Outcome,
    pub status: Option<DeviceStatus>,
}

impl RoomOperationResult {
    pub fn succeeded(address: DeviceAddress, status: Option<DeviceStatus>) -> Self {
        RoomOperationResult {
            address,
            outcome: Outcome::Succeeded,
            status,
        }
    }

    pub fn failed(address: DeviceAddress, error: HeaterError) -> Self {
        RoomOperationResult {
            address,
            outcome: Outcome::Failed(error),
            status: None,
        }
    }

    pub fn cancelled(address: DeviceAddress) -> Self {
        RoomOperationResult {
            address,
            outcome: Outcome::Cancelled,
            status: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Succeeded)
    }

    pub fn error(&self) -> Option<&HeaterError> {
        match &self.outcome {
            Outcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Per-device results of one room command, in registry order
#[derive(Debug)]
pub struct RoomReport {
    pub room: String,
    pub results: Vec<RoomOperationResult>,
    pub completed_at: OffsetDateTime,
}

impl RoomReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.error().is_some()).count()
    }

    pub fn cancelled(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Cancelled))
            .count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.is_success())
    }

    /// Some devices took the command and some did not
    pub fn is_partial_failure(&self) -> bool {
        self.succeeded() > 0 && self.succeeded() < self.results.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_normalised() {
        let address = DeviceAddress::new("  cc:22:37:11:1e:84 ");
        assert_eq!(address.as_str(), "CC:22:37:11:1E:84");
        assert_eq!(address, DeviceAddress::from("CC:22:37:11:1E:84".to_string()));
    }

    #[test]
    fn target_type_parsing() {
        assert_eq!("room".parse::<TargetType>().unwrap(), TargetType::Room);
        assert_eq!(
            "heating_element".parse::<TargetType>().unwrap(),
            TargetType::HeatingElement
        );
        assert!(matches!(
            "floor".parse::<TargetType>(),
            Err(HeaterError::Validation(_))
        ));
        assert_eq!(
            TargetType::HeatingElement.manual_mode(),
            OperatingMode::ManualHeatingElement
        );
    }

    #[test]
    fn report_counts() {
        let a = DeviceAddress::new("AA:00:00:00:00:01");
        let b = DeviceAddress::new("AA:00:00:00:00:02");
        let c = DeviceAddress::new("AA:00:00:00:00:03");
        let report = RoomReport {
            room: "bathroom".into(),
            results: vec![
                RoomOperationResult::succeeded(a, None),
                RoomOperationResult::failed(b.clone(), HeaterError::Connection {
                    address: b,
                    reason: "gone".into(),
                }),
                RoomOperationResult::cancelled(c),
            ],
            completed_at: OffsetDateTime::now_utc(),
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.cancelled(), 1);
        assert!(report.is_partial_failure());
        assert!(!report.all_succeeded());
    }
}
