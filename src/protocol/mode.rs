/// Operating mode characteristic codec
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{HeaterError, Result};

/// Heater operating modes
///
/// `Unknown` carries the raw little-endian payload value when the active mode
/// table has no entry for it, so readings from newer firmware are reported
/// instead of being guessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    Off,
    ManualRoom,
    ManualHeatingElement,
    ScheduleRoom,
    ScheduleHeatingElement,
    #[serde(skip_deserializing)]
    Unknown(u32),
}

impl OperatingMode {
    pub const NAMED: [OperatingMode; 5] = [
        OperatingMode::Off,
        OperatingMode::ManualRoom,
        OperatingMode::ManualHeatingElement,
        OperatingMode::ScheduleRoom,
        OperatingMode::ScheduleHeatingElement,
    ];

    /// Human readable label for logs and reports
    pub fn description(&self) -> String {
        match self {
            OperatingMode::Off => "Off".to_string(),
            OperatingMode::ManualRoom => "Manual (Room Temp)".to_string(),
            OperatingMode::ManualHeatingElement => "Manual (Heating Element Temp)".to_string(),
            OperatingMode::ScheduleRoom => "Schedule (Room Temp)".to_string(),
            OperatingMode::ScheduleHeatingElement => {
                "Schedule (Heating Element Temp)".to_string()
            }
            OperatingMode::Unknown(code) => format!("Unknown (code {})", code),
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingMode::Off => f.write_str("off"),
            OperatingMode::ManualRoom => f.write_str("manual_room"),
            OperatingMode::ManualHeatingElement => f.write_str("manual_heating_element"),
            OperatingMode::ScheduleRoom => f.write_str("schedule_room"),
            OperatingMode::ScheduleHeatingElement => f.write_str("schedule_heating_element"),
            OperatingMode::Unknown(code) => write!(f, "unknown({})", code),
        }
    }
}

impl FromStr for OperatingMode {
    type Err = HeaterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let name = s.trim().to_lowercase().replace('-', "_");
        OperatingMode::NAMED
            .into_iter()
            .find(|mode| mode.to_string() == name)
            .ok_or_else(|| {
                let known: Vec<String> = OperatingMode::NAMED.iter().map(|m| m.to_string()).collect();
                HeaterError::Validation(format!(
                    "unknown mode '{}', expected one of: {}",
                    s.trim(),
                    known.join(", ")
                ))
            })
    }
}

/// Payload width used when writing the mode characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeWriteLayout {
    #[default]
    SingleByte,
    /// Code in byte 0 followed by three zero bytes
    FourBytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeEntry {
    pub code: u8,
    pub mode: OperatingMode,
}

/// Wire code to mode mapping for one firmware revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ModeEntry>", into = "Vec<ModeEntry>")]
pub struct ModeTable {
    entries: Vec<ModeEntry>,
}

impl ModeTable {
    /// Build a table, rejecting duplicate codes, duplicate modes and `Unknown` entries
    pub fn new(entries: Vec<ModeEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(HeaterError::Config("mode table is empty".into()));
        }

        let mut codes = HashSet::new();
        let mut modes = HashSet::new();
        for entry in &entries {
            if let OperatingMode::Unknown(code) = entry.mode {
                return Err(HeaterError::Config(format!(
                    "mode table cannot map code {} to an unknown mode",
                    code
                )));
            }
            if !codes.insert(entry.code) {
                return Err(HeaterError::Config(format!(
                    "mode table maps code {} more than once",
                    entry.code
                )));
            }
            if !modes.insert(entry.mode) {
                return Err(HeaterError::Config(format!(
                    "mode table maps {} more than once",
                    entry.mode
                )));
            }
        }

        Ok(ModeTable { entries })
    }

    pub fn from_pairs(pairs: &[(u8, OperatingMode)]) -> Result<Self> {
        ModeTable::new(
            pairs
                .iter()
                .map(|&(code, mode)| ModeEntry { code, mode })
                .collect(),
        )
    }

    pub fn lookup(&self, code: u8) -> OperatingMode {
        self.entries
            .iter()
            .find(|e| e.code == code)
            .map(|e| e.mode)
            .unwrap_or(OperatingMode::Unknown(u32::from(code)))
    }

    pub fn code_for(&self, mode: OperatingMode) -> Option<u8> {
        self.entries.iter().find(|e| e.mode == mode).map(|e| e.code)
    }

    pub fn entries(&self) -> &[ModeEntry] {
        &self.entries
    }
}

impl TryFrom<Vec<ModeEntry>> for ModeTable {
    type Error = HeaterError;

    fn try_from(entries: Vec<ModeEntry>) -> Result<Self> {
        ModeTable::new(entries)
    }
}

impl From<ModeTable> for Vec<ModeEntry> {
    fn from(table: ModeTable) -> Self {
        table.entries
    }
}

/// Longest mode payload the heaters send
pub const MAX_MODE_PAYLOAD_LEN: usize = 4;

/// Decoded mode characteristic, keeping the raw value for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeReading {
    /// Whole payload read as a little-endian integer
    pub raw: u32,
    /// Code looked up in the mode table
    pub masked: u32,
    pub mode: OperatingMode,
}

/// Decode a mode characteristic payload
///
/// The code lives in byte 0 and `mask` (default 0xFF) applies to it. A payload
/// with any non-zero byte after the first is not a table code and decodes as
/// `Unknown` carrying the full little-endian value.
pub fn decode_mode(data: &[u8], table: &ModeTable, mask: Option<u8>) -> Result<ModeReading> {
    if data.is_empty() || data.len() > MAX_MODE_PAYLOAD_LEN {
        return Err(HeaterError::Encoding(format!(
            "mode payload must be 1 to {} bytes, got {}",
            MAX_MODE_PAYLOAD_LEN,
            data.len()
        )));
    }

    let mut bytes = [0u8; MAX_MODE_PAYLOAD_LEN];
    bytes[..data.len()].copy_from_slice(data);
    let raw = u32::from_le_bytes(bytes);

    let reading = if data[1..].iter().any(|b| *b != 0) {
        debug!("Mode payload {:02X?} has non-zero trailing bytes", data);
        ModeReading {
            raw,
            masked: raw,
            mode: OperatingMode::Unknown(raw),
        }
    } else {
        let code = data[0] & mask.unwrap_or(0xFF);
        ModeReading {
            raw,
            masked: u32::from(code),
            mode: table.lookup(code),
        }
    };
    debug!(
        "Decoded mode 0x{:08X} (masked 0x{:02X}) as {}",
        raw,
        reading.masked,
        reading.mode.description()
    );
    Ok(reading)
}

/// Encode a mode for writing
pub fn encode_mode(mode: OperatingMode, table: &ModeTable, layout: ModeWriteLayout) -> Result<Vec<u8>> {
    let code = table
        .code_for(mode)
        .ok_or(HeaterError::UnsupportedMode(mode))?;

    Ok(match layout {
        ModeWriteLayout::SingleByte => vec![code],
        ModeWriteLayout::FourBytes => vec![code, 0x00, 0x00, 0x00],
    })
}
