/// Temperature characteristic payload codec
use log::debug;

use crate::error::{HeaterError, Result};
use crate::models::TemperatureReading;

/// Length of both temperature characteristics
pub const PAYLOAD_LEN: usize = 4;

// Counts on the wire are tenths of a degree
const SCALE: f64 = 10.0;

// Relative distance to a whole count still treated as float error, e.g. 20.3 * 10 = 202.99999...
const REPRESENTATION_EPSILON: f64 = 1e-9;

/// Decode a temperature characteristic
///
/// The payload is two unsigned 16-bit little-endian counts of tenths of a degree:
/// - Bytes 0-1: Current temperature
/// - Bytes 2-3: Target temperature
///
/// Extra trailing bytes are ignored.
pub fn decode_temperature(data: &[u8]) -> Result<TemperatureReading> {
    if data.len() < PAYLOAD_LEN {
        return Err(HeaterError::Encoding(format!(
            "temperature payload must be {} bytes, got {}",
            PAYLOAD_LEN,
            data.len()
        )));
    }

    let current = u16::from_le_bytes([data[0], data[1]]);
    let target = u16::from_le_bytes([data[2], data[3]]);

    let reading = TemperatureReading {
        current: round_tenths(current as f64 / SCALE),
        target: round_tenths(target as f64 / SCALE),
    };
    debug!(
        "Decoded temperature {:02X?}: current={:.1}°C, target={:.1}°C",
        &data[..PAYLOAD_LEN],
        reading.current,
        reading.target
    );
    Ok(reading)
}

/// Encode a target temperature as a 16-bit little-endian count of tenths
///
/// Fractions below a tenth are truncated. Values that do not fit the count are
/// rejected rather than wrapped.
pub fn encode_temperature(celsius: f64) -> Result<[u8; 2]> {
    if !celsius.is_finite() || celsius < 0.0 {
        return Err(HeaterError::Encoding(format!(
            "temperature {} is out of representable range",
            celsius
        )));
    }

    let scaled = celsius * SCALE;
    let nearest = scaled.round();
    let tenths = if (scaled - nearest).abs() <= nearest.max(1.0) * REPRESENTATION_EPSILON {
        nearest
    } else {
        scaled.trunc()
    };
    if tenths > u16::MAX as f64 {
        return Err(HeaterError::Encoding(format!(
            "temperature {} is out of representable range (max {:.1})",
            celsius,
            u16::MAX as f64 / SCALE
        )));
    }

    Ok((tenths as u16).to_le_bytes())
}

/// Encode the full 4-byte write payload: two reserved zero bytes, then the target count
pub fn encode_temperature_payload(celsius: f64) -> Result<[u8; PAYLOAD_LEN]> {
    let [lo, hi] = encode_temperature(celsius)?;
    Ok([0x00, 0x00, lo, hi])
}

/// Round to one decimal place
pub fn round_tenths(value: f64) -> f64 {
    (value * SCALE).round() / SCALE
}
