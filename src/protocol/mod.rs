pub mod mode;
pub mod profile;
pub mod temperature;

pub use mode::{ModeEntry, ModeReading, ModeTable, ModeWriteLayout, OperatingMode};
pub use profile::{ProtocolProfile, TemperatureLimits, TemperatureRange, DEFAULT_PROFILE};
pub use temperature::{decode_temperature, encode_temperature, encode_temperature_payload};
