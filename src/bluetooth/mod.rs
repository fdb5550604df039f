pub mod bluez;
pub mod introspect;
#[cfg(test)]
pub mod mock;
pub mod scanner;
pub mod session;
pub mod transport;

pub use bluez::BluezTransport;
pub use introspect::{enumerate_fields, FieldReading};
pub use scanner::{scan_for_heaters, DiscoveredDevice};
pub use session::{DeviceSession, SessionState, Timeouts};
pub use transport::{CharacteristicInfo, GattLink, Transport};
