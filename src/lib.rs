pub mod bluetooth;
pub mod config;
pub mod controller;
pub mod error;
pub mod models;
pub mod protocol;
pub mod registry;
pub mod utils;

pub use controller::{CancelToken, ControllerOptions, RoomController};
pub use error::{HeaterError, Result};
pub use models::{DeviceAddress, Outcome, RoomOperationResult, RoomReport, TargetType};
pub use protocol::{OperatingMode, ProtocolProfile};
pub use registry::RoomRegistry;
