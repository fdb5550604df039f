use std::env;
use std::path::PathBuf;

use log::debug;
use tokio::time::Duration;

use crate::bluetooth::session::Timeouts;
use crate::controller::ControllerOptions;
use crate::error::{HeaterError, Result};
use crate::protocol::DEFAULT_PROFILE;

const DEFAULT_ROOMS_FILE: &str = "rooms.json";
const DEFAULT_MAX_PARALLEL: usize = 1;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 5;
const DEFAULT_SCAN_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct HeaterConfig {
    pub rooms_file: PathBuf,
    /// Built-in profile name or path to a `.json` profile
    pub profile: String,
    pub adapter: Option<String>,
    pub max_parallel: usize,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub scan_duration: Duration,
}

impl HeaterConfig {
    /// Load configuration from the environment, reading `.env` first if present
    pub fn new() -> Result<Self> {
        dotenv::dotenv().ok();
        HeaterConfig::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let config = HeaterConfig {
            rooms_file: get("HEATER_ROOMS_FILE")
                .unwrap_or_else(|| DEFAULT_ROOMS_FILE.to_string())
                .into(),
            profile: get("HEATER_PROFILE").unwrap_or_else(|| DEFAULT_PROFILE.to_string()),
            adapter: get("HEATER_ADAPTER"),
            max_parallel: positive(
                "HEATER_MAX_PARALLEL",
                get("HEATER_MAX_PARALLEL"),
                DEFAULT_MAX_PARALLEL as u64,
            )? as usize,
            connect_timeout: Duration::from_secs(positive(
                "HEATER_CONNECT_TIMEOUT_SECS",
                get("HEATER_CONNECT_TIMEOUT_SECS"),
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?),
            operation_timeout: Duration::from_secs(positive(
                "HEATER_OPERATION_TIMEOUT_SECS",
                get("HEATER_OPERATION_TIMEOUT_SECS"),
                DEFAULT_OPERATION_TIMEOUT_SECS,
            )?),
            scan_duration: Duration::from_secs(positive(
                "HEATER_SCAN_SECS",
                get("HEATER_SCAN_SECS"),
                DEFAULT_SCAN_SECS,
            )?),
        };

        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            max_parallel: self.max_parallel,
            timeouts: Timeouts {
                connect: self.connect_timeout,
                operation: self.operation_timeout,
            },
        }
    }
}

fn positive(key: &str, value: Option<String>, default: u64) -> Result<u64> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(HeaterError::Config(format!(
            "{} must be a positive integer, got '{}'",
            key, value
        ))),
    }
}
