/// Formatting helpers for reports shown by the command line front-end
use time::{format_description, OffsetDateTime};

use crate::models::{Outcome, RoomOperationResult, RoomReport};

/// Format a timestamp for human-readable output
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format.
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    format_description::parse("[day].[month].[year] - [hour]:[minute]:[second]")
        .ok()
        .and_then(|format| dt.format(&format).ok())
        .unwrap_or_else(|| dt.to_string())
}

/// One line per heater: address, outcome, and status when one was read
pub fn describe_result(result: &RoomOperationResult) -> String {
    match &result.outcome {
        Outcome::Succeeded => match &result.status {
            Some(status) => format!(
                "{}  ok  mode: {}  room: {:.1}°C (target {:.1}°C)  element: {:.1}°C (target {:.1}°C)",
                result.address,
                status.mode.mode.description(),
                status.temperatures.room.current,
                status.temperatures.room.target,
                status.temperatures.heating_element.current,
                status.temperatures.heating_element.target
            ),
            None => format!("{}  ok", result.address),
        },
        Outcome::Failed(e) => format!("{}  FAILED  {}", result.address, e),
        Outcome::Cancelled => format!("{}  cancelled", result.address),
    }
}

/// Summary line for a whole room command
pub fn summarize_report(report: &RoomReport) -> String {
    format!(
        "Room '{}' at {}: {} of {} heaters ok, {} failed, {} cancelled",
        report.room,
        format_datetime(&report.completed_at),
        report.succeeded(),
        report.results.len(),
        report.failed(),
        report.cancelled()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HeaterError;
    use crate::models::{DeviceAddress, DeviceStatus, DeviceTemperatures, TemperatureReading};
    use crate::protocol::{ModeReading, OperatingMode};
    use time::macros::datetime;

    #[test]
    fn formats_timestamp() {
        assert_eq!(
            format_datetime(&datetime!(2024-12-26 21:03:06 UTC)),
            "26.12.2024 - 21:03:06"
        );
    }

    #[test]
    fn describes_each_outcome() {
        let address = DeviceAddress::new("CC:22:37:11:26:4F");
        let status = DeviceStatus {
            mode: ModeReading {
                raw: 6,
                masked: 6,
                mode: OperatingMode::ManualHeatingElement,
            },
            temperatures: DeviceTemperatures {
                room: TemperatureReading { current: 21.0, target: 22.5 },
                heating_element: TemperatureReading { current: 38.4, target: 45.0 },
            },
        };

        let line = describe_result(&RoomOperationResult::succeeded(address.clone(), Some(status)));
        assert!(line.contains("Manual (Heating Element Temp)"));
        assert!(line.contains("room: 21.0°C (target 22.5°C)"));
        assert!(line.contains("element: 38.4°C (target 45.0°C)"));

        let line = describe_result(&RoomOperationResult::failed(
            address.clone(),
            HeaterError::Connection {
                address: address.clone(),
                reason: "rejected".into(),
            },
        ));
        assert!(line.starts_with("CC:22:37:11:26:4F  FAILED"));

        assert_eq!(
            describe_result(&RoomOperationResult::cancelled(address)),
            "CC:22:37:11:26:4F  cancelled"
        );
    }

    #[test]
    fn summarizes_report() {
        let report = RoomReport {
            room: "bathroom".into(),
            results: vec![RoomOperationResult::succeeded(
                DeviceAddress::new("CC:22:37:11:30:EC"),
                None,
            )],
            completed_at: datetime!(2024-12-26 21:03:06 UTC),
        };
        assert_eq!(
            summarize_report(&report),
            "Room 'bathroom' at 26.12.2024 - 21:03:06: 1 of 1 heaters ok, 0 failed, 0 cancelled"
        );
    }
}
