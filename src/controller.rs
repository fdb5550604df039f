/// Room-level fan-out over the heaters mapped to a room
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use log::{error, info, warn};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::bluetooth::introspect::{enumerate_fields, FieldReading};
use crate::bluetooth::session::{DeviceSession, Timeouts};
use crate::bluetooth::transport::Transport;
use crate::error::{HeaterError, Result};
use crate::models::{DeviceAddress, DeviceStatus, RoomOperationResult, RoomReport, TargetType};
use crate::protocol::temperature::encode_temperature;
use crate::protocol::{OperatingMode, ProtocolProfile};
use crate::registry::RoomRegistry;

/// Cancels a room command that is in progress
///
/// Heaters already being talked to finish (or time out) normally; heaters not
/// yet started are reported as cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Heaters contacted at the same time within one room; 1 means one after another
    pub max_parallel: usize,
    pub timeouts: Timeouts,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        ControllerOptions {
            max_parallel: 1,
            timeouts: Timeouts::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RoomCommand {
    ReadStatus,
    SetMode(OperatingMode),
    SetTemperature { celsius: f64, target: TargetType },
}

impl RoomCommand {
    async fn execute(self, session: &mut DeviceSession<'_>) -> Result<Option<DeviceStatus>> {
        match self {
            RoomCommand::ReadStatus => session.read_status().await.map(Some),
            RoomCommand::SetMode(mode) => session.set_mode(mode).await.map(|_| None),
            RoomCommand::SetTemperature { celsius, target } => session
                .apply_target_temperature(celsius, target)
                .await
                .map(|_| None),
        }
    }
}

impl fmt::Display for RoomCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomCommand::ReadStatus => f.write_str("read status"),
            RoomCommand::SetMode(mode) => write!(f, "set mode {}", mode),
            RoomCommand::SetTemperature { celsius, target } => {
                write!(f, "set {} target {:.1}°C", target, celsius)
            }
        }
    }
}

/// Runs room commands against every heater in a room
///
/// Unknown rooms, unsupported modes and out-of-range temperatures are rejected
/// before any heater is contacted. After that the command runs once per heater
/// in its own short-lived session and each outcome is recorded. One heater
/// failing never stops the others or fails the whole room, and heaters that
/// already accepted a command are not rolled back.
pub struct RoomController<T: Transport> {
    registry: RoomRegistry,
    profile: ProtocolProfile,
    transport: T,
    options: ControllerOptions,
}

impl<T: Transport> RoomController<T> {
    pub fn new(
        registry: RoomRegistry,
        profile: ProtocolProfile,
        transport: T,
        options: ControllerOptions,
    ) -> Result<Self> {
        if options.max_parallel == 0 {
            return Err(HeaterError::Config(
                "max parallel connections must be at least 1".into(),
            ));
        }
        Ok(RoomController {
            registry,
            profile,
            transport,
            options,
        })
    }

    pub fn list_rooms(&self) -> Vec<&str> {
        self.registry.room_names()
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn profile(&self) -> &ProtocolProfile {
        &self.profile
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Read mode and temperatures of every heater in a room
    pub async fn read_room(&self, room: &str, cancel: &CancelToken) -> Result<RoomReport> {
        let devices = self.registry.devices(room)?;
        Ok(self
            .fan_out(room, devices, RoomCommand::ReadStatus, cancel)
            .await)
    }

    pub async fn set_room_mode(
        &self,
        room: &str,
        mode: OperatingMode,
        cancel: &CancelToken,
    ) -> Result<RoomReport> {
        let devices = self.registry.devices(room)?;
        self.profile.encode_mode(mode)?;
        Ok(self
            .fan_out(room, devices, RoomCommand::SetMode(mode), cancel)
            .await)
    }

    /// Put every heater in the room into the manual mode for `target` and set the target
    pub async fn set_room_temperature(
        &self,
        room: &str,
        celsius: f64,
        target: TargetType,
        cancel: &CancelToken,
    ) -> Result<RoomReport> {
        let devices = self.registry.devices(room)?;
        self.profile.check_target(celsius, target)?;
        encode_temperature(celsius)?;
        self.profile.encode_mode(target.manual_mode())?;

        Ok(self
            .fan_out(
                room,
                devices,
                RoomCommand::SetTemperature { celsius, target },
                cancel,
            )
            .await)
    }

    /// Diagnostic dump of one heater's readable characteristics
    pub async fn enumerate_fields(
        &self,
        address: &DeviceAddress,
    ) -> Result<BTreeMap<Uuid, FieldReading>> {
        enumerate_fields(&self.transport, &self.profile, address, self.options.timeouts).await
    }

    async fn fan_out(
        &self,
        room: &str,
        devices: &[DeviceAddress],
        command: RoomCommand,
        cancel: &CancelToken,
    ) -> RoomReport {
        info!(
            "{} in room '{}' on {} heaters ({} at a time)",
            command,
            room,
            devices.len(),
            self.options.max_parallel
        );

        // Completion order frees slots; results are put back in registry order
        let mut indexed: Vec<(usize, RoomOperationResult)> =
            stream::iter(devices.iter().cloned().enumerate())
                .map(|(index, address)| async move {
                    (index, self.run_device(address, command, cancel).await)
                })
                .buffer_unordered(self.options.max_parallel)
                .collect()
                .await;
        indexed.sort_by_key(|(index, _)| *index);
        let results: Vec<RoomOperationResult> =
            indexed.into_iter().map(|(_, result)| result).collect();

        let report = RoomReport {
            room: room.to_string(),
            results,
            completed_at: OffsetDateTime::now_utc(),
        };

        if report.all_succeeded() {
            info!("{} in room '{}' succeeded on all heaters", command, room);
        } else {
            warn!(
                "{} in room '{}': {} succeeded, {} failed, {} cancelled",
                command,
                room,
                report.succeeded(),
                report.failed(),
                report.cancelled()
            );
        }
        report
    }

    /// One connect, the command, one disconnect
    async fn run_device(
        &self,
        address: DeviceAddress,
        command: RoomCommand,
        cancel: &CancelToken,
    ) -> RoomOperationResult {
        if cancel.is_cancelled() {
            info!("Skipping heater {}: cancelled", address);
            return RoomOperationResult::cancelled(address);
        }

        let mut session = DeviceSession::new(
            address.clone(),
            &self.profile,
            &self.transport,
            self.options.timeouts,
        );

        let result = match session.connect().await {
            Ok(()) => command.execute(&mut session).await,
            Err(e) => Err(e),
        };

        // The command outcome stands even if releasing the link fails
        let _ = session.disconnect().await;

        match result {
            Ok(status) => RoomOperationResult::succeeded(address, status),
            Err(e) => {
                error!("{} failed on heater {}: {}", command, address, e);
                RoomOperationResult::failed(address, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::mock::{MockDevice, MockTransport};
    use crate::models::Outcome;
    use crate::protocol::profile::{HEATING_ELEMENT_TEMPERATURE_UUID, MODE_UUID, ROOM_TEMPERATURE_UUID};
    use tokio::time::Duration;

    const A: &str = "CC:22:37:11:30:EC";
    const B: &str = "CC:22:37:11:5D:02";
    const C: &str = "CC:22:37:11:1E:84";
    const D: &str = "CC:22:37:11:26:4F";

    fn options(max_parallel: usize, millis: u64) -> ControllerOptions {
        ControllerOptions {
            max_parallel,
            timeouts: Timeouts {
                connect: Duration::from_millis(millis),
                operation: Duration::from_millis(millis),
            },
        }
    }

    fn controller(transport: MockTransport, max_parallel: usize) -> RoomController<MockTransport> {
        let registry = RoomRegistry::from_rooms(vec![
            ("living room", vec![A, B, C]),
            ("office", vec![A, B, C, D]),
            ("bathroom", vec![D]),
        ])
        .unwrap();
        RoomController::new(
            registry,
            ProtocolProfile::terma_wireless(),
            transport,
            options(max_parallel, 50),
        )
        .unwrap()
    }

    fn all_heaters() -> MockTransport {
        MockTransport::new()
            .with_device(A, MockDevice::idle())
            .with_device(B, MockDevice::idle())
            .with_device(C, MockDevice::idle())
            .with_device(D, MockDevice::idle())
    }

    fn addresses(report: &RoomReport) -> Vec<&str> {
        report.results.iter().map(|r| r.address.as_str()).collect()
    }

    #[tokio::test]
    async fn reads_every_heater_in_order() {
        let transport = MockTransport::new()
            .with_device(A, MockDevice::heater(5, [0xD2, 0x00, 0xDC, 0x00], [0x2C, 0x01, 0x58, 0x02]))
            .with_device(B, MockDevice::heater(6, [0xC8, 0x00, 0xDC, 0x00], [0xF4, 0x01, 0x2C, 0x01]))
            .with_device(C, MockDevice::heater(0x2A, [0xBE, 0x00, 0xDC, 0x00], [0x00, 0x00, 0x00, 0x00]));
        let controller = controller(transport, 1);

        let report = controller.read_room("living room", &CancelToken::new()).await.unwrap();

        assert_eq!(addresses(&report), vec![A, B, C]);
        assert!(report.all_succeeded());
        let modes: Vec<OperatingMode> = report
            .results
            .iter()
            .map(|r| r.status.as_ref().unwrap().mode.mode)
            .collect();
        assert_eq!(
            modes,
            vec![
                OperatingMode::ManualRoom,
                OperatingMode::ManualHeatingElement,
                OperatingMode::Unknown(0x2A)
            ]
        );
        let b = report.results[1].status.as_ref().unwrap();
        assert_eq!(b.temperatures.room.current, 20.0);
        assert_eq!(b.temperatures.heating_element.current, 50.0);
        assert_eq!(b.temperatures.heating_element.target, 30.0);

        assert_eq!(controller.transport().connects(), 3);
        assert_eq!(controller.transport().disconnects(), 3);
    }

    #[tokio::test]
    async fn one_timeout_does_not_fail_the_room() {
        let mut slow = MockDevice::idle();
        slow.hang_on.insert(MODE_UUID);
        let transport = MockTransport::new()
            .with_device(A, MockDevice::idle())
            .with_device(B, slow)
            .with_device(C, MockDevice::idle());
        let controller = controller(transport, 1);

        let report = controller
            .set_room_temperature("living room", 21.5, TargetType::Room, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert!(report.is_partial_failure());
        assert!(report.results[0].is_success());
        assert!(matches!(
            &report.results[1].outcome,
            Outcome::Failed(HeaterError::Timeout { address, .. }) if address.as_str() == B
        ));
        assert!(report.results[2].is_success());

        // Heaters before and after the slow one both got mode then temperature
        let writes = controller.transport().writes();
        let expected = |address: &str| {
            vec![
                (DeviceAddress::new(address), MODE_UUID, vec![5]),
                (DeviceAddress::new(address), ROOM_TEMPERATURE_UUID, vec![0x00, 0x00, 0xD7, 0x00]),
            ]
        };
        assert_eq!(writes, [expected(A), expected(C)].concat());
        assert_eq!(controller.transport().disconnects(), 3);
    }

    #[tokio::test]
    async fn connection_failures_are_per_device() {
        let mut refusing = MockDevice::idle();
        refusing.refuse_connect = true;
        let transport = MockTransport::new()
            .with_device(A, refusing)
            .with_device(B, MockDevice::idle());
        // C is not reachable at all
        let controller = controller(transport, 1);

        let report = controller
            .set_room_mode("living room", OperatingMode::Off, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(addresses(&report), vec![A, B, C]);
        assert!(matches!(report.results[0].error(), Some(HeaterError::Connection { .. })));
        assert!(report.results[1].is_success());
        assert!(report.results[1].status.is_none());
        assert!(matches!(report.results[2].error(), Some(HeaterError::Connection { .. })));
        assert_eq!(controller.transport().writes().len(), 1);
    }

    #[tokio::test]
    async fn unknown_room_contacts_nobody() {
        let controller = controller(all_heaters(), 1);
        let cancel = CancelToken::new();

        assert!(matches!(
            controller.read_room("garage", &cancel).await,
            Err(HeaterError::RoomNotFound(_))
        ));
        assert!(matches!(
            controller.set_room_mode("garage", OperatingMode::Off, &cancel).await,
            Err(HeaterError::RoomNotFound(_))
        ));
        assert!(matches!(
            controller
                .set_room_temperature("garage", 21.0, TargetType::Room, &cancel)
                .await,
            Err(HeaterError::RoomNotFound(_))
        ));
        assert_eq!(controller.transport().connects(), 0);
    }

    #[tokio::test]
    async fn invalid_input_contacts_nobody() {
        let controller = controller(all_heaters(), 1);
        let cancel = CancelToken::new();

        assert!(matches!(
            controller
                .set_room_temperature("bathroom", 45.0, TargetType::Room, &cancel)
                .await,
            Err(HeaterError::Validation(_))
        ));
        assert!(matches!(
            controller
                .set_room_temperature("bathroom", f64::NAN, TargetType::HeatingElement, &cancel)
                .await,
            Err(HeaterError::Validation(_))
        ));
        assert!(matches!(
            controller
                .set_room_mode("bathroom", OperatingMode::Unknown(42), &cancel)
                .await,
            Err(HeaterError::UnsupportedMode(OperatingMode::Unknown(42)))
        ));
        assert_eq!(controller.transport().connects(), 0);
    }

    #[tokio::test]
    async fn heating_element_target_uses_element_characteristic() {
        let controller = controller(all_heaters(), 1);
        let report = controller
            .set_room_temperature("bathroom", 55.0, TargetType::HeatingElement, &CancelToken::new())
            .await
            .unwrap();
        assert!(report.all_succeeded());

        let writes = controller.transport().writes();
        assert_eq!(writes.len(), 2);
        assert_eq!((writes[0].1, writes[0].2.clone()), (MODE_UUID, vec![6]));
        assert_eq!(
            (writes[1].1, writes[1].2.clone()),
            (HEATING_ELEMENT_TEMPERATURE_UUID, vec![0x00, 0x00, 0x26, 0x02])
        );
    }

    #[tokio::test]
    async fn sequential_by_default() {
        let mut transport = MockTransport::new();
        for address in [A, B, C, D] {
            let mut device = MockDevice::idle();
            device.connect_delay = Some(Duration::from_millis(10));
            transport = transport.with_device(address, device);
        }
        let controller = controller(transport, 1);

        let report = controller.read_room("office", &CancelToken::new()).await.unwrap();
        assert!(report.all_succeeded());
        assert_eq!(controller.transport().max_active(), 1);
    }

    #[tokio::test]
    async fn parallelism_is_bounded() {
        let mut transport = MockTransport::new();
        for address in [A, B, C, D] {
            let mut device = MockDevice::idle();
            device.read_delay = Some(Duration::from_millis(10));
            transport = transport.with_device(address, device);
        }
        let registry = RoomRegistry::from_rooms(vec![("office", vec![A, B, C, D])]).unwrap();
        let controller = RoomController::new(
            registry,
            ProtocolProfile::terma_wireless(),
            transport,
            options(2, 500),
        )
        .unwrap();

        let report = controller.read_room("office", &CancelToken::new()).await.unwrap();
        assert_eq!(addresses(&report), vec![A, B, C, D]);
        assert!(report.all_succeeded());
        assert_eq!(controller.transport().max_active(), 2);
    }

    #[tokio::test]
    async fn hung_heater_does_not_hold_back_free_slots() {
        let mut hung = MockDevice::idle();
        hung.hang_on.insert(MODE_UUID);
        let transport = MockTransport::new()
            .with_device(A, hung)
            .with_device(B, MockDevice::idle())
            .with_device(C, MockDevice::idle());
        let registry = RoomRegistry::from_rooms(vec![("living room", vec![A, B, C])]).unwrap();
        let controller = RoomController::new(
            registry,
            ProtocolProfile::terma_wireless(),
            transport,
            options(2, 200),
        )
        .unwrap();

        // Cancel long before A times out; C must already have started by then
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let report = controller.read_room("living room", &cancel).await.unwrap();

        assert_eq!(addresses(&report), vec![A, B, C]);
        assert!(matches!(report.results[0].error(), Some(HeaterError::Timeout { .. })));
        assert!(report.results[1].is_success());
        assert!(report.results[2].is_success());
        assert_eq!(report.cancelled(), 0);
        assert_eq!(controller.transport().connects(), 3);
    }

    #[tokio::test]
    async fn cancellation_skips_devices_not_started() {
        let cancel = CancelToken::new();
        let mut first = MockDevice::idle();
        first.cancel_on_connect = Some(cancel.clone());
        let transport = MockTransport::new()
            .with_device(A, first)
            .with_device(B, MockDevice::idle())
            .with_device(C, MockDevice::idle());
        let controller = controller(transport, 1);

        let report = controller
            .set_room_mode("living room", OperatingMode::ScheduleRoom, &cancel)
            .await
            .unwrap();

        // The heater in flight when cancelled still completes
        assert!(report.results[0].is_success());
        assert!(matches!(report.results[1].outcome, Outcome::Cancelled));
        assert!(matches!(report.results[2].outcome, Outcome::Cancelled));
        assert_eq!(report.cancelled(), 2);
        assert_eq!(report.failed(), 0);
        assert_eq!(controller.transport().connects(), 1);
    }

    #[tokio::test]
    async fn cancellation_lets_parallel_devices_finish() {
        let cancel = CancelToken::new();
        let mut first = MockDevice::idle();
        first.connect_delay = Some(Duration::from_millis(20));
        first.cancel_on_connect = Some(cancel.clone());
        let mut second = MockDevice::idle();
        second.connect_delay = Some(Duration::from_millis(60));
        let transport = MockTransport::new()
            .with_device(A, first)
            .with_device(B, second)
            .with_device(C, MockDevice::idle());
        let registry = RoomRegistry::from_rooms(vec![("living room", vec![A, B, C])]).unwrap();
        let controller = RoomController::new(
            registry,
            ProtocolProfile::terma_wireless(),
            transport,
            options(2, 500),
        )
        .unwrap();

        let report = controller.read_room("living room", &cancel).await.unwrap();

        assert!(report.results[0].is_success());
        assert!(report.results[1].is_success());
        assert!(matches!(report.results[2].outcome, Outcome::Cancelled));
        assert_eq!(controller.transport().connects(), 2);
    }

    #[tokio::test]
    async fn enumerates_fields_through_controller() {
        let controller = controller(all_heaters(), 1);
        let fields = controller
            .enumerate_fields(&DeviceAddress::new(D))
            .await
            .unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(controller.transport().disconnects(), 1);
    }

    #[test]
    fn rejects_zero_parallelism() {
        let result = RoomController::new(
            RoomRegistry::default(),
            ProtocolProfile::terma_wireless(),
            MockTransport::new(),
            options(0, 50),
        );
        assert!(matches!(result, Err(HeaterError::Config(_))));
    }
}
