use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tokio::time::Duration;

use radiator_ble::bluetooth::scanner::HEATER_NAME_PREFIX;
use radiator_ble::bluetooth::{enumerate_fields, scan_for_heaters, BluezTransport};
use radiator_ble::config::HeaterConfig;
use radiator_ble::utils::{describe_result, summarize_report};
use radiator_ble::{
    CancelToken, DeviceAddress, OperatingMode, ProtocolProfile, RoomController, RoomRegistry,
    TargetType,
};

#[derive(Parser)]
#[command(name = "radiator-ble")]
#[command(about = "Room-level control of Bluetooth radiators")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured rooms and their heaters
    Rooms,
    /// Read mode and temperatures of every heater in a room
    Status { room: String },
    /// Set the operating mode of every heater in a room
    SetMode {
        room: String,
        /// off, manual_room, manual_heating_element, schedule_room or schedule_heating_element
        mode: OperatingMode,
    },
    /// Set the target temperature of every heater in a room
    SetTemp {
        room: String,
        celsius: f64,
        /// room or heating-element
        #[arg(short, long, default_value = "room")]
        target: TargetType,
    },
    /// Dump every readable characteristic of one heater
    Fields { address: String },
    /// Scan for nearby heaters
    Scan {
        /// Scan duration in seconds
        #[arg(short, long)]
        duration: Option<u64>,
        /// Report every device, not only heaters
        #[arg(long)]
        all: bool,
    },
}

async fn run_room_command(
    config: &HeaterConfig,
    command: Commands,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = RoomRegistry::load(&config.rooms_file)?;
    let profile = ProtocolProfile::resolve(&config.profile)?;
    let transport = BluezTransport::new(config.adapter.as_deref()).await?;
    let controller =
        RoomController::new(registry, profile, transport, config.controller_options())?;

    // Ctrl+C stops heaters that have not been started yet
    let cancel = CancelToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, skipping heaters not yet started");
            on_ctrl_c.cancel();
        }
    });

    let report = match command {
        Commands::Status { room } => controller.read_room(&room, &cancel).await?,
        Commands::SetMode { room, mode } => controller.set_room_mode(&room, mode, &cancel).await?,
        Commands::SetTemp {
            room,
            celsius,
            target,
        } => {
            controller
                .set_room_temperature(&room, celsius, target, &cancel)
                .await?
        }
        _ => return Ok(()),
    };

    for result in &report.results {
        println!("{}", describe_result(result));
    }
    println!("{}", summarize_report(&report));

    if report.all_succeeded() {
        Ok(())
    } else {
        Err(format!(
            "{} of {} heaters in '{}' did not complete",
            report.results.len() - report.succeeded(),
            report.results.len(),
            report.room
        )
        .into())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = match HeaterConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    match cli.command {
        Commands::Rooms => {
            let registry = RoomRegistry::load(&config.rooms_file)?;
            for room in registry.room_names() {
                let devices: Vec<String> = registry
                    .devices(room)?
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                println!("{}: {}", room, devices.join(", "));
            }
        }
        Commands::Fields { address } => {
            let profile = ProtocolProfile::resolve(&config.profile)?;
            let transport = BluezTransport::new(config.adapter.as_deref()).await?;
            let fields = enumerate_fields(
                &transport,
                &profile,
                &DeviceAddress::new(address),
                config.controller_options().timeouts,
            )
            .await?;
            for (uuid, field) in &fields {
                let value = match (&field.value_hex, &field.error) {
                    (Some(hex), _) => hex.clone(),
                    (None, Some(e)) => format!("<{}>", e),
                    (None, None) => String::new(),
                };
                println!(
                    "{} [service {}] {}: {}",
                    uuid, field.service, field.description, value
                );
            }
        }
        Commands::Scan { duration, all } => {
            let transport = BluezTransport::new(config.adapter.as_deref()).await?;
            let duration = duration
                .map(Duration::from_secs)
                .unwrap_or(config.scan_duration);
            let prefix = if all { None } else { Some(HEATER_NAME_PREFIX) };
            let devices = scan_for_heaters(transport.adapter(), duration, prefix).await?;
            for device in &devices {
                println!(
                    "{}  {}  {}",
                    device.address,
                    device.name.as_deref().unwrap_or("Unknown"),
                    device
                        .rssi
                        .map(|r| format!("{} dBm", r))
                        .unwrap_or_else(|| "N/A".to_string())
                );
            }
            info!("Scan found {} devices", devices.len());
        }
        command => run_room_command(&config, command).await?,
    }

    Ok(())
}
