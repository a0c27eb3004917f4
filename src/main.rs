use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use zyd_rs::{
    init_logger, run_upload, Advertisement, BtleplugTransport, CancelHandle, ConnectionSession,
    FirmwareImage, SessionEvent, UploadEvent,
};

#[derive(Parser)]
#[command(name = "zyd-cli")]
#[command(about = "CLI tool for ZYD e-scooter BLE protocol")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby ZYD controllers
    Scan {
        /// Scan window in seconds
        #[arg(short, long, default_value = "3")]
        duration: u64,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Connect and print device identity and firmware versions
    Info {
        address: String,
        #[arg(long)]
        json: bool,
    },
    /// Connect and stream decoded telemetry
    Monitor {
        address: String,
        /// How long to monitor, in seconds
        #[arg(short, long, default_value = "30")]
        duration: u64,
    },
    /// Upload a firmware image to the controller
    Upload {
        address: String,
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { duration, json } => {
            let transport = BtleplugTransport::new().await?;
            let (mut session, _events) = ConnectionSession::new(transport);
            let devices = session
                .scan_with_window(Duration::from_secs(duration))
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("no ZYD controllers found");
            } else {
                for device in devices {
                    println!(
                        "{}  {}  rssi={}",
                        device.address,
                        device.name,
                        device.rssi.map_or("?".into(), |r| r.to_string())
                    );
                }
            }
        }

        Commands::Info { address, json } => {
            let (mut session, mut events) = connect_to(&address).await?;
            let identity = session
                .device_identity()
                .cloned()
                .context("no device identity after connect")?;

            let printer = tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    match event {
                        SessionEvent::Version(version) => {
                            if json {
                                if let Ok(s) = serde_json::to_string_pretty(&version) {
                                    println!("{s}");
                                }
                            } else {
                                println!("versions: {version}");
                            }
                        }
                        SessionEvent::Disconnected { .. } => break,
                        _ => {}
                    }
                }
            });

            if json {
                println!("{}", serde_json::to_string_pretty(&identity)?);
            } else {
                println!(
                    "{} ({})  serial={}{}  mtu={}",
                    identity.name,
                    identity.address,
                    identity.serial_number,
                    if identity.serial_is_fallback { " (fallback)" } else { "" },
                    identity.mtu,
                );
            }

            let seen = session.request_version_with_retry().await?;
            if !seen {
                eprintln!("no version response from controller");
            }
            session.disconnect().await?;
            printer.await?;
        }

        Commands::Monitor { address, duration } => {
            let (mut session, mut events) = connect_to(&address).await?;

            let printer = tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    match event {
                        SessionEvent::RunningData(data) => println!("running: {data}"),
                        SessionEvent::BmsData(data) => println!("bms: {data}"),
                        SessionEvent::Config(config) => println!("config: {config}"),
                        SessionEvent::Version(version) => println!("versions: {version}"),
                        SessionEvent::Unknown { command, .. } => {
                            println!("unknown packet 0x{command:02X}")
                        }
                        SessionEvent::Disconnected { expected } => {
                            if !expected {
                                eprintln!("link lost");
                            }
                            break;
                        }
                    }
                }
            });

            let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);
            while tokio::time::Instant::now() < deadline {
                session.request_running_data().await?;
                tokio::time::sleep(Duration::from_secs(1)).await;
                session.request_bms_data().await?;
                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            session.disconnect().await?;
            printer.await?;
        }

        Commands::Upload { address, file } => {
            let data = std::fs::read(&file)
                .with_context(|| format!("reading firmware image {}", file.display()))?;
            let image = FirmwareImage::new(data)?;
            println!(
                "image: {} bytes, {} packets",
                image.len(),
                image.total_packets()
            );

            let (mut session, _events) = connect_to(&address).await?;

            let (upload_tx, mut upload_rx) = tokio::sync::mpsc::unbounded_channel();
            let cancel = CancelHandle::new();

            let ctrlc_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\ncancelling upload...");
                    ctrlc_cancel.cancel();
                }
            });

            let printer = tokio::spawn(async move {
                while let Some(event) = upload_rx.recv().await {
                    match event {
                        UploadEvent::Started { image_size, total_packets } => {
                            println!("uploading {image_size} bytes in {total_packets} packets")
                        }
                        UploadEvent::Progress { packets_sent, total_packets, percent } => {
                            println!("progress: {packets_sent}/{total_packets} ({percent}%)")
                        }
                        UploadEvent::StateChanged(state) => println!("phase: {state:?}"),
                        UploadEvent::Log { message, .. } => println!("{message}"),
                        UploadEvent::Completed => println!("upload completed"),
                        UploadEvent::Cancelled => println!("upload cancelled"),
                        UploadEvent::Failed { reason } => println!("upload failed: {reason}"),
                    }
                }
            });

            let result = run_upload(&mut session, image, upload_tx, cancel).await;
            session.disconnect().await?;
            printer.await?;
            result?;
        }
    }

    Ok(())
}

/// Scan for the given address and connect to it.
async fn connect_to(
    address: &str,
) -> anyhow::Result<(
    ConnectionSession<BtleplugTransport>,
    tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
)> {
    let transport = BtleplugTransport::new().await?;
    let (mut session, events) = ConnectionSession::new(transport);

    let devices = session.scan().await?;
    let device: Advertisement = match devices.into_iter().find(|d| d.address == address) {
        Some(device) => device,
        None => bail!("controller {address} not found in scan"),
    };

    session.connect(&device).await?;
    Ok((session, events))
}
