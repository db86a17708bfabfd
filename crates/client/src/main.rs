//! usbip-client
//!
//! Command line front end for the USB/IP client: attach and detach remote
//! devices, and list imported or exported devices.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use client::config::expand_path;
use client::{
    ClientConfig, ExportedDevice, ImportSession, ImportedDevice, SysfsOpener, detach_port,
    list_exported, list_imported,
};
use common::setup_logging;
use protocol::{BusId, DeviceSpeed};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(name = "usbip-client")]
#[command(author, version, about = "USB/IP client - use USB devices attached to remote hosts")]
#[command(long_about = "
Imports USB devices exported by a USB/IP host so they appear locally attached,
through the vhci_hcd virtual host controller.

EXAMPLES:
    # List the devices a host exports
    usbip-client list -r 192.168.1.10

    # Import one of them and print only the local port
    usbip-client attach -r 192.168.1.10 -b 1-1.4 --terse

    # Show imported devices, then detach one
    usbip-client port
    usbip-client detach -p 0

CONFIGURATION:
    The client looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usbip-client/client.toml
    3. /etc/usbip-client/client.toml
    4. Built-in defaults

EXIT STATUS:
    0 success, 2 host or driver unreachable, 3 operation failed,
    4 device attached but forwarding could not start
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a device from a remote host
    Attach {
        /// Host exporting the device
        #[arg(short, long, value_name = "HOST")]
        remote: String,

        /// Bus id of the device on the host
        #[arg(short, long, value_name = "BUSID")]
        busid: BusId,

        /// Serial recorded for the attached device
        #[arg(long, value_name = "SERIAL")]
        serial: Option<String>,

        /// Print only the local port number
        #[arg(long)]
        terse: bool,
    },

    /// Detach an imported device
    Detach {
        /// Local port to release
        #[arg(short, long, value_name = "PORT")]
        port: u16,
    },

    /// List imported devices
    Port,

    /// List devices exported by one or more hosts
    List {
        /// Hosts to query
        #[arg(short, long, value_name = "HOST", required = true, num_args = 1..)]
        remote: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("usbip-client: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = ClientConfig::default();
        let path = match &args.config {
            Some(path) => expand_path(path),
            None => ClientConfig::default_path(),
        };
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let config = match &args.config {
        Some(path) => {
            ClientConfig::load(Some(expand_path(path))).context("Failed to load configuration")?
        }
        None => ClientConfig::load_or_default(),
    };

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.client.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    debug!("usbip-client v{}", env!("CARGO_PKG_VERSION"));

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(ExitCode::from(1));
    };

    let config = Arc::new(config);
    let outcome = match command {
        Command::Attach {
            remote,
            busid,
            serial,
            terse,
        } => attach(config, remote, busid, serial, terse).await?,
        Command::Detach { port } => detach(config, port).await?,
        Command::Port => port(config).await?,
        Command::List { remote } => list(config, remote).await?,
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            error!("{}", e);
            eprintln!("usbip-client: {}", e);
            Ok(ExitCode::from(e.exit_code()))
        }
    }
}

/// Run a blocking operation on the blocking pool
async fn blocking<T, F>(f: F) -> Result<client::Result<T>>
where
    T: Send + 'static,
    F: FnOnce() -> client::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Operation task failed")
}

async fn attach(
    config: Arc<ClientConfig>,
    remote: String,
    busid: BusId,
    serial: Option<String>,
    terse: bool,
) -> Result<client::Result<()>> {
    let host = remote.clone();
    let id = busid.clone();
    let result = blocking(move || {
        let connector = config.connector();
        let opener = SysfsOpener::new(&config.vhci.sysfs_root);
        let forwarder = config.forwarder();

        ImportSession::new(&connector, &opener, &forwarder)
            .with_max_descriptor_size(config.vhci.max_descriptor_size)
            .attach(&host, &id, serial.as_deref())
    })
    .await?;

    Ok(result.map(|port| {
        if terse {
            println!("{}", port);
        } else {
            println!("Attached {} from {} on port {}", busid, remote, port);
        }
    }))
}

async fn detach(config: Arc<ClientConfig>, port: u16) -> Result<client::Result<()>> {
    let result = blocking(move || detach_port(&SysfsOpener::new(&config.vhci.sysfs_root), port)).await?;
    Ok(result.map(|()| println!("Port {} detached", port)))
}

async fn port(config: Arc<ClientConfig>) -> Result<client::Result<()>> {
    let result = blocking(move || {
        let names = config.usb_ids();
        list_imported(&SysfsOpener::new(&config.vhci.sysfs_root), &names)
    })
    .await?;

    Ok(result.map(|devices| print_imported(&devices)))
}

/// Query every host concurrently; print what succeeded, fail with the first error
async fn list(config: Arc<ClientConfig>, hosts: Vec<String>) -> Result<client::Result<()>> {
    let names = Arc::new(config.usb_ids());

    let tasks: Vec<_> = hosts
        .into_iter()
        .map(|host| {
            let config = Arc::clone(&config);
            let names = Arc::clone(&names);
            let query = host.clone();
            let task = blocking(move || list_exported(&config.connector(), &query, &*names));
            (host, tokio::spawn(task))
        })
        .collect();

    println!("Exportable USB devices");
    println!("======================");

    let mut first_error = None;
    for (host, task) in tasks {
        match task.await.context("List task failed")?? {
            Ok(devices) => print_exported(&host, &devices),
            Err(e) => {
                error!("Listing {} failed: {}", host, e);
                eprintln!("usbip-client: {}: {}", host, e);
                first_error.get_or_insert(e);
            }
        }
    }

    Ok(first_error.map_or(Ok(()), Err))
}

fn speed_label(speed: DeviceSpeed) -> &'static str {
    match speed {
        DeviceSpeed::Low => "Low Speed(1.5Mbps)",
        DeviceSpeed::Full => "Full Speed(12Mbps)",
        DeviceSpeed::High => "High Speed(480Mbps)",
        DeviceSpeed::Wireless => "Wireless",
        DeviceSpeed::Super => "Super Speed(5000Mbps)",
        DeviceSpeed::SuperPlus => "Super Speed Plus(10000Mbps)",
        DeviceSpeed::Unknown => "Unknown Speed",
    }
}

fn print_imported(devices: &[ImportedDevice]) {
    println!("Imported USB devices");
    println!("====================");
    for device in devices {
        println!(
            "Port {:02}: <{}> at {}",
            device.port,
            device.state,
            speed_label(device.speed)
        );
        println!("       {}", device.product_name);
    }
    info!("{} imported device(s)", devices.len());
}

fn print_exported(host: &str, devices: &[ExportedDevice]) {
    println!(" - {}", host);
    if devices.is_empty() {
        println!("       no exportable devices found");
        return;
    }

    for device in devices {
        let width = device.busid.len();
        println!("{:>8}: {}", device.busid, device.product_name);
        println!("{:>w$}: {}", "", device.path, w = width.max(8));
        println!("{:>w$}: {}", "", device.class_name, w = width.max(8));
        for (i, iface) in device.interfaces.iter().enumerate() {
            println!("{:>w$}: {:2} - {}", "", i, iface, w = width.max(8));
        }
        println!();
    }
}
