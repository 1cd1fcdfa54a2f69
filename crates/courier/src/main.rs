//! usb-courier
//!
//! Watches for removable storage and, when configured, copies a file onto
//! each newly mounted device before ejecting it.

use anyhow::{Context, Result};
use clap::Parser;
use common::{Device, create_signal_bridge, setup_logging};
use courier::config::CourierConfig;
use courier::{
    DeviceWatcher, EventPayload, LifecycleEvent, LsblkEnumerator, SnapshotService,
    spawn_hotplug_thread,
};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "usb-courier")]
#[command(
    author,
    version,
    about = "USB courier - Copy a file onto removable storage as it is plugged in"
)]
#[command(long_about = "
Watches USB hotplug events, waits for newly attached storage devices to be
mounted and reports each step. With a source file configured it copies the
file onto the first new device and ejects it.

EXAMPLES:
    # Watch and report events only
    usb-courier

    # Copy a file onto every new drive, then eject
    usb-courier --file ~/pic.jpg

    # Copy but leave the drive mounted
    usb-courier --file ~/pic.jpg --no-eject

    # List removable storage and exit
    usb-courier --list-devices

CONFIGURATION:
    The courier looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-courier/courier.toml
    3. /etc/usb-courier/courier.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List removable storage devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Print the device list as JSON (with --list-devices)
    #[arg(long, requires = "list_devices")]
    json: bool,

    /// File to copy onto each newly mounted device
    #[arg(short, long, value_name = "PATH")]
    file: Option<String>,

    /// Leave devices mounted after copying
    #[arg(long)]
    no_eject: bool,

    /// Samples each poller takes before giving up
    #[arg(long, value_name = "N")]
    max_tries: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = CourierConfig::default();
        let path = CourierConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        CourierConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        CourierConfig::load_or_default()
    };

    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    setup_logging(&config.watcher.log_level).context("Failed to setup logging")?;

    info!("usb-courier v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", config.watcher.log_level);

    if args.list_devices {
        return list_devices_mode(args.json).await;
    }

    run_watcher(config).await
}

/// Command-line flags take precedence over the configuration file
fn apply_overrides(config: &mut CourierConfig, args: &Args) {
    if let Some(level) = &args.log_level {
        config.watcher.log_level = level.clone();
    }
    if let Some(max_tries) = args.max_tries {
        config.watcher.max_tries = max_tries;
    }
    if let Some(file) = &args.file {
        config.transfer.source_file = Some(file.clone());
    }
    if args.no_eject {
        config.transfer.eject_after_move = false;
    }
}

/// List removable storage and exit
async fn list_devices_mode(json: bool) -> Result<()> {
    info!("Listing removable storage devices...");

    let devices = SnapshotService::new(LsblkEnumerator::new())
        .list()
        .await
        .context("Failed to enumerate storage devices")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&devices).context("Failed to serialize device list")?
        );
        return Ok(());
    }

    if devices.is_empty() {
        println!("No removable storage devices found.");
    } else {
        println!("Found {} removable storage device(s):\n", devices.len());
        for device in &devices {
            println!(
                "  {} - {}",
                device.id,
                device.description.as_deref().unwrap_or("Unknown Model")
            );
            if device.mountpoints.is_empty() {
                println!("      Not mounted");
            }
            for mountpoint in &device.mountpoints {
                println!("      Mounted at {}", mountpoint.path.display());
            }
            println!();
        }
    }

    Ok(())
}

/// Watch for hotplug signals until Ctrl+C
async fn run_watcher(config: CourierConfig) -> Result<()> {
    let watcher = DeviceWatcher::with_defaults(LsblkEnumerator::new(), config.watch_options()?);

    let options = watcher.options();
    info!(
        "Polling up to {} times, {:?} apart",
        options.budget.max_tries, options.budget.delay
    );
    if let Some(source) = &options.source_file {
        info!("Copying {} onto new devices", source.display());
        if !source.exists() {
            warn!("Source file {} does not exist yet", source.display());
        }
    }
    register_console_subscribers(&watcher);

    let (sender, receiver) = create_signal_bridge();
    let hotplug = spawn_hotplug_thread(sender).context("Failed to start USB hotplug thread")?;

    let watcher_handle = tokio::spawn(watcher.run(receiver));

    info!("Watching for removable storage, press Ctrl+C to stop");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(e) => {
            error!("Error waiting for Ctrl+C: {}", e);
        }
    }

    // Joining the hotplug thread blocks for up to one event-loop timeout
    match tokio::task::spawn_blocking(move || hotplug.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("USB hotplug thread error: {}", e),
        Err(e) => error!("Failed to join USB hotplug thread: {}", e),
    }

    watcher_handle.abort();

    info!("Shutdown complete");
    Ok(())
}

fn register_console_subscribers<E, R, S>(watcher: &DeviceWatcher<E, R, S>)
where
    E: courier::DeviceEnumerator,
    R: courier::CommandRunner,
    S: courier::Sleeper,
{
    let hub = watcher.hub();

    hub.subscribe(LifecycleEvent::Checking, |_| println!("checking"));
    hub.subscribe(LifecycleEvent::Mounting, |_| println!("mounting"));
    hub.subscribe(LifecycleEvent::Mounted, |payload| {
        if let EventPayload::Devices(devices) = payload {
            println!("mounted: {}", describe(devices));
        }
    });
    hub.subscribe(LifecycleEvent::Uploading, |payload| {
        if let EventPayload::Device(device) = payload {
            println!("uploading to {}", device.id);
        }
    });
    hub.subscribe(LifecycleEvent::Uploaded, |payload| {
        if let EventPayload::Device(device) = payload {
            println!("uploaded to {}", device.id);
        }
    });
    hub.subscribe(LifecycleEvent::Ejected, |payload| {
        if let EventPayload::Device(device) = payload {
            println!("ejected {}", device.id);
        }
    });
    hub.subscribe(LifecycleEvent::Error, |payload| {
        if let EventPayload::Error(e) = payload
            && !e.is_signal()
        {
            eprintln!("error: {}", e);
        }
    });
}

fn describe(devices: &[Device]) -> String {
    devices
        .iter()
        .map(|device| match device.first_mountpoint() {
            Some(path) => format!("{} at {}", device.id, path.display()),
            None => device.id.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
