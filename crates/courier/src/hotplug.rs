//! USB hotplug signal source
//!
//! A dedicated thread owns the libusb context, registers a hotplug callback
//! and pumps `handle_events` so the callback can fire. Each arrival or
//! departure becomes a payload-free [`DeviceSignal`] on the signal bridge;
//! figuring out what changed is left to the watcher.

use common::{DeviceSignal, SignalSender};
use rusb::{Context, Device, Hotplug, HotplugBuilder, UsbContext};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long one `handle_events` call may block
const EVENT_TIMEOUT: Duration = Duration::from_millis(100);

/// Forwards libusb hotplug callbacks onto the signal bridge
struct SignalForwarder {
    sender: SignalSender,
}

impl SignalForwarder {
    fn forward(&self, signal: DeviceSignal) {
        if let Err(e) = self.sender.send_blocking(signal) {
            warn!("Dropping {:?} signal: {}", signal, e);
        }
    }
}

impl<T: UsbContext> Hotplug<T> for SignalForwarder {
    fn device_arrived(&mut self, device: Device<T>) {
        debug!(
            "Hot-plug: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.forward(DeviceSignal::Attach);
    }

    fn device_left(&mut self, device: Device<T>) {
        debug!(
            "Hot-plug: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.forward(DeviceSignal::Detach);
    }
}

/// Handle to a running hotplug thread
pub struct HotplugThread {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<Result<(), rusb::Error>>,
}

impl HotplugThread {
    /// Stop the event loop and wait for the thread to exit
    ///
    /// Blocks for up to one event-loop timeout.
    pub fn shutdown(self) -> common::Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);

        match self.handle.join() {
            Ok(result) => result.map_err(|e| common::Error::Usb(e.to_string())),
            Err(_) => Err(common::Error::Other(
                "USB hotplug thread panicked".to_string(),
            )),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawn the hotplug thread
///
/// Fails up front when the platform's libusb has no hotplug support. The
/// thread also stops on its own once the receiving side of the bridge is
/// closed.
pub fn spawn_hotplug_thread(sender: SignalSender) -> common::Result<HotplugThread> {
    if !rusb::has_hotplug() {
        return Err(common::Error::Usb(
            "libusb was built without hotplug support".to_string(),
        ));
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();

    let handle = std::thread::Builder::new()
        .name("usb-hotplug".to_string())
        .spawn(move || run_event_loop(sender, flag))?;

    Ok(HotplugThread { shutdown, handle })
}

fn run_event_loop(sender: SignalSender, shutdown: Arc<AtomicBool>) -> Result<(), rusb::Error> {
    let context = Context::new()?;

    let callback: Box<dyn Hotplug<Context>> = Box::new(SignalForwarder {
        sender: sender.clone(),
    });
    // Dropping the registration deregisters the callback
    let _registration = HotplugBuilder::new()
        .enumerate(false)
        .register(&context, callback)?;

    info!("USB hotplug thread started");

    while !shutdown.load(Ordering::SeqCst) && !sender.is_closed() {
        match context.handle_events(Some(EVENT_TIMEOUT)) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => {
                debug!("USB event handling interrupted");
            }
            Err(e) => {
                warn!("Error handling USB events: {}", e);
                std::thread::sleep(EVENT_TIMEOUT);
            }
        }
    }

    info!("USB hotplug thread stopped");
    Ok(())
}
