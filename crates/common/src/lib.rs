//! Common utilities for usb-courier
//!
//! This crate provides the pieces shared by the courier library, its binary
//! and its tests: the removable-storage device model, error handling,
//! logging setup, and the async channel bridge that carries attach/detach
//! signals out of the USB hotplug thread.

pub mod channel;
pub mod device;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{DeviceSignal, SignalReceiver, SignalSender, create_signal_bridge};
pub use device::{Device, DiffResult, MountPoint, Snapshot};
pub use error::{Error, Result};
pub use logging::setup_logging;
