//! usb-courier
//!
//! Watches for removable storage, waits for newly attached devices to be
//! mounted and optionally copies a file onto them before ejecting. Progress
//! is published as named lifecycle events on an [`EventHub`].
//!
//! The pieces, bottom-up:
//!
//! - [`snapshot`]: enumerates attached storage and keeps the removable devices
//! - [`diff`]: compares two snapshots by device id
//! - [`poller`]: the mount-wait and mountpoint-wait retry loops
//! - [`transfer`]: the copy/eject command sequence
//! - [`watcher`]: ties the above into attach and detach pipelines
//! - [`hotplug`]: the rusb thread that produces attach/detach signals

pub mod config;
pub mod diff;
pub mod error;
pub mod events;
pub mod hotplug;
pub mod poller;
pub mod snapshot;
pub mod testing;
pub mod transfer;
pub mod watcher;

pub use diff::diff_snapshots;
pub use error::{Result, WatchError};
pub use events::{EventHub, EventPayload, LifecycleEvent};
pub use hotplug::{HotplugThread, spawn_hotplug_thread};
pub use poller::{RetryBudget, Sleeper, TokioSleeper};
pub use snapshot::{DeviceEnumerator, LsblkEnumerator, SnapshotService};
pub use transfer::{CommandRunner, ShellRunner, TransferOptions, TransferSequencer, escape_path};
pub use watcher::{DeviceWatcher, WatchOptions};
