//! Pipeline error taxonomy
//!
//! Three kinds of failure flow out of the attach/detach pipelines and the
//! transfer sequencer, and subscribers are expected to treat them
//! differently:
//! - signal conditions ([`WatchError::NoNewDevices`]) are the expected
//!   outcome of a spurious or already-handled signal,
//! - retry exhaustion abandons one device change but the watcher keeps going,
//! - upstream failures come from the enumeration service or an external
//!   command and are passed through unchanged.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    /// The diff between the last-known and current snapshot was empty
    #[error("No new usb drives")]
    NoNewDevices,

    /// The device count never changed within the retry budget
    #[error("No new storage devices after {tries} tries")]
    NoNewStorageDevices { tries: u32 },

    /// A candidate device never reported a mount location
    #[error("Maximum retries ({tries}) reached waiting for mountpoints")]
    MaxRetries { tries: u32 },

    /// The device-enumeration service failed
    #[error("Device enumeration failed: {0}")]
    Enumeration(String),

    /// An external command exited unsuccessfully or could not be spawned
    #[error("Command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    /// Transfer target has no mount location
    #[error("Device {0} has no mountpoint")]
    NotMounted(String),

    /// The copy stage of a transfer failed; the device was left mounted
    #[error("Copy failed: {0}")]
    CopyFailed(#[source] Box<WatchError>),

    /// The eject stage of a transfer failed after a successful copy
    #[error("Eject failed: {0}")]
    EjectFailed(#[source] Box<WatchError>),
}

impl WatchError {
    /// Expected "nothing changed" outcome, not a real failure
    pub fn is_signal(&self) -> bool {
        matches!(self, Self::NoNewDevices)
    }

    /// A poller gave up on this device change
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(
            self,
            Self::NoNewStorageDevices { .. } | Self::MaxRetries { .. }
        )
    }

    /// Failure from the enumeration service or an external command
    pub fn is_upstream(&self) -> bool {
        match self {
            Self::Enumeration(_) | Self::Command { .. } => true,
            Self::CopyFailed(inner) | Self::EjectFailed(inner) => inner.is_upstream(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
