//! Removable-storage device model
//!
//! Devices are plain value records produced fresh by every enumeration.
//! Nothing here keeps identity across enumerations except the device id,
//! which is what snapshot diffing keys on.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A filesystem location at which a device's contents are accessible
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MountPoint {
    pub path: PathBuf,
}

impl MountPoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// A storage device as reported by one enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Stable device path (e.g. `/dev/sdb`), unique within a snapshot
    pub id: String,
    /// Human readable description, if the enumerator knows one
    #[serde(default)]
    pub description: Option<String>,
    /// Zero or more mount locations, in enumeration order
    #[serde(default)]
    pub mountpoints: Vec<MountPoint>,
    /// Whether the device is removable storage (USB stick, card reader...)
    pub is_removable: bool,
}

impl Device {
    /// Create an unmounted removable device
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            mountpoints: Vec::new(),
            is_removable: true,
        }
    }

    /// Builder: add a mount location
    pub fn with_mountpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.mountpoints.push(MountPoint::new(path));
        self
    }

    /// Builder: set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder: set the removable flag
    pub fn removable(mut self, is_removable: bool) -> Self {
        self.is_removable = is_removable;
        self
    }

    /// True once the OS has assigned at least one mount location
    pub fn is_mounted(&self) -> bool {
        !self.mountpoints.is_empty()
    }

    /// The mount location transfers are written to
    pub fn first_mountpoint(&self) -> Option<&Path> {
        self.mountpoints.first().map(|m| m.path.as_path())
    }
}

/// The removable-storage devices observed at one instant
pub type Snapshot = Vec<Device>;

/// Devices that appeared and disappeared between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// Present now, absent from the previous snapshot
    pub added: Vec<Device>,
    /// Present in the previous snapshot, absent now
    pub removed: Vec<Device>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Collect the ids of a device list
pub fn device_ids(devices: &[Device]) -> HashSet<&str> {
    devices.iter().map(|d| d.id.as_str()).collect()
}
