//! Device snapshot service
//!
//! Wraps the OS device-enumeration facility and narrows its output to
//! removable storage. Enumeration failures are passed through unchanged;
//! retrying is the pollers' job.

use crate::error::{Result, WatchError};
use common::{Device, MountPoint, Snapshot};
use serde::Deserialize;
use std::future::Future;
use tokio::process::Command;
use tracing::{debug, trace};

/// Source of the raw storage-device list
pub trait DeviceEnumerator: Send + Sync {
    /// List every storage device currently known to the OS, removable or not
    fn list_drives(&self) -> impl Future<Output = Result<Vec<Device>>> + Send;
}

/// Removable-storage view over a [`DeviceEnumerator`]
pub struct SnapshotService<E> {
    enumerator: E,
}

impl<E: DeviceEnumerator> SnapshotService<E> {
    pub fn new(enumerator: E) -> Self {
        Self { enumerator }
    }

    /// Take a snapshot of the removable storage devices
    pub async fn list(&self) -> Result<Snapshot> {
        let drives = self.enumerator.list_drives().await?;
        let total = drives.len();

        let snapshot: Snapshot = drives.into_iter().filter(|d| d.is_removable).collect();
        trace!(
            "Snapshot: {} removable of {} drives",
            snapshot.len(),
            total
        );

        Ok(snapshot)
    }
}

/// Columns requested from lsblk
const LSBLK_COLUMNS: &str = "NAME,PATH,TYPE,MODEL,RM,HOTPLUG,TRAN,MOUNTPOINTS";

/// Enumerates block devices with `lsblk --json`
pub struct LsblkEnumerator {
    program: String,
}

impl Default for LsblkEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

impl LsblkEnumerator {
    pub fn new() -> Self {
        Self {
            program: "lsblk".to_string(),
        }
    }

    /// Use a different lsblk binary
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl DeviceEnumerator for LsblkEnumerator {
    async fn list_drives(&self) -> Result<Vec<Device>> {
        let output = Command::new(&self.program)
            .args(["--json", "-o", LSBLK_COLUMNS])
            .output()
            .await
            .map_err(|e| WatchError::Enumeration(format!("Failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(WatchError::Enumeration(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let drives = parse_lsblk(&String::from_utf8_lossy(&output.stdout))?;
        debug!("lsblk reported {} disk(s)", drives.len());
        Ok(drives)
    }
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<BlockDevice>,
}

#[derive(Debug, Deserialize)]
struct BlockDevice {
    name: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    rm: Flag,
    #[serde(default)]
    hotplug: Flag,
    #[serde(default)]
    tran: Option<String>,
    /// util-linux >= 2.37; older releases only have `mountpoint`
    #[serde(default)]
    mountpoints: Vec<Option<String>>,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    children: Vec<BlockDevice>,
}

/// lsblk prints flags as JSON booleans on new releases and "0"/"1" on old ones
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Number(u8),
    Text(String),
    #[default]
    Missing,
}

impl Flag {
    fn is_set(&self) -> bool {
        match self {
            Flag::Bool(b) => *b,
            Flag::Number(n) => *n != 0,
            Flag::Text(s) => s.trim() == "1" || s.trim().eq_ignore_ascii_case("true"),
            Flag::Missing => false,
        }
    }
}

impl BlockDevice {
    fn collect_mountpoints(&self, out: &mut Vec<MountPoint>) {
        let own = self
            .mountpoints
            .iter()
            .flatten()
            .chain(self.mountpoint.iter())
            .filter(|p| !p.is_empty());

        for path in own {
            let mountpoint = MountPoint::new(path);
            if !out.contains(&mountpoint) {
                out.push(mountpoint);
            }
        }

        for child in &self.children {
            child.collect_mountpoints(out);
        }
    }

    fn is_removable(&self) -> bool {
        self.rm.is_set()
            || self.hotplug.is_set()
            || self.tran.as_deref().is_some_and(|t| t.eq_ignore_ascii_case("usb"))
    }

    fn into_device(self) -> Device {
        let mut mountpoints = Vec::new();
        self.collect_mountpoints(&mut mountpoints);

        let is_removable = self.is_removable();
        let id = self
            .path
            .clone()
            .unwrap_or_else(|| format!("/dev/{}", self.name));
        let description = self
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);

        Device {
            id,
            description,
            mountpoints,
            is_removable,
        }
    }
}

/// Parse `lsblk --json` output into whole-disk devices
///
/// Partition mount locations are folded into their parent disk so a USB
/// stick with one mounted partition reports that partition's mountpoint.
pub fn parse_lsblk(json: &str) -> Result<Vec<Device>> {
    let output: LsblkOutput = serde_json::from_str(json)
        .map_err(|e| WatchError::Enumeration(format!("Invalid lsblk output: {}", e)))?;

    Ok(output
        .blockdevices
        .into_iter()
        .filter(|d| d.kind.as_deref().is_none_or(|k| k == "disk"))
        .map(BlockDevice::into_device)
        .collect())
}
