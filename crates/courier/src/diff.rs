//! Snapshot diffing
//!
//! Devices are matched across snapshots by id only; a device whose mount
//! locations changed is neither added nor removed.

use crate::error::{Result, WatchError};
use common::device::device_ids;
use common::{DiffResult, Snapshot};
use tracing::debug;

/// Classify devices as added or removed relative to `last_known`
///
/// `last_known` is replaced by `current` before the result is inspected, so
/// it reflects the latest read even when this returns
/// [`WatchError::NoNewDevices`].
pub fn diff_snapshots(last_known: &mut Snapshot, current: Snapshot) -> Result<DiffResult> {
    let diff = {
        let previous_ids = device_ids(last_known);
        let current_ids = device_ids(&current);

        DiffResult {
            added: current
                .iter()
                .filter(|d| !previous_ids.contains(d.id.as_str()))
                .cloned()
                .collect(),
            removed: last_known
                .iter()
                .filter(|d| !current_ids.contains(d.id.as_str()))
                .cloned()
                .collect(),
        }
    };

    *last_known = current;

    if diff.is_empty() {
        return Err(WatchError::NoNewDevices);
    }

    debug!(
        "Diff: {} added, {} removed",
        diff.added.len(),
        diff.removed.len()
    );
    Ok(diff)
}
