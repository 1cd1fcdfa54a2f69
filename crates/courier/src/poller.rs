//! Mount pollers
//!
//! The hotplug signal fires before the OS has updated its device list, and
//! a device shows up in the list before its filesystem is mounted. The two
//! pollers absorb both delays with bounded retry loops. Delays go through a
//! [`Sleeper`] so tests can run without wall-clock waits.

use crate::error::{Result, WatchError};
use crate::events::{EventHub, EventPayload, LifecycleEvent};
use crate::snapshot::{DeviceEnumerator, SnapshotService};
use common::device::device_ids;
use common::{Device, Snapshot};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Default number of samples a poller takes before giving up
pub const DEFAULT_MAX_TRIES: u32 = 10;

/// Default pause between samples
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Bounds a polling loop: at most `max_tries` samples, `delay` apart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub max_tries: u32,
    pub delay: Duration,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryBudget {
    pub fn new(max_tries: u32, delay: Duration) -> Self {
        Self { max_tries, delay }
    }

    /// Upper bound on the time spent sleeping by one poll loop
    pub fn max_wait(&self) -> Duration {
        self.delay * self.max_tries.saturating_sub(1)
    }
}

/// Delay abstraction used between poll attempts
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Sleeps on the Tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Both mount pollers, borrowing the watcher's collaborators
pub struct Poller<'a, E, S> {
    snapshots: &'a SnapshotService<E>,
    sleeper: &'a S,
    hub: &'a EventHub,
    budget: RetryBudget,
}

impl<'a, E: DeviceEnumerator, S: Sleeper> Poller<'a, E, S> {
    pub fn new(
        snapshots: &'a SnapshotService<E>,
        sleeper: &'a S,
        hub: &'a EventHub,
        budget: RetryBudget,
    ) -> Self {
        Self {
            snapshots,
            sleeper,
            hub,
            budget,
        }
    }

    /// Wait until the removable device count differs from `last_known`
    ///
    /// Emits `checking` once. Resolves with the first snapshot whose size
    /// differs; this says some device change took effect, not which one.
    /// Enumeration failures end the loop immediately.
    pub async fn wait_for_mount(&self, last_known: &[Device]) -> Result<Snapshot> {
        self.hub.emit(LifecycleEvent::Checking, &EventPayload::None);
        debug!(
            "Waiting up to {:?} for the device count to change",
            self.budget.max_wait()
        );

        for attempt in 1..=self.budget.max_tries {
            let snapshot = self.snapshots.list().await?;

            if snapshot.len() != last_known.len() {
                debug!(
                    "Device count changed {} -> {} on attempt {}",
                    last_known.len(),
                    snapshot.len(),
                    attempt
                );
                return Ok(snapshot);
            }

            debug!(
                "Checking drives: {} device(s), unchanged (attempt {}/{})",
                snapshot.len(),
                attempt,
                self.budget.max_tries
            );
            self.pause(attempt).await;
        }

        Err(WatchError::NoNewStorageDevices {
            tries: self.budget.max_tries,
        })
    }

    /// Wait until every candidate that is still present has a mount location
    ///
    /// Emits `mounting` on entry and `mounted` with the matched devices on
    /// success. Candidates that vanished from the enumeration are dropped
    /// from the result rather than waited for.
    pub async fn get_mountpoints(&self, candidates: &[Device]) -> Result<Snapshot> {
        self.hub.emit(LifecycleEvent::Mounting, &EventPayload::None);
        let wanted = device_ids(candidates);

        for attempt in 1..=self.budget.max_tries {
            let matched: Snapshot = self
                .snapshots
                .list()
                .await?
                .into_iter()
                .filter(|d| wanted.contains(d.id.as_str()))
                .collect();

            let pending: Vec<&str> = matched
                .iter()
                .filter(|d| !d.is_mounted())
                .map(|d| d.id.as_str())
                .collect();

            if pending.is_empty() {
                debug!(
                    "{} device(s) mounted on attempt {}",
                    matched.len(),
                    attempt
                );
                self.hub.emit(
                    LifecycleEvent::Mounted,
                    &EventPayload::Devices(matched.clone()),
                );
                return Ok(matched);
            }

            debug!(
                "Checking mountpoints: waiting for {:?} (attempt {}/{})",
                pending, attempt, self.budget.max_tries
            );
            self.pause(attempt).await;
        }

        Err(WatchError::MaxRetries {
            tries: self.budget.max_tries,
        })
    }

    /// Sleep between attempts, never after the last one
    async fn pause(&self, attempt: u32) {
        if attempt < self.budget.max_tries {
            self.sleeper.sleep(self.budget.delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EventRecorder, RecordingSleeper, ScriptedEnumerator};
    use common::test_utils::{create_mock_device, create_mounted_device};

    fn budget() -> RetryBudget {
        RetryBudget::new(4, Duration::from_millis(250))
    }

    #[tokio::test]
    async fn test_wait_for_mount_resolves_on_count_change() {
        let enumerator = ScriptedEnumerator::new(vec![
            vec![],
            vec![],
            vec![create_mock_device("/dev/sdb")],
        ]);
        let calls = enumerator.calls();
        let snapshots = SnapshotService::new(enumerator);
        let sleeper = RecordingSleeper::default();
        let hub = EventHub::new();
        let recorder = EventRecorder::attach(&hub);

        let poller = Poller::new(&snapshots, &sleeper, &hub, budget());
        let snapshot = poller.wait_for_mount(&[]).await.unwrap();

        assert_eq!(snapshot, vec![create_mock_device("/dev/sdb")]);
        assert_eq!(calls.get(), 3);
        assert_eq!(sleeper.recorded(), vec![Duration::from_millis(250); 2]);
        assert_eq!(recorder.names(), vec!["checking"]);
    }

    #[tokio::test]
    async fn test_wait_for_mount_exhausts_budget() {
        let existing = vec![create_mock_device("/dev/sdb")];
        let enumerator = ScriptedEnumerator::repeating(existing.clone());
        let calls = enumerator.calls();
        let snapshots = SnapshotService::new(enumerator);
        let sleeper = RecordingSleeper::default();
        let hub = EventHub::new();
        let recorder = EventRecorder::attach(&hub);

        let poller = Poller::new(&snapshots, &sleeper, &hub, budget());
        let err = poller.wait_for_mount(&existing).await.unwrap_err();

        assert!(matches!(err, WatchError::NoNewStorageDevices { tries: 4 }));
        assert_eq!(calls.get(), 4);
        assert_eq!(sleeper.recorded(), vec![Duration::from_millis(250); 3]);
        assert_eq!(recorder.names(), vec!["checking"]);
    }

    #[tokio::test]
    async fn test_wait_for_mount_stops_on_enumeration_error() {
        let enumerator = ScriptedEnumerator::new(vec![vec![]]);
        enumerator.fail_next("lsblk crashed");
        let calls = enumerator.calls();
        let snapshots = SnapshotService::new(enumerator);
        let sleeper = RecordingSleeper::default();
        let hub = EventHub::new();

        let poller = Poller::new(&snapshots, &sleeper, &hub, budget());
        let err = poller.wait_for_mount(&[]).await.unwrap_err();

        assert!(err.is_upstream());
        assert_eq!(calls.get(), 1);
        assert!(sleeper.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_get_mountpoints_waits_for_mount() {
        let unmounted = create_mock_device("/dev/sdb");
        let mounted = create_mounted_device("/dev/sdb", "/media/usb");
        let other = create_mounted_device("/dev/sdc", "/media/other");
        let enumerator = ScriptedEnumerator::new(vec![
            vec![unmounted.clone(), other.clone()],
            vec![unmounted.clone(), other.clone()],
            vec![mounted.clone(), other.clone()],
        ]);
        let calls = enumerator.calls();
        let snapshots = SnapshotService::new(enumerator);
        let sleeper = RecordingSleeper::default();
        let hub = EventHub::new();
        let recorder = EventRecorder::attach(&hub);

        let poller = Poller::new(&snapshots, &sleeper, &hub, budget());
        let devices = poller.get_mountpoints(&[unmounted]).await.unwrap();

        assert_eq!(devices, vec![mounted.clone()]);
        assert_eq!(calls.get(), 3);
        assert_eq!(recorder.names(), vec!["mounting", "mounted"]);
        assert_eq!(recorder.events()[1].devices, vec![mounted]);
    }

    #[tokio::test]
    async fn test_get_mountpoints_exhausts_budget() {
        let unmounted = create_mock_device("/dev/sdb");
        let snapshots = SnapshotService::new(ScriptedEnumerator::repeating(vec![unmounted.clone()]));
        let sleeper = RecordingSleeper::default();
        let hub = EventHub::new();
        let recorder = EventRecorder::attach(&hub);

        let poller = Poller::new(&snapshots, &sleeper, &hub, budget());
        let err = poller.get_mountpoints(&[unmounted]).await.unwrap_err();

        assert!(matches!(err, WatchError::MaxRetries { tries: 4 }));
        assert_eq!(sleeper.recorded().len(), 3);
        assert_eq!(recorder.names(), vec!["mounting"]);
    }

    #[tokio::test]
    async fn test_get_mountpoints_drops_vanished_candidates() {
        let snapshots = SnapshotService::new(ScriptedEnumerator::repeating(vec![]));
        let sleeper = RecordingSleeper::default();
        let hub = EventHub::new();

        let poller = Poller::new(&snapshots, &sleeper, &hub, budget());
        let devices = poller
            .get_mountpoints(&[create_mock_device("/dev/sdb")])
            .await
            .unwrap();

        assert!(devices.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_sleeper_uses_runtime_clock() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_millis(500)).await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_poll_waits_max_wait_on_runtime_clock() {
        let existing = vec![create_mock_device("/dev/sdb")];
        let snapshots = SnapshotService::new(ScriptedEnumerator::repeating(existing.clone()));
        let hub = EventHub::new();
        let budget = budget();

        let start = tokio::time::Instant::now();
        let err = Poller::new(&snapshots, &TokioSleeper, &hub, budget)
            .wait_for_mount(&existing)
            .await
            .unwrap_err();

        assert!(err.is_retry_exhausted());
        let elapsed = start.elapsed();
        assert!(elapsed >= budget.max_wait());
        assert!(elapsed < budget.max_wait() + budget.delay);
    }

    #[test]
    fn test_budget_max_wait() {
        assert_eq!(RetryBudget::default().max_wait(), Duration::from_millis(4500));
        assert_eq!(
            RetryBudget::new(0, Duration::from_secs(1)).max_wait(),
            Duration::ZERO
        );
    }
}
