//! Device watcher
//!
//! Owns the last-known removable-storage snapshot and turns payload-free
//! attach/detach signals into the attach and detach pipelines:
//!
//! - attach: wait for the device count to change, diff against the
//!   last-known snapshot, then wait for the added devices to be mounted
//!   (and optionally transfer a file to the first one)
//! - detach: take a snapshot and diff it
//!
//! [`DeviceWatcher::run`] processes signals one at a time on a single task,
//! so a detach arriving while an attach is still polling waits its turn and
//! the diff-and-update of the snapshot is never interleaved.
//!
//! Every pipeline failure ends up on the `error` lifecycle event; nothing is
//! returned to the signal source.

use crate::diff::diff_snapshots;
use crate::error::{Result, WatchError};
use crate::events::{EventHub, EventPayload, LifecycleEvent};
use crate::poller::{Poller, RetryBudget, Sleeper, TokioSleeper};
use crate::snapshot::{DeviceEnumerator, SnapshotService};
use crate::transfer::{CommandRunner, ShellRunner, TransferOptions, TransferSequencer};
use common::{Device, DeviceSignal, DiffResult, SignalReceiver, Snapshot};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Quiet period after an attach signal before the queue is drained
pub const ATTACH_SETTLE: Duration = Duration::from_millis(250);

/// Watcher construction options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Retry budget shared by both pollers
    pub budget: RetryBudget,
    /// Copy and eject behaviour
    pub transfer: TransferOptions,
    /// File copied to the first newly mounted device, if any
    pub source_file: Option<PathBuf>,
}

/// Removable-storage watcher
pub struct DeviceWatcher<E, R = ShellRunner, S = TokioSleeper> {
    snapshots: SnapshotService<E>,
    runner: R,
    sleeper: S,
    hub: Arc<EventHub>,
    options: WatchOptions,
    last_known: Snapshot,
}

impl<E: DeviceEnumerator> DeviceWatcher<E> {
    /// Watcher that runs real shell commands and sleeps on the Tokio timer
    pub fn with_defaults(enumerator: E, options: WatchOptions) -> Self {
        Self::new(enumerator, ShellRunner::default(), TokioSleeper, options)
    }
}

impl<E, R, S> DeviceWatcher<E, R, S>
where
    E: DeviceEnumerator,
    R: CommandRunner,
    S: Sleeper,
{
    pub fn new(enumerator: E, runner: R, sleeper: S, options: WatchOptions) -> Self {
        Self {
            snapshots: SnapshotService::new(enumerator),
            runner,
            sleeper,
            hub: Arc::new(EventHub::new()),
            options,
            last_known: Vec::new(),
        }
    }

    /// The lifecycle event hub, for registering subscribers
    pub fn hub(&self) -> Arc<EventHub> {
        self.hub.clone()
    }

    /// Register a subscriber by event name; `false` for unknown names
    pub fn on<F>(&self, event: &str, callback: F) -> bool
    where
        F: Fn(&EventPayload) + Send + Sync + 'static,
    {
        self.hub.on(event, callback)
    }

    pub fn options(&self) -> &WatchOptions {
        &self.options
    }

    /// The snapshot the next diff is computed against
    pub fn last_known(&self) -> &[Device] {
        &self.last_known
    }

    /// Seed the last-known snapshot from a first enumeration
    ///
    /// On failure the snapshot stays empty and the error is reported.
    pub async fn initialize(&mut self) {
        match self.snapshots.list().await {
            Ok(snapshot) => {
                info!(
                    "Device watcher initialized with {} removable device(s)",
                    snapshot.len()
                );
                self.last_known = snapshot;
            }
            Err(e) => self.report(e),
        }
    }

    /// Dispatch one hotplug signal to its pipeline
    pub async fn handle_signal(&mut self, signal: DeviceSignal) {
        debug!("Handling {:?} signal", signal);

        match signal {
            DeviceSignal::Attach => {
                if let Some(devices) = self.add_devices().await
                    && let Some(device) = devices.first()
                    && let Some(source) = self.options.source_file.clone()
                {
                    self.move_file_to_drive(device, &source).await;
                }
            }
            DeviceSignal::Detach => {
                self.remove_devices().await;
            }
        }
    }

    /// Process signals until every sender is gone
    ///
    /// A run of consecutive attach signals (one insertion of a composite
    /// device or card reader raises several) is handled as a single attach.
    pub async fn run(mut self, signals: SignalReceiver) {
        self.initialize().await;

        let mut pending = None;
        loop {
            let signal = match pending.take() {
                Some(signal) => signal,
                None => match signals.recv().await {
                    Ok(signal) => signal,
                    Err(_) => break,
                },
            };

            if signal == DeviceSignal::Attach {
                pending = self.coalesce_attaches(&signals).await;
            }
            self.handle_signal(signal).await;
        }

        info!("Signal source closed, device watcher stopped");
    }

    /// Let an arrival burst settle, then drop the queued attaches behind it
    ///
    /// Returns the first non-attach signal taken off the queue, which must
    /// be handled next.
    async fn coalesce_attaches(&self, signals: &SignalReceiver) -> Option<DeviceSignal> {
        self.sleeper.sleep(ATTACH_SETTLE).await;

        let mut merged = 0;
        let mut next = None;
        while let Some(signal) = signals.try_recv() {
            if signal != DeviceSignal::Attach {
                next = Some(signal);
                break;
            }
            merged += 1;
        }

        if merged > 0 {
            debug!("Coalesced {} queued attach signal(s)", merged);
        }
        next
    }

    /// Attach pipeline; resolves with the mounted, ready devices
    ///
    /// Failures are reported on the `error` event and yield `None`.
    pub async fn add_devices(&mut self) -> Option<Vec<Device>> {
        match self.attach_pipeline().await {
            Ok(devices) => Some(devices),
            Err(e) => {
                self.report(e);
                None
            }
        }
    }

    async fn attach_pipeline(&mut self) -> Result<Vec<Device>> {
        let snapshot = self.wait_for_mount().await?;
        let diff = self.diff(snapshot)?;

        if diff.added.is_empty() {
            info!(
                "Attach signal observed only removals ({} device(s))",
                diff.removed.len()
            );
            return Ok(Vec::new());
        }

        self.get_mountpoints(&diff.added).await
    }

    /// Detach pipeline; resolves with the diff
    ///
    /// Removal needs no mount wait, so this takes a single snapshot.
    pub async fn remove_devices(&mut self) -> Option<DiffResult> {
        let result = match self.snapshots.list().await {
            Ok(snapshot) => self.diff(snapshot),
            Err(e) => Err(e),
        };

        match result {
            Ok(diff) => {
                for device in &diff.removed {
                    info!("Device removed: {}", device.id);
                }
                Some(diff)
            }
            Err(e) => {
                self.report(e);
                None
            }
        }
    }

    /// Mount-wait poller against the last-known snapshot
    pub async fn wait_for_mount(&self) -> Result<Snapshot> {
        self.poller().wait_for_mount(&self.last_known).await
    }

    /// Mountpoint-wait poller for `candidates`
    pub async fn get_mountpoints(&self, candidates: &[Device]) -> Result<Snapshot> {
        self.poller().get_mountpoints(candidates).await
    }

    /// Diff `snapshot` against the last-known one, which it then replaces
    pub fn diff(&mut self, snapshot: Snapshot) -> Result<DiffResult> {
        diff_snapshots(&mut self.last_known, snapshot)
    }

    /// Copy `source` to `device` and eject it, reporting failures
    pub async fn move_file_to_drive(&self, device: &Device, source: &Path) {
        let sequencer = TransferSequencer::new(&self.runner, &self.hub, &self.options.transfer);

        if let Err(e) = sequencer.move_file_to_drive(device, source).await {
            self.report(e);
        }
    }

    fn poller(&self) -> Poller<'_, E, S> {
        Poller::new(&self.snapshots, &self.sleeper, &self.hub, self.options.budget)
    }

    fn report(&self, err: WatchError) {
        if err.is_signal() {
            debug!("{}", err);
        } else if err.is_retry_exhausted() {
            warn!("{}", err);
        } else {
            error!("{}", err);
        }

        self.hub.emit(LifecycleEvent::Error, &EventPayload::Error(err));
    }
}
