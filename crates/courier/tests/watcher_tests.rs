//! End-to-end tests for the device watcher pipelines
//!
//! Every collaborator is scripted: enumeration replays fixed device lists,
//! commands are recorded instead of executed and delays return at once.

use common::test_utils::{
    DEFAULT_TEST_TIMEOUT, create_mock_device_list, create_mounted_device, with_timeout,
};
use common::{Device, DeviceSignal, create_signal_bridge};
use courier::testing::{EventRecorder, RecordingRunner, RecordingSleeper, ScriptedEnumerator};
use courier::{DeviceWatcher, RetryBudget, TransferOptions, WatchOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type TestWatcher = DeviceWatcher<ScriptedEnumerator, RecordingRunner, RecordingSleeper>;

struct Harness {
    watcher: TestWatcher,
    enumerator: ScriptedEnumerator,
    runner: RecordingRunner,
    sleeper: RecordingSleeper,
    recorder: EventRecorder,
}

fn harness(steps: Vec<Vec<Device>>, options: WatchOptions) -> Harness {
    let enumerator = ScriptedEnumerator::new(steps);
    let runner = RecordingRunner::default();
    let sleeper = RecordingSleeper::default();
    let watcher = DeviceWatcher::new(
        enumerator.clone(),
        runner.clone(),
        sleeper.clone(),
        options,
    );
    let recorder = EventRecorder::attach(&watcher.hub());

    Harness {
        watcher,
        enumerator,
        runner,
        sleeper,
        recorder,
    }
}

fn fast_options() -> WatchOptions {
    WatchOptions {
        budget: RetryBudget::new(10, Duration::from_millis(100)),
        ..WatchOptions::default()
    }
}

fn mounted(devices: Vec<Device>) -> Vec<Device> {
    devices
        .into_iter()
        .map(|d| {
            let mountpoint = format!("/media{}", d.id.trim_start_matches("/dev"));
            d.with_mountpoint(mountpoint)
        })
        .collect()
}

#[tokio::test]
async fn test_attach_waits_for_every_new_device_to_mount() {
    let unmounted = create_mock_device_list(2);
    let ready = mounted(unmounted.clone());
    let mut h = harness(
        vec![vec![], unmounted.clone(), unmounted, ready.clone()],
        fast_options(),
    );
    h.watcher.initialize().await;

    let devices = h.watcher.add_devices().await.unwrap();

    assert_eq!(devices, ready);
    assert_eq!(h.recorder.names(), vec!["checking", "mounting", "mounted"]);
    assert_eq!(h.recorder.events()[2].devices, ready);
    // One pause between the two mountpoint samples
    assert_eq!(h.sleeper.recorded(), vec![Duration::from_millis(100)]);
    assert_eq!(h.enumerator.calls().get(), 4);
}

#[tokio::test]
async fn test_attach_then_transfer_and_eject() {
    let drive = create_mounted_device("/dev/disk4", "/Volumes/MY DRIVE");
    let options = WatchOptions {
        transfer: TransferOptions {
            eject_command: "diskutil eject {device}".to_string(),
            ..TransferOptions::default()
        },
        source_file: Some(PathBuf::from("pic.jpg")),
        ..fast_options()
    };
    let mut h = harness(vec![vec![], vec![drive.clone()]], options);
    h.watcher.initialize().await;

    h.watcher.handle_signal(DeviceSignal::Attach).await;

    assert_eq!(
        h.recorder.names(),
        vec![
            "checking",
            "mounting",
            "mounted",
            "uploading",
            "uploaded",
            "ejected"
        ]
    );
    assert_eq!(
        h.runner.commands(),
        vec![
            r"cp pic.jpg /Volumes/MY\ DRIVE".to_string(),
            "diskutil eject /dev/disk4".to_string(),
        ]
    );
    assert_eq!(h.recorder.events()[5].devices, vec![drive]);
}

#[tokio::test]
async fn test_copy_failure_leaves_device_mounted() {
    let drive = create_mounted_device("/dev/sdb", "/media/usb");
    let options = WatchOptions {
        source_file: Some(PathBuf::from("/srv/missing.jpg")),
        ..fast_options()
    };
    let mut h = harness(vec![vec![], vec![drive]], options);
    h.runner.fail_when("cp ");
    h.watcher.initialize().await;

    h.watcher.handle_signal(DeviceSignal::Attach).await;

    assert_eq!(
        h.recorder.names(),
        vec!["checking", "mounting", "mounted", "uploading", "error"]
    );
    assert_eq!(h.runner.commands().len(), 1);
    let error = h.recorder.events()[4].error.clone().unwrap();
    assert!(error.starts_with("Copy failed"));
}

#[tokio::test]
async fn test_enumeration_failure_during_attach() {
    let mut h = harness(vec![vec![]], fast_options());
    h.watcher.initialize().await;
    h.enumerator.fail_next("lsblk exited with status 32");

    assert!(h.watcher.add_devices().await.is_none());

    let events = h.recorder.events();
    assert_eq!(h.recorder.names(), vec!["checking", "error"]);
    assert!(!events[1].is_signal);
    assert!(
        events[1]
            .error
            .as_deref()
            .unwrap()
            .contains("lsblk exited with status 32")
    );
    // The failure ends the poll without further samples
    assert!(h.sleeper.recorded().is_empty());
}

#[tokio::test]
async fn test_run_processes_signals_in_order() {
    let drive = create_mounted_device("/dev/sdb", "/media/usb");
    let h = harness(
        vec![vec![], vec![drive.clone()], vec![drive], vec![]],
        fast_options(),
    );
    let (sender, receiver) = create_signal_bridge();

    // The detach is queued behind the attach and must not interleave with it
    sender.send(DeviceSignal::Attach).await.unwrap();
    sender.send(DeviceSignal::Detach).await.unwrap();
    drop(sender);

    with_timeout(DEFAULT_TEST_TIMEOUT, h.watcher.run(receiver))
        .await
        .unwrap();

    assert_eq!(h.recorder.names(), vec!["checking", "mounting", "mounted"]);
    assert_eq!(h.enumerator.calls().get(), 4);
}

#[tokio::test]
async fn test_subscribers_by_name() {
    let h = harness(vec![vec![]], fast_options());
    let checks = Arc::new(AtomicUsize::new(0));

    let counter = checks.clone();
    assert!(h.watcher.on("checking", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    assert!(!h.watcher.on("unplugged", |_| {}));

    let mut watcher = h.watcher;
    watcher.initialize().await;
    // Same count as the last-known snapshot, so both signals exhaust the budget
    watcher.handle_signal(DeviceSignal::Attach).await;
    watcher.handle_signal(DeviceSignal::Attach).await;

    assert_eq!(checks.load(Ordering::SeqCst), 2);
}
