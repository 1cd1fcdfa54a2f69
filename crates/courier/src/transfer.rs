//! Transfer/eject sequencer
//!
//! Copies one file onto a mounted device and ejects it, reporting each stage
//! on the event hub. Commands are rendered from templates and executed by a
//! [`CommandRunner`].

use crate::error::{Result, WatchError};
use crate::events::{EventHub, EventPayload, LifecycleEvent};
use common::Device;
use std::future::Future;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

/// Default copy command; `{source}` and `{dest}` are substituted
pub const DEFAULT_COPY_COMMAND: &str = "cp {source} {dest}";

/// Default eject command; `{device}` is substituted
pub const DEFAULT_EJECT_COMMAND: &str = "eject {device}";

/// Executes shell command lines
pub trait CommandRunner: Send + Sync {
    /// Run `command`, succeeding only on exit status zero
    fn run(&self, command: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Runs commands through `sh -c`
pub struct ShellRunner {
    shell: String,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<()> {
        debug!("Executing: {}", command);

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|e| WatchError::Command {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(WatchError::Command {
                command: command.to_string(),
                reason: format!("{} {}", output.status, stderr.trim()).trim_end().to_string(),
            })
        }
    }
}

/// Backslash-escape whitespace so the shell reads `path` as one word
pub fn escape_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        if c.is_whitespace() {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// How a transfer is carried out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    pub copy_command: String,
    pub eject_command: String,
    /// When false the sequence ends after `uploaded` and the device stays mounted
    pub eject_after_move: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            copy_command: DEFAULT_COPY_COMMAND.to_string(),
            eject_command: DEFAULT_EJECT_COMMAND.to_string(),
            eject_after_move: true,
        }
    }
}

impl TransferOptions {
    fn copy_line(&self, source: &Path, dest: &Path) -> String {
        self.copy_command
            .replace("{source}", &escape_path(&source.to_string_lossy()))
            .replace("{dest}", &escape_path(&dest.to_string_lossy()))
    }

    fn eject_line(&self, device: &Device) -> String {
        self.eject_command
            .replace("{device}", &escape_path(&device.id))
    }
}

/// Runs the uploading -> uploaded -> ejected sequence for one device
pub struct TransferSequencer<'a, R> {
    runner: &'a R,
    hub: &'a EventHub,
    options: &'a TransferOptions,
}

impl<'a, R: CommandRunner> TransferSequencer<'a, R> {
    pub fn new(runner: &'a R, hub: &'a EventHub, options: &'a TransferOptions) -> Self {
        Self {
            runner,
            hub,
            options,
        }
    }

    /// Copy `source` to the device's first mount location, then eject it
    ///
    /// A failed copy stops the sequence with the device still mounted.
    pub async fn move_file_to_drive(&self, device: &Device, source: &Path) -> Result<()> {
        let dest = device
            .first_mountpoint()
            .ok_or_else(|| WatchError::NotMounted(device.id.clone()))?;

        self.hub.emit(
            LifecycleEvent::Uploading,
            &EventPayload::Device(device.clone()),
        );
        info!("Copying {} to {}", source.display(), dest.display());

        self.runner
            .run(&self.options.copy_line(source, dest))
            .await
            .map_err(|e| WatchError::CopyFailed(Box::new(e)))?;

        self.hub.emit(
            LifecycleEvent::Uploaded,
            &EventPayload::Device(device.clone()),
        );

        if !self.options.eject_after_move {
            info!("Leaving {} mounted", device.id);
            return Ok(());
        }

        self.runner
            .run(&self.options.eject_line(device))
            .await
            .map_err(|e| WatchError::EjectFailed(Box::new(e)))?;

        info!("Ejected {}", device.id);
        self.hub.emit(
            LifecycleEvent::Ejected,
            &EventPayload::Device(device.clone()),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EventRecorder, RecordingRunner};
    use common::test_utils::{create_mock_device, create_mounted_device};

    #[test]
    fn test_escape_path() {
        assert_eq!(escape_path("/Volumes/MY DRIVE"), r"/Volumes/MY\ DRIVE");
        assert_eq!(escape_path("/media/a  b\tc"), "/media/a\\ \\ b\\\tc");
        assert_eq!(escape_path("/media/usb"), "/media/usb");
    }

    #[tokio::test]
    async fn test_transfer_sequence() {
        let runner = RecordingRunner::default();
        let hub = EventHub::new();
        let recorder = EventRecorder::attach(&hub);
        let options = TransferOptions {
            eject_command: "diskutil unmountDisk {device}".to_string(),
            ..TransferOptions::default()
        };
        let device = create_mounted_device("/dev/disk4", "/Volumes/MY DRIVE");

        TransferSequencer::new(&runner, &hub, &options)
            .move_file_to_drive(&device, Path::new("pic.jpg"))
            .await
            .unwrap();

        assert_eq!(
            runner.commands(),
            vec![
                r"cp pic.jpg /Volumes/MY\ DRIVE".to_string(),
                "diskutil unmountDisk /dev/disk4".to_string(),
            ]
        );
        assert_eq!(recorder.names(), vec!["uploading", "uploaded", "ejected"]);
    }

    #[tokio::test]
    async fn test_copy_failure_skips_eject() {
        let runner = RecordingRunner::default();
        runner.fail_when("cp ");
        let hub = EventHub::new();
        let recorder = EventRecorder::attach(&hub);
        let options = TransferOptions::default();
        let device = create_mounted_device("/dev/sdb", "/media/usb");

        let err = TransferSequencer::new(&runner, &hub, &options)
            .move_file_to_drive(&device, Path::new("/tmp/pic.jpg"))
            .await
            .unwrap_err();

        assert!(matches!(err, WatchError::CopyFailed(_)));
        assert_eq!(runner.commands().len(), 1);
        assert_eq!(recorder.names(), vec!["uploading"]);
    }

    #[tokio::test]
    async fn test_eject_failure_is_reported() {
        let runner = RecordingRunner::default();
        runner.fail_when("eject ");
        let hub = EventHub::new();
        let recorder = EventRecorder::attach(&hub);
        let options = TransferOptions::default();
        let device = create_mounted_device("/dev/sdb", "/media/usb");

        let err = TransferSequencer::new(&runner, &hub, &options)
            .move_file_to_drive(&device, Path::new("/tmp/pic.jpg"))
            .await
            .unwrap_err();

        assert!(matches!(err, WatchError::EjectFailed(_)));
        assert_eq!(recorder.names(), vec!["uploading", "uploaded"]);
    }

    #[tokio::test]
    async fn test_no_eject_after_move() {
        let runner = RecordingRunner::default();
        let hub = EventHub::new();
        let recorder = EventRecorder::attach(&hub);
        let options = TransferOptions {
            eject_after_move: false,
            ..TransferOptions::default()
        };
        let device = create_mounted_device("/dev/sdb", "/media/usb");

        TransferSequencer::new(&runner, &hub, &options)
            .move_file_to_drive(&device, Path::new("/tmp/pic.jpg"))
            .await
            .unwrap();

        assert_eq!(runner.commands(), vec!["cp /tmp/pic.jpg /media/usb"]);
        assert_eq!(recorder.names(), vec!["uploading", "uploaded"]);
    }

    #[tokio::test]
    async fn test_unmounted_device_is_rejected() {
        let runner = RecordingRunner::default();
        let hub = EventHub::new();
        let recorder = EventRecorder::attach(&hub);
        let options = TransferOptions::default();

        let err = TransferSequencer::new(&runner, &hub, &options)
            .move_file_to_drive(&create_mock_device("/dev/sdb"), Path::new("pic.jpg"))
            .await
            .unwrap_err();

        assert!(matches!(err, WatchError::NotMounted(id) if id == "/dev/sdb"));
        assert!(runner.commands().is_empty());
        assert!(recorder.names().is_empty());
    }

    #[tokio::test]
    async fn test_shell_runner_exit_status() {
        let runner = ShellRunner::default();

        assert!(runner.run("true").await.is_ok());

        let err = runner.run("echo boom >&2; exit 3").await.unwrap_err();
        match err {
            WatchError::Command { command, reason } => {
                assert_eq!(command, "echo boom >&2; exit 3");
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shell_runner_copies_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("pic.jpg");
        let target = dir.path().join("MY DRIVE");
        std::fs::write(&source, b"jpeg").unwrap();
        std::fs::create_dir(&target).unwrap();

        let options = TransferOptions::default();
        ShellRunner::default()
            .run(&options.copy_line(&source, &target))
            .await
            .unwrap();

        assert_eq!(std::fs::read(target.join("pic.jpg")).unwrap(), b"jpeg");
    }
}
