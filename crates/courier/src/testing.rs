//! Scripted collaborators for tests
//!
//! Stand-ins for the enumeration service, the process-execution facility,
//! and the delay source, plus a recorder that captures lifecycle events.
//! All of them are cheap to clone and share state between clones, so a test
//! can keep a handle after moving one into a watcher.
//!
//! # Example
//!
//! ```
//! use courier::testing::ScriptedEnumerator;
//! use common::test_utils::create_mock_device;
//!
//! let enumerator = ScriptedEnumerator::new(vec![vec![], vec![create_mock_device("/dev/sdb")]]);
//! enumerator.push(vec![]);
//! assert_eq!(enumerator.calls().get(), 0);
//! ```

use crate::error::{Result, WatchError};
use crate::events::{EventHub, EventPayload, LifecycleEvent};
use crate::poller::Sleeper;
use crate::snapshot::DeviceEnumerator;
use crate::transfer::CommandRunner;
use common::Device;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Shared call counter
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Script {
    steps: VecDeque<std::result::Result<Vec<Device>, String>>,
    last: Vec<Device>,
}

/// Enumerator that replays a fixed sequence of device lists
///
/// Each call pops the next step; once the script runs out the last
/// successful list is repeated forever.
#[derive(Clone, Default)]
pub struct ScriptedEnumerator {
    script: Arc<Mutex<Script>>,
    calls: CallCounter,
}

impl ScriptedEnumerator {
    pub fn new(steps: Vec<Vec<Device>>) -> Self {
        let enumerator = Self::default();
        for step in steps {
            enumerator.push(step);
        }
        enumerator
    }

    /// Enumerator that always reports `devices`
    pub fn repeating(devices: Vec<Device>) -> Self {
        let enumerator = Self::default();
        enumerator.lock().last = devices;
        enumerator
    }

    /// Append a device list to the script
    pub fn push(&self, devices: Vec<Device>) {
        self.lock().steps.push_back(Ok(devices));
    }

    /// Make the very next call fail with an enumeration error
    pub fn fail_next(&self, reason: &str) {
        self.lock().steps.push_front(Err(reason.to_string()));
    }

    pub fn calls(&self) -> CallCounter {
        self.calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceEnumerator for ScriptedEnumerator {
    async fn list_drives(&self) -> Result<Vec<Device>> {
        self.calls.bump();
        let mut script = self.lock();
        match script.steps.pop_front() {
            Some(Ok(devices)) => {
                script.last = devices.clone();
                Ok(devices)
            }
            Some(Err(reason)) => Err(WatchError::Enumeration(reason)),
            None => Ok(script.last.clone()),
        }
    }
}

/// Sleeper that records requested delays and returns immediately
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
        tokio::task::yield_now().await;
    }
}

/// Command runner that records commands instead of executing them
#[derive(Clone, Default)]
pub struct RecordingRunner {
    commands: Arc<Mutex<Vec<String>>>,
    failing_prefixes: Arc<Mutex<Vec<String>>>,
}

impl RecordingRunner {
    /// Fail every command starting with `prefix`
    pub fn fail_when(&self, prefix: &str) {
        self.failing_prefixes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prefix.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &str) -> Result<()> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_string());

        let fails = self
            .failing_prefixes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|p| command.starts_with(p.as_str()));

        if fails {
            Err(WatchError::Command {
                command: command.to_string(),
                reason: "exit status: 1".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// One captured lifecycle event
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub event: LifecycleEvent,
    /// Devices carried by `mounted`, or the single transfer target
    pub devices: Vec<Device>,
    /// Display text of the error carried by `error`
    pub error: Option<String>,
    /// Whether that error was the "nothing changed" signal
    pub is_signal: bool,
}

/// Subscribes to every lifecycle event and keeps them in order
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl EventRecorder {
    pub fn attach(hub: &EventHub) -> Self {
        let recorder = Self::default();
        for event in LifecycleEvent::ALL {
            let events = recorder.events.clone();
            hub.subscribe(event, move |payload| {
                let (devices, error, is_signal) = match payload {
                    EventPayload::None => (Vec::new(), None, false),
                    EventPayload::Devices(devices) => (devices.clone(), None, false),
                    EventPayload::Device(device) => (vec![device.clone()], None, false),
                    EventPayload::Error(e) => (Vec::new(), Some(e.to_string()), e.is_signal()),
                };
                events
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(RecordedEvent {
                        event,
                        devices,
                        error,
                        is_signal,
                    });
            });
        }
        recorder
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.event.as_str()).collect()
    }
}
