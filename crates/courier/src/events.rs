//! Lifecycle event hub
//!
//! A fixed, closed set of named lifecycle events with an ordered list of
//! subscriber callbacks per event. Pipelines report every outcome here;
//! there is no other channel back to the application.

use crate::error::WatchError;
use common::Device;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, error};

/// The lifecycle events subscribers can observe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Error,
    Checking,
    Mounting,
    Mounted,
    Uploading,
    Uploaded,
    Ejected,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 7] = [
        LifecycleEvent::Error,
        LifecycleEvent::Checking,
        LifecycleEvent::Mounting,
        LifecycleEvent::Mounted,
        LifecycleEvent::Uploading,
        LifecycleEvent::Uploaded,
        LifecycleEvent::Ejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Error => "error",
            LifecycleEvent::Checking => "checking",
            LifecycleEvent::Mounting => "mounting",
            LifecycleEvent::Mounted => "mounted",
            LifecycleEvent::Uploading => "uploading",
            LifecycleEvent::Uploaded => "uploaded",
            LifecycleEvent::Ejected => "ejected",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing a name outside the fixed event set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown lifecycle event '{0}'")]
pub struct UnknownEvent(pub String);

impl FromStr for LifecycleEvent {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LifecycleEvent::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}

/// Data handed to subscribers with an event
#[derive(Debug)]
pub enum EventPayload {
    /// `checking`, `mounting`
    None,
    /// `mounted`: the fully mounted devices
    Devices(Vec<Device>),
    /// `uploading`, `uploaded`, `ejected`: the transfer target
    Device(Device),
    /// `error`: whatever ended the pipeline
    Error(WatchError),
}

type Callback = Arc<dyn Fn(&EventPayload) + Send + Sync>;

/// Registry of lifecycle subscribers
///
/// Callbacks run synchronously, in registration order, on whichever task
/// emits the event. Each call is isolated: a panicking subscriber is logged
/// and the remaining subscribers still run.
pub struct EventHub {
    handlers: RwLock<HashMap<LifecycleEvent, Vec<Callback>>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    /// Create a hub with an empty handler list for every lifecycle event
    pub fn new() -> Self {
        let handlers = LifecycleEvent::ALL
            .into_iter()
            .map(|event| (event, Vec::new()))
            .collect();

        Self {
            handlers: RwLock::new(handlers),
        }
    }

    /// Register a callback by event name
    ///
    /// Returns `false` without registering anything when `event` is not one
    /// of the fixed lifecycle event names.
    pub fn on<F>(&self, event: &str, callback: F) -> bool
    where
        F: Fn(&EventPayload) + Send + Sync + 'static,
    {
        match event.parse::<LifecycleEvent>() {
            Ok(event) => {
                self.subscribe(event, callback);
                true
            }
            Err(e) => {
                debug!("Ignoring subscription: {}", e);
                false
            }
        }
    }

    /// Register a callback for a lifecycle event
    pub fn subscribe<F>(&self, event: LifecycleEvent, callback: F)
    where
        F: Fn(&EventPayload) + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        handlers.entry(event).or_default().push(Arc::new(callback));
    }

    /// Number of callbacks registered for `event`
    pub fn handler_count(&self, event: LifecycleEvent) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event)
            .map_or(0, Vec::len)
    }

    /// Fire `event`, invoking every subscriber in registration order
    pub fn emit(&self, event: LifecycleEvent, payload: &EventPayload) {
        // Clone the list so subscribers may register further callbacks
        let callbacks: Vec<Callback> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event)
            .cloned()
            .unwrap_or_default();

        debug!("Emitting '{}' to {} subscriber(s)", event, callbacks.len());

        for (index, callback) in callbacks.iter().enumerate() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                error!(
                    "Subscriber #{} for '{}' panicked: {}",
                    index,
                    event,
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
