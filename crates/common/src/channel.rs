//! Async channel bridge between the USB hotplug thread and the Tokio runtime

use async_channel::{Receiver, Sender, TryRecvError, bounded};
use tracing::debug;

/// Payload-free device signals raised by the hotplug source
///
/// The signal only says that *something* was plugged or unplugged. The OS
/// device list lags behind it, so consumers must re-enumerate to find out
/// what actually changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSignal {
    /// A USB device was attached
    Attach,
    /// A USB device was detached
    Detach,
}

/// Handle for the hotplug thread (blocking side)
#[derive(Clone)]
pub struct SignalSender {
    tx: Sender<DeviceSignal>,
}

impl SignalSender {
    /// Send a signal from a blocking context (the hotplug thread)
    pub fn send_blocking(&self, signal: DeviceSignal) -> crate::Result<()> {
        self.tx.send_blocking(signal).map_err(|e| {
            debug!("Signal bridge closed, {:?} not delivered", signal);
            crate::Error::Channel(e.to_string())
        })
    }

    /// Send a signal from async code
    pub async fn send(&self, signal: DeviceSignal) -> crate::Result<()> {
        self.tx
            .send(signal)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// True once every receiver has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Handle for the Tokio runtime (async side)
pub struct SignalReceiver {
    rx: Receiver<DeviceSignal>,
}

impl SignalReceiver {
    /// Receive the next signal
    ///
    /// Fails once every sender has been dropped and the queue is drained.
    pub async fn recv(&self) -> crate::Result<DeviceSignal> {
        self.rx.recv().await.map_err(|e| {
            debug!("Signal bridge drained and closed");
            crate::Error::Channel(e.to_string())
        })
    }

    /// Take the next signal if one is already queued (non-blocking)
    pub fn try_recv(&self) -> Option<DeviceSignal> {
        match self.rx.try_recv() {
            Ok(signal) => Some(signal),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => {
                debug!("Signal bridge drained and closed");
                None
            }
        }
    }

    /// Close the channel so the hotplug side stops producing
    pub fn close(&self) {
        self.rx.close();
    }
}

/// Create the signal bridge between the hotplug thread and the runtime
///
/// Returns (SignalSender for the hotplug thread, SignalReceiver for Tokio)
pub fn create_signal_bridge() -> (SignalSender, SignalReceiver) {
    let (tx, rx) = bounded(64);
    (SignalSender { tx }, SignalReceiver { rx })
}
