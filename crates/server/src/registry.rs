//! Live-connection tracking.
//!
//! One named slot for the single embedded device (a new connection
//! evicts the old one), an unbounded set of desktop sessions, and
//! bounded watcher queues for out-of-band device status events. A full
//! watcher queue drops the event rather than blocking the producer.

use hearth_storage::DeviceStatus;
use parking_lot::Mutex;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

const WATCHER_QUEUE_CAPACITY: usize = 5;

struct DeviceSlot {
    session_id: String,
    evict_tx: mpsc::Sender<()>,
}

/// Registry of live sessions per transport kind.
#[derive(Default)]
pub struct ConnectionRegistry {
    device: Mutex<Option<DeviceSlot>>,
    desktops: Mutex<HashSet<String>>,
    watchers: Mutex<Vec<mpsc::Sender<DeviceStatus>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the device slot. Any previous occupant is signaled to shut
    /// down; its task sends the session-end control message and closes.
    /// The returned receiver fires when this connection is evicted in
    /// turn.
    pub fn register_device(&self, session_id: &str) -> mpsc::Receiver<()> {
        let (evict_tx, evict_rx) = mpsc::channel(1);
        let old = self.device.lock().replace(DeviceSlot {
            session_id: session_id.to_string(),
            evict_tx,
        });
        if let Some(old) = old {
            tracing::info!(old_session = %old.session_id, "Evicting previous device connection");
            let _ = old.evict_tx.try_send(());
        }
        evict_rx
    }

    /// Release the slot, but only if this session still owns it.
    pub fn unregister_device(&self, session_id: &str) {
        let mut slot = self.device.lock();
        if slot.as_ref().is_some_and(|s| s.session_id == session_id) {
            *slot = None;
        }
    }

    pub fn device_session(&self) -> Option<String> {
        self.device.lock().as_ref().map(|s| s.session_id.clone())
    }

    /// Ask the current device connection to close. Returns whether a
    /// connection was present.
    pub fn evict_device(&self) -> bool {
        match &*self.device.lock() {
            Some(slot) => {
                let _ = slot.evict_tx.try_send(());
                true
            }
            None => false,
        }
    }

    pub fn register_desktop(&self, session_id: &str) {
        self.desktops.lock().insert(session_id.to_string());
    }

    pub fn unregister_desktop(&self, session_id: &str) {
        self.desktops.lock().remove(session_id);
    }

    pub fn desktop_count(&self) -> usize {
        self.desktops.lock().len()
    }

    /// Subscribe to device status events with a bounded queue.
    pub fn watch_device(&self) -> mpsc::Receiver<DeviceStatus> {
        let (tx, rx) = mpsc::channel(WATCHER_QUEUE_CAPACITY);
        self.watchers.lock().push(tx);
        rx
    }

    /// Broadcast a device status event. Slow watchers miss events;
    /// closed watchers are pruned.
    pub fn push_device_event(&self, status: &DeviceStatus) {
        self.watchers.lock().retain(|tx| match tx.try_send(status.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Closed(_)) => false,
        });
    }
}
