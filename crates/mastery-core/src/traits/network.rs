//! Network reachability hint.

use tokio::sync::watch;

/// Reports whether the device believes it is online.
///
/// The answer is a fast-path hint, not a guarantee: an online device may
/// still fail to reach the remote store.
pub trait NetworkStatus: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Network status fed by platform online/offline events.
#[derive(Debug)]
pub struct NetworkMonitor {
    sender: watch::Sender<bool>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self { sender }
    }

    /// Record an online/offline transition.
    pub fn set_online(&self, online: bool) {
        self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    /// Receive transitions as they happen.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkStatus for NetworkMonitor {
    fn is_online(&self) -> bool {
        *self.sender.borrow()
    }
}
