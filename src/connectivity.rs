//! Device connectivity signal.
//!
//! A network outage on the device is not a service failure: the health monitor
//! and gateway consult this before counting failures against a breaker.

use std::fmt::Debug;
use tokio::sync::watch;
use tracing::info;

pub trait Connectivity: Send + Sync + Debug {
    fn is_online(&self) -> bool;

    /// Receiver that observes every online/offline transition
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity state driven by the host platform
#[derive(Debug)]
pub struct ConnectivityMonitor {
    sender: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self { sender }
    }

    /// Update the state; subscribers are only woken on an actual change
    pub fn set_online(&self, online: bool) {
        let changed = self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "📶 Connectivity changed");
        }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ConnectivityMonitor {
    fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}
