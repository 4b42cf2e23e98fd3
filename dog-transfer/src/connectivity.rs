use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Network reachability signal.
///
/// The host application (or a platform probe) flips this; the manager pauses
/// running transfers when it goes offline and re-queues them when it comes back.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    sender: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(reachable: bool) -> Self {
        let (sender, _) = watch::channel(reachable);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Update reachability; returns true if the value changed
    pub fn set_reachable(&self, reachable: bool) -> bool {
        let changed = self.sender.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                *current = reachable;
                true
            }
        });
        if changed {
            info!("Network reachability changed: reachable={}", reachable);
        }
        changed
    }

    pub fn online(&self) -> bool {
        self.set_reachable(true)
    }

    pub fn offline(&self) -> bool {
        self.set_reachable(false)
    }

    pub fn is_reachable(&self) -> bool {
        *self.sender.borrow()
    }

    /// Watch reachability changes
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
