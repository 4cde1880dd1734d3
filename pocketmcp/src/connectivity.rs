//! Online/offline connectivity tracking.
//!
//! Hosts wire their platform's network-change listener into
//! [`NetworkMonitor::set_online`]; every client observing the same monitor
//! sees the same value. While offline, cache-miss resource reads fail fast
//! with [`NetworkUnavailable`](crate::McpError::NetworkUnavailable) instead
//! of touching the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tracing::info;

struct MonitorInner {
    online: AtomicBool,
    tx: watch::Sender<bool>,
}

/// Process-wide connectivity flag with change notifications.
///
/// Cloning yields another handle to the same underlying state.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

impl NetworkMonitor {
    /// Create a new monitor, initially online.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self {
            inner: Arc::new(MonitorInner {
                online: AtomicBool::new(true),
                tx,
            }),
        }
    }

    /// The process-wide monitor shared by clients that do not configure
    /// their own.
    pub fn global() -> NetworkMonitor {
        static GLOBAL: OnceLock<NetworkMonitor> = OnceLock::new();
        GLOBAL.get_or_init(NetworkMonitor::new).clone()
    }

    /// Current connectivity state.
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Record a connectivity change. This is the entry point for the
    /// host's network-change listener.
    pub fn set_online(&self, online: bool) {
        let previous = self.inner.online.swap(online, Ordering::SeqCst);
        if previous != online {
            info!(online, "connectivity changed");
            self.inner.tx.send_replace(online);
        }
    }

    /// Subscribe to connectivity changes, e.g. to reconnect sessions when
    /// the network comes back.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}
