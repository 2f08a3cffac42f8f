//! Graceful-shutdown signal shared between the `Shutdown` RPC, `SIGTERM`,
//! and the server's main loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Cloneable handle that lets any number of signallers wake the one future
/// awaiting shutdown.
///
/// Backed by a sticky flag in addition to the [`Notify`]: a `signal` that
/// arrives before `wait` is ever polled must still be observed, not lost to
/// `Notify`'s usual wake-currently-waiting-tasks-only semantics.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    notify: Arc<Notify>,
    signalled: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Creates a fresh, unsignalled handle.
    #[must_use]
    pub fn new() -> Self {
        Self { notify: Arc::new(Notify::new()), signalled: Arc::new(AtomicBool::new(false)) }
    }

    /// Wakes every current and future `wait` call.
    pub fn signal(&self) {
        self.signalled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Resolves once [`Self::signal`] has been called.
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        if self.signalled.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}
