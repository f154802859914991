//! Cancellation on termination signals.
//!
//! The child runs in its own process group, so a terminal's Ctrl-C never
//! reaches it directly. Signals sent to `timebox` itself are turned into a
//! cancellation, which makes the supervisor start escalating at once.
//!
//! Handlers must be installed before the child is spawned: until then these
//! signals kill `timebox` outright and the child would be left running.

use std::io;

use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Installed SIGTERM, SIGINT and SIGHUP handlers.
pub struct ShutdownSignals {
    sigterm: Signal,
    sigint: Signal,
    sighup: Signal,
}

impl ShutdownSignals {
    /// Installs the handlers. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if a handler cannot be registered.
    pub fn register() -> io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
            sighup: signal(SignalKind::hangup())?,
        })
    }

    /// Waits for the next signal and returns its name.
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sighup.recv() => "SIGHUP",
        }
    }

    /// Cancels `run` on the first signal and `watch` on the second.
    pub async fn cancel_on_signal(mut self, run: CancellationToken, watch: CancellationToken) {
        let name = self.recv().await;
        info!("Received {name}");
        run.cancel();

        let name = self.recv().await;
        info!("Received {name} again, giving up on the child");
        watch.cancel();
    }
}
