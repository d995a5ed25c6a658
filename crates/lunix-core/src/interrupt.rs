//! Interrupt signal for cancellable waits.
//!
//! Every sleeping step of the read protocol (slow-lock acquisition, waiting
//! for fresh data) races against an [`Interrupt`]. Raising it makes those
//! steps return [`ChannelError::Interrupted`] promptly; the pending lock
//! request or wait registration is dropped, so nothing stays held.
//!
//! The signal is level-triggered: once raised it stays raised until
//! [`Interrupt::clear`] is called, the same way a pending signal keeps
//! interrupting sleeps until it is delivered.

use crate::error::{ChannelError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// A cloneable, thread-safe cancellation signal.
///
/// Clones share the same signal. Raising is synchronous and may be done from
/// any thread, including ones without a runtime.
#[derive(Debug, Clone)]
pub struct Interrupt {
    signal: Arc<watch::Sender<bool>>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    /// Create a signal in the not-raised state.
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            signal: Arc::new(signal),
        }
    }

    /// Raise the signal, interrupting every current and future wait.
    pub fn raise(&self) {
        self.signal.send_replace(true);
    }

    /// Lower the signal so that later waits block normally again.
    pub fn clear(&self) {
        self.signal.send_replace(false);
    }

    /// Whether the signal is currently raised.
    pub fn is_raised(&self) -> bool {
        *self.signal.borrow()
    }

    /// Resolve once the signal is raised (immediately if it already is).
    pub async fn raised(&self) {
        let mut rx = self.signal.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|raised| *raised).await;
    }

    /// Drive `fut` to completion unless the signal is raised first.
    ///
    /// A signal that is already raised wins over a future that would be
    /// ready on its first poll.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.raised() => Err(ChannelError::Interrupted),
            out = fut => Ok(out),
        }
    }
}
