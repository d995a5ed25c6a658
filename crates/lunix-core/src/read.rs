//! Blocking read protocol.
//!
//! A read walks through `Initial → Refreshing → (Sleeping ⇄ Refreshing) →
//! Serving → Done`:
//!
//! 1. Take the slow lock (interruptible).
//! 2. At stream position 0, refresh. If the channel has nothing newer,
//!    drop the lock, sleep on the channel, take the lock again and
//!    re-verify: the staleness probe ran without any lock, so by now another
//!    reader may already have refreshed the cache, or a newer sample may
//!    have arrived.
//! 3. Serve `min(requested, remaining)` bytes and auto-rewind at the end of
//!    the rendering, so the next read waits for a fresh value.
//!
//! Every exit path drops the [`CacheGuard`]; no error leaves the slow lock
//! held. The loop in step 2 has no iteration bound. Producers update far
//! less often than a lock round trip takes, so it settles almost at once.

use crate::error::{ChannelError, Result, UpdateError};
use crate::interrupt::Interrupt;
use crate::state::{CacheGuard, CachedState};
use std::fmt;
use tracing::{debug, trace};

/// Destination of a read: the equivalent of a user-space buffer.
///
/// `capacity` is the requested byte count; `write_slice` performs the copy
/// and may fail the way a copy to an unmapped user address does.
pub trait ReadSink {
    /// Number of bytes the caller asked for.
    fn capacity(&self) -> usize;

    /// Copy `data` (never longer than `capacity`) to the start of the sink.
    fn write_slice(&mut self, data: &[u8]) -> Result<()>;
}

impl ReadSink for [u8] {
    fn capacity(&self) -> usize {
        self.len()
    }

    fn write_slice(&mut self, data: &[u8]) -> Result<()> {
        self.get_mut(..data.len())
            .ok_or(ChannelError::BadAddress)?
            .copy_from_slice(data);
        Ok(())
    }
}

/// Phases of one read call, as reported in trace events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPhase {
    /// Waiting for the slow lock.
    Initial,
    /// Holding the slow lock, trying to refresh.
    Refreshing,
    /// Lock released, waiting for the channel to publish.
    Sleeping,
    /// Copying cached bytes to the caller.
    Serving,
    /// Lock released, result returned.
    Done,
}

impl fmt::Display for ReadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Initial => "initial",
            Self::Refreshing => "refreshing",
            Self::Sleeping => "sleeping",
            Self::Serving => "serving",
            Self::Done => "done",
        };
        write!(f, "{label}")
    }
}

impl<S: Clone + Send> CachedState<S> {
    /// Read up to `out.capacity()` bytes of the channel's current rendering.
    ///
    /// Blocks until the cache holds a value newer than the one last drained
    /// from this handle. A zero-length request returns 0 without locking.
    ///
    /// # Errors
    ///
    /// - `Interrupted` if `interrupt` is raised while waiting for the lock
    ///   or for fresh data.
    /// - `BadAddress` if `out` rejects the copy; the stream position is kept.
    /// - `BufferOverflow` if the renderer exceeds the cache capacity.
    pub async fn read<W: ReadSink + ?Sized>(
        &self,
        out: &mut W,
        interrupt: &Interrupt,
    ) -> Result<usize> {
        if out.capacity() == 0 {
            return Ok(0);
        }

        trace!(channel = %self.channel().label(), phase = %ReadPhase::Initial, "read");
        let mut guard = self.lock(interrupt).await?;

        if guard.position() == 0 {
            guard = self.refresh_blocking(guard, interrupt).await?;
        }

        trace!(channel = %self.channel().label(), phase = %ReadPhase::Serving, "read");
        let served = guard.serve(out);
        drop(guard);
        trace!(channel = %self.channel().label(), phase = %ReadPhase::Done, "read");
        served
    }

    /// Refresh loop: return with the lock held and a rendering newer than
    /// the one the cache held on entry.
    ///
    /// If another holder of the lock refreshes the cache while this caller
    /// sleeps, that rendering is accepted as-is; the raw sample is not
    /// fetched a second time. On error the lock has already been released.
    pub async fn refresh_blocking<'a>(
        &'a self,
        mut guard: CacheGuard<'a, S>,
        interrupt: &Interrupt,
    ) -> Result<CacheGuard<'a, S>> {
        let entered_at = guard.timestamp();
        loop {
            if guard.timestamp() > entered_at {
                debug!(
                    channel = %self.channel().label(),
                    stamp = ?guard.timestamp(),
                    "cache refreshed by another reader"
                );
                return Ok(guard);
            }

            trace!(channel = %self.channel().label(), phase = %ReadPhase::Refreshing, "read");
            match guard.update() {
                Ok(()) => return Ok(guard),
                Err(UpdateError::Stale) => {}
                Err(UpdateError::Channel(err)) => return Err(err),
            }

            let seen = guard.timestamp().unwrap_or_default();
            drop(guard);

            trace!(
                channel = %self.channel().label(),
                phase = %ReadPhase::Sleeping,
                seen,
                "read"
            );
            self.channel().wait_newer_than(seen, interrupt).await?;
            guard = self.lock(interrupt).await?;
        }
    }
}
