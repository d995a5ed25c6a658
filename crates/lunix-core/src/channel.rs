//! Hardware channels: the producer side of the cache.
//!
//! A [`HardwareChannel`] owns the most recently published raw sample of one
//! measurement source together with its update counter. Producers publish
//! from any context, including ones that must not sleep; consumers take O(1)
//! snapshots and sleep on the channel until it moves past a timestamp they
//! already hold.
//!
//! # Locking
//!
//! `raw_sample` and `last_update` live behind a single `spin::Mutex` and are
//! only ever written together. The lock never sleeps and is held for a copy
//! (or a reference-count bump) only: no conversion, formatting or wake-up
//! happens under it. A lock-free mirror of `last_update` serves the racy
//! staleness probe; it is written inside the critical section, so it never
//! runs ahead of the sample it describes.
//!
//! # Wake-ups
//!
//! Waiters register with the channel's `Notify` *before* re-checking the
//! timestamp, and producers wake all registered waiters after releasing the
//! spin lock. A publish racing with a waiter going to sleep is therefore
//! either seen by the check or delivered as a wake-up, never lost.

use crate::error::{ChannelError, Result};
use crate::interrupt::Interrupt;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Notify;
use tracing::{trace, warn};

/// A raw sample together with the update counter it was published under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<S> {
    /// Raw value as written by the producer.
    pub sample: S,
    /// Value of `last_update` when `sample` was written.
    pub last_update: u64,
}

/// One hardware-backed (or remote-backed) source of an evolving value.
pub struct HardwareChannel<S> {
    label: String,
    /// Fast lock: `raw_sample` + `last_update` as one unit.
    raw: spin::Mutex<Snapshot<S>>,
    /// Lock-free mirror of `raw.last_update` for staleness probes.
    last_update: AtomicU64,
    notify: Notify,
    waiters: AtomicUsize,
}

impl<S> fmt::Debug for HardwareChannel<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareChannel")
            .field("label", &self.label)
            .field("last_update", &self.last_update())
            .field("waiters", &self.waiters())
            .finish_non_exhaustive()
    }
}

impl<S> HardwareChannel<S> {
    /// Create a channel holding `initial` with `last_update == 0`.
    pub fn new(label: impl Into<String>, initial: S) -> Self {
        Self {
            label: label.into(),
            raw: spin::Mutex::new(Snapshot {
                sample: initial,
                last_update: 0,
            }),
            last_update: AtomicU64::new(0),
            notify: Notify::new(),
            waiters: AtomicUsize::new(0),
        }
    }

    /// Human-readable channel name used in logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Latest update counter, read without taking the fast lock.
    ///
    /// The value may be stale by the time the caller acts on it; it is only
    /// ever used as a hint that is re-verified afterwards.
    pub fn last_update(&self) -> u64 {
        self.last_update.load(Ordering::Acquire)
    }

    /// Number of tasks currently sleeping in [`wait_newer_than`](Self::wait_newer_than).
    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }

    /// Whether the fast lock is held right now.
    ///
    /// Diagnostic only: lets tests assert that slow work never runs inside
    /// the raw-snapshot critical section.
    pub fn fast_lock_held(&self) -> bool {
        self.raw.is_locked()
    }

    /// Publish a new sample, advancing `last_update` by one.
    ///
    /// Safe to call from contexts that must not sleep. Returns the new
    /// update counter. Once the counter has reached `u64::MAX` (only possible
    /// through [`publish_at`](Self::publish_at)) the sample is dropped and the
    /// channel is left as it was.
    pub fn publish(&self, sample: S) -> u64 {
        let stamp = {
            let mut raw = self.raw.lock();
            let Some(next) = raw.last_update.checked_add(1) else {
                drop(raw);
                warn!(channel = %self.label, "update counter exhausted, dropping sample");
                return u64::MAX;
            };
            raw.sample = sample;
            raw.last_update = next;
            self.last_update.store(next, Ordering::Release);
            next
        };
        self.notify.notify_waiters();
        trace!(channel = %self.label, stamp, "published sample");
        stamp
    }

    /// Publish a new sample stamped by an external clock.
    ///
    /// The stamp must be strictly greater than the current `last_update`;
    /// otherwise nothing is written and `NonMonotonic` is returned.
    pub fn publish_at(&self, sample: S, stamp: u64) -> Result<u64> {
        {
            let mut raw = self.raw.lock();
            if stamp <= raw.last_update {
                return Err(ChannelError::NonMonotonic {
                    current: raw.last_update,
                    proposed: stamp,
                });
            }
            raw.sample = sample;
            raw.last_update = stamp;
            self.last_update.store(stamp, Ordering::Release);
        }
        self.notify.notify_waiters();
        trace!(channel = %self.label, stamp, "published stamped sample");
        Ok(stamp)
    }

    /// Sleep until `last_update > since`, or until `interrupt` is raised.
    ///
    /// Returns the update counter observed on wake-up. Interruption drops the
    /// wait registration and reports `Interrupted`.
    pub async fn wait_newer_than(&self, since: u64, interrupt: &Interrupt) -> Result<u64> {
        let _waiting = WaiterGuard::enter(&self.waiters);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let current = self.last_update();
            if current > since {
                return Ok(current);
            }

            trace!(channel = %self.label, since, current, "sleeping until channel updates");
            interrupt.guard(notified.as_mut()).await?;
        }
    }
}

impl<S: Clone> HardwareChannel<S> {
    /// Copy the raw sample and its timestamp under the fast lock.
    pub fn snapshot(&self) -> Snapshot<S> {
        self.raw.lock().clone()
    }
}

struct WaiterGuard<'a>(&'a AtomicUsize);

impl<'a> WaiterGuard<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(count)
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
