//! In-memory virtqueues.
//!
//! A [`Virtqueue`] is a bounded FIFO of packets between the guest and the
//! host. The producing side pushes and then notifies. Notifying runs the
//! queue's callback synchronously (the guest's "interrupt handler") and
//! kicks whoever awaits [`Virtqueue::kicked`] (the host's handler loop).

use crate::error::{CryptoError, Result};
use bytes::Bytes;
use crossbeam_queue::ArrayQueue;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{trace, warn};

/// Default size of the control queues.
pub const CONTROL_QUEUE_SIZE: usize = 32;

/// Default size of the data queues.
pub const DATA_QUEUE_SIZE: usize = 128;

/// Callback run on every notification.
pub type QueueCallback = Arc<dyn Fn(&Virtqueue) + Send + Sync>;

/// A bounded packet queue with notification.
pub struct Virtqueue {
    name: &'static str,
    ring: ArrayQueue<Bytes>,
    kick: Notify,
    callback: RwLock<Option<QueueCallback>>,
}

impl fmt::Debug for Virtqueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Virtqueue")
            .field("name", &self.name)
            .field("size", &self.size())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl Virtqueue {
    /// Create a queue with room for `size` packets. A size of zero is bumped to one.
    pub fn new(name: &'static str, size: usize) -> Self {
        Self {
            name,
            ring: ArrayQueue::new(size.max(1)),
            kick: Notify::new(),
            callback: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> usize {
        self.ring.capacity()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Add a packet.
    ///
    /// # Errors
    ///
    /// `QueueFull` when every slot is taken; the packet is dropped.
    pub fn push(&self, packet: Bytes) -> Result<()> {
        let len = packet.len();
        self.ring.push(packet).map_err(|_| {
            warn!(queue = self.name, len, "virtqueue full, packet dropped");
            CryptoError::QueueFull { queue: self.name }
        })?;
        trace!(queue = self.name, len, "packet queued");
        Ok(())
    }

    /// Take the oldest packet.
    pub fn pop(&self) -> Option<Bytes> {
        self.ring.pop()
    }

    /// Install the notification callback, replacing any previous one.
    pub fn set_callback(&self, callback: QueueCallback) {
        *self.callback.write() = Some(callback);
    }

    pub fn clear_callback(&self) {
        *self.callback.write() = None;
    }

    /// Signal the other side: run the callback, then kick the waiting consumer.
    pub fn notify(&self) {
        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(self);
        }
        self.kick.notify_one();
    }

    /// Wait for the next kick. A kick sent while nobody waits is kept for the
    /// next caller.
    pub async fn kicked(&self) {
        self.kick.notified().await;
    }
}

/// The four queues of one crypto device.
#[derive(Debug)]
pub struct Transport {
    /// Control, host to guest.
    pub c_ivq: Virtqueue,
    /// Control, guest to host.
    pub c_ovq: Virtqueue,
    /// Data, host to guest.
    pub ivq: Virtqueue,
    /// Data, guest to host.
    pub ovq: Virtqueue,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(CONTROL_QUEUE_SIZE, DATA_QUEUE_SIZE)
    }
}

impl Transport {
    pub fn new(control_size: usize, data_size: usize) -> Self {
        Self {
            c_ivq: Virtqueue::new("c_ivq", control_size),
            c_ovq: Virtqueue::new("c_ovq", control_size),
            ivq: Virtqueue::new("ivq", data_size),
            ovq: Virtqueue::new("ovq", data_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_fifo_and_capacity() {
        let vq = Virtqueue::new("test", 2);
        vq.push(Bytes::from_static(b"a")).unwrap();
        vq.push(Bytes::from_static(b"b")).unwrap();
        assert_eq!(
            vq.push(Bytes::from_static(b"c")).unwrap_err(),
            CryptoError::QueueFull { queue: "test" }
        );
        assert_eq!(vq.pop().unwrap(), Bytes::from_static(b"a"));
        assert_eq!(vq.pop().unwrap(), Bytes::from_static(b"b"));
        assert!(vq.pop().is_none());
    }

    #[test]
    fn test_notify_runs_callback() {
        let vq = Virtqueue::new("test", 4);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        vq.set_callback(Arc::new(move |vq: &Virtqueue| {
            while vq.pop().is_some() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        vq.push(Bytes::from_static(b"x")).unwrap();
        vq.push(Bytes::from_static(b"y")).unwrap();
        vq.notify();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(vq.is_empty());

        vq.clear_callback();
        vq.push(Bytes::from_static(b"z")).unwrap();
        vq.notify();
        assert_eq!(vq.len(), 1);
    }

    #[tokio::test]
    async fn test_kick_before_wait_is_not_lost() {
        let vq = Virtqueue::new("test", 4);
        vq.notify();
        tokio::time::timeout(Duration::from_secs(1), vq.kicked())
            .await
            .expect("stored kick was lost");
    }

    #[test]
    fn test_default_transport_sizes() {
        let t = Transport::default();
        assert_eq!(t.c_ivq.size(), 32);
        assert_eq!(t.c_ovq.size(), 32);
        assert_eq!(t.ivq.size(), 128);
        assert_eq!(t.ovq.size(), 128);
    }
}
