//! Per-client cached state.
//!
//! A [`CachedState`] is created for every open handle. It holds the last
//! rendering of its channel's sample, the channel timestamp that rendering
//! was computed from, and the handle's stream position, all behind one
//! sleep-capable lock (the "slow lock"). Every operation on the cache goes
//! through a [`CacheGuard`], so the lock is released on every exit path by
//! construction.

use crate::channel::HardwareChannel;
use crate::error::{ChannelError, Result, UpdateError};
use crate::interrupt::Interrupt;
use crate::read::ReadSink;
use crate::refresh::{needs_refresh, Render};
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct Cache {
    /// `formatted_buf[0..buf_len]`; replaced whole, never edited in place.
    buf: Bytes,
    /// `None` until the first refresh.
    timestamp: Option<u64>,
    position: usize,
}

/// Cached rendering of one channel, private to one client handle.
pub struct CachedState<S> {
    channel: Arc<HardwareChannel<S>>,
    render: Arc<dyn Render<S>>,
    capacity: usize,
    cache: Mutex<Cache>,
}

impl<S> fmt::Debug for CachedState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedState")
            .field("channel", &self.channel.label())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<S> CachedState<S> {
    /// Create an empty, never-computed cache over `channel`.
    ///
    /// `capacity` bounds every rendering; a renderer that produces more
    /// fails the refresh with `BufferOverflow` instead of being truncated.
    pub fn new(
        channel: Arc<HardwareChannel<S>>,
        render: Arc<dyn Render<S>>,
        capacity: usize,
    ) -> Self {
        Self {
            channel,
            render,
            capacity,
            cache: Mutex::new(Cache::default()),
        }
    }

    /// The channel this cache is computed from.
    pub fn channel(&self) -> &Arc<HardwareChannel<S>> {
        &self.channel
    }

    /// Maximum rendering length.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquire the slow lock, giving up if `interrupt` is raised first.
    pub async fn lock(&self, interrupt: &Interrupt) -> Result<CacheGuard<'_, S>> {
        let cache = interrupt.guard(self.cache.lock()).await?;
        trace!(channel = %self.channel.label(), "slow lock acquired");
        Ok(CacheGuard { state: self, cache })
    }

    /// Acquire the slow lock only if nobody holds it.
    pub fn try_lock(&self) -> Option<CacheGuard<'_, S>> {
        let cache = self.cache.try_lock().ok()?;
        Some(CacheGuard { state: self, cache })
    }
}

/// Exclusive access to a [`CachedState`]; dropping it releases the slow lock.
pub struct CacheGuard<'a, S> {
    state: &'a CachedState<S>,
    cache: MutexGuard<'a, Cache>,
}

impl<S> fmt::Debug for CacheGuard<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheGuard")
            .field("channel", &self.state.channel.label())
            .field("timestamp", &self.cache.timestamp)
            .field("len", &self.cache.buf.len())
            .field("position", &self.cache.position)
            .finish()
    }
}

impl<'a, S> CacheGuard<'a, S> {
    /// The state this guard locks.
    pub fn state(&self) -> &'a CachedState<S> {
        self.state
    }

    /// Channel timestamp of the current rendering (`None`: never computed).
    pub fn timestamp(&self) -> Option<u64> {
        self.cache.timestamp
    }

    /// Current stream position within the rendering.
    pub fn position(&self) -> usize {
        self.cache.position
    }

    /// Valid length of the rendering (`buf_len`).
    pub fn len(&self) -> usize {
        self.cache.buf.len()
    }

    /// Whether the rendering is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.buf.is_empty()
    }

    /// The complete current rendering.
    pub fn bytes(&self) -> &Bytes {
        &self.cache.buf
    }

    /// Racy staleness probe: reads the channel timestamp without the fast lock.
    pub fn needs_refresh(&self) -> bool {
        needs_refresh(self.cache.timestamp, self.state.channel.last_update())
    }

    /// Move the stream position back to the start of the rendering.
    pub fn rewind(&mut self) {
        self.cache.position = 0;
    }

    /// Serve bytes from the current rendering into `out`.
    ///
    /// Copies `min(out.capacity(), len - position)` bytes, advances the
    /// position, and rewinds to the origin once the rendering is fully
    /// consumed. A rejected copy leaves the position untouched.
    pub fn serve<W: ReadSink + ?Sized>(&mut self, out: &mut W) -> Result<usize> {
        let len = self.cache.buf.len();
        let start = self.cache.position;
        let count = out.capacity().min(len - start);

        out.write_slice(&self.cache.buf[start..start + count])?;

        let end = start + count;
        self.cache.position = if end == len { 0 } else { end };
        trace!(
            channel = %self.state.channel.label(),
            count,
            position = self.cache.position,
            "served cached bytes"
        );
        Ok(count)
    }
}

impl<S: Clone> CacheGuard<'_, S> {
    /// Refresh the rendering from the channel if it has moved on.
    ///
    /// Returns `UpdateError::Stale` when there is nothing newer to render.
    /// Otherwise the raw sample is snapshotted under the channel's fast lock,
    /// rendered after that lock is released, checked against the capacity,
    /// and published together with the snapshot's timestamp. The stream
    /// position restarts at the origin of the new rendering.
    pub fn update(&mut self) -> std::result::Result<(), UpdateError> {
        if !self.needs_refresh() {
            return Err(UpdateError::Stale);
        }

        let snapshot = self.state.channel.snapshot();

        let mut out = BytesMut::with_capacity(self.state.capacity);
        self.state.render.render(&snapshot.sample, &mut out);
        if out.len() > self.state.capacity {
            return Err(ChannelError::BufferOverflow {
                len: out.len(),
                max: self.state.capacity,
            }
            .into());
        }

        self.cache.buf = out.freeze();
        self.cache.timestamp = Some(snapshot.last_update);
        self.cache.position = 0;
        debug!(
            channel = %self.state.channel.label(),
            stamp = snapshot.last_update,
            len = self.cache.buf.len(),
            "cache refreshed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decimal_state(channel: Arc<HardwareChannel<u32>>, capacity: usize) -> CachedState<u32> {
        let render = |raw: &u32, out: &mut BytesMut| {
            out.extend_from_slice(format!("{raw}\n").as_bytes());
        };
        CachedState::new(channel, Arc::new(render), capacity)
    }

    #[tokio::test]
    async fn test_first_update_runs_on_never_updated_channel() {
        let channel = Arc::new(HardwareChannel::new("c", 0u32));
        let state = decimal_state(channel, 16);

        let mut guard = state.lock(&Interrupt::new()).await.unwrap();
        assert_eq!(guard.timestamp(), None);
        assert!(guard.update().is_ok());
        assert_eq!(guard.timestamp(), Some(0));
        assert_eq!(&guard.bytes()[..], b"0\n");

        assert_eq!(guard.update(), Err(UpdateError::Stale));
    }

    #[tokio::test]
    async fn test_update_tracks_channel_timestamp() {
        let channel = Arc::new(HardwareChannel::new("c", 0u32));
        let state = decimal_state(channel.clone(), 16);
        let mut guard = state.lock(&Interrupt::new()).await.unwrap();

        channel.publish(123);
        channel.publish(456);
        guard.update().unwrap();
        assert_eq!(guard.timestamp(), Some(2));
        assert_eq!(&guard.bytes()[..], b"456\n");
    }

    #[tokio::test]
    async fn test_oversized_rendering_is_rejected_untouched() {
        let channel = Arc::new(HardwareChannel::new("c", 1_000_000u32));
        let state = decimal_state(channel, 4);
        let mut guard = state.lock(&Interrupt::new()).await.unwrap();

        let err = guard.update().unwrap_err();
        assert_eq!(
            err,
            UpdateError::Channel(ChannelError::BufferOverflow { len: 8, max: 4 })
        );
        assert_eq!(guard.timestamp(), None);
        assert!(guard.is_empty());
    }

    #[tokio::test]
    async fn test_serve_partial_then_rewind() {
        let channel = Arc::new(HardwareChannel::new("c", 123456u32));
        let state = decimal_state(channel, 16);
        let mut guard = state.lock(&Interrupt::new()).await.unwrap();
        guard.update().unwrap();

        let mut first = [0u8; 3];
        assert_eq!(guard.serve(&mut first[..]).unwrap(), 3);
        assert_eq!(&first, b"123");
        assert_eq!(guard.position(), 3);

        let mut rest = [0u8; 10];
        assert_eq!(guard.serve(&mut rest[..]).unwrap(), 4);
        assert_eq!(&rest[..4], b"456\n");
        assert_eq!(guard.position(), 0);
    }

    #[tokio::test]
    async fn test_try_lock_fails_while_held() {
        let channel = Arc::new(HardwareChannel::new("c", 0u32));
        let state = decimal_state(channel, 16);
        let guard = state.lock(&Interrupt::new()).await.unwrap();
        assert!(state.try_lock().is_none());
        drop(guard);
        assert!(state.try_lock().is_some());
    }
}
