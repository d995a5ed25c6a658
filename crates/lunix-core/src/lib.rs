//! Cached hardware channels.
//!
//! This crate holds the state machine shared by the Lunix sensor character
//! device and the virtio-crypto guest driver: a single producer publishes raw
//! samples into a [`HardwareChannel`], and every open client handle keeps a
//! [`CachedState`] that is refreshed lazily when the client reads.
//!
//! # Architecture
//!
//! ## Producer side
//! - [`HardwareChannel`] - raw sample + update counter behind a spin lock,
//!   plus a wait queue for sleeping readers
//! - [`ChannelRegistry`] - immutable `(unit, kind)` lookup table built at init
//!
//! ## Consumer side
//! - [`CachedState`] - per-handle rendering, timestamp and stream position
//!   behind a sleep-capable lock
//! - [`Render`] - pluggable raw-to-bytes conversion, run outside the spin lock
//! - [`CachedState::read`] - blocking read with partial reads and auto-rewind
//! - [`Interrupt`] - cancellation signal for every sleeping step
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use lunix_core::{CachedState, HardwareChannel, Interrupt};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let channel = Arc::new(HardwareChannel::new("sensor0-temp", 0u32));
//! let render =
//!     |raw: &u32, out: &mut BytesMut| out.extend_from_slice(format!("{raw}\n").as_bytes());
//! let state = CachedState::new(channel.clone(), Arc::new(render), 20);
//!
//! channel.publish(42);
//!
//! let mut buf = [0u8; 20];
//! let n = state.read(&mut buf[..], &Interrupt::new()).await?;
//! assert_eq!(&buf[..n], b"42\n");
//! # Ok::<(), lunix_core::ChannelError>(())
//! # });
//! ```

pub mod channel;
pub mod error;
pub mod interrupt;
pub mod read;
pub mod refresh;
pub mod registry;
pub mod state;

pub use channel::{HardwareChannel, Snapshot};
pub use error::{ChannelError, Result, UpdateError};
pub use interrupt::Interrupt;
pub use read::{ReadPhase, ReadSink};
pub use refresh::{needs_refresh, Render};
pub use registry::{ChannelId, ChannelRegistry};
pub use state::{CacheGuard, CachedState};
