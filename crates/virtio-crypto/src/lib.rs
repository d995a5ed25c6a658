//! Paravirtualized crypto device.
//!
//! A guest driver exposes a cryptodev-style ioctl interface (sessions and
//! AES-CBC operations) and forwards every call to a host device model over
//! four in-memory virtqueues. The host executes the call on a
//! [`CipherDevice`] and answers on the input queue.
//!
//! ```text
//!  CryptoFile::ioctl ──► ovq ──► CryptoHost::handle_output ──► CipherDevice
//!        ▲                                   │
//!        └──── CachedState ◄── ivq ◄─────────┘
//! ```
//!
//! The guest side reuses the cached channel core from `lunix-core`: replies
//! are published into a [`lunix_core::HardwareChannel`] by the queue callback
//! and picked up by refreshing a [`lunix_core::CachedState`], with the same
//! blocking, non-blocking and interrupt semantics as a sensor read.

pub mod cipher;
pub mod error;
pub mod guest;
pub mod host;
pub mod ops;
pub mod virtqueue;
pub mod wire;

pub use cipher::{CipherDevice, SoftCipher};
pub use error::{CryptoError, Result};
pub use guest::{CryptoDriver, CryptoFile, CryptoGuest, OpenFlags};
pub use host::{CryptoHost, HostStats, VirtioCryptoConfig, FD_NOT_OPENED};
pub use ops::{
    CipherAlgorithm, Command, CryptOp, Direction, Request, Response, CRYPTO_BLOCK_LEN,
    CRYPTO_CIPHER_MAX_KEY_LEN, CRYPTO_DATA_MAX_LEN, VIRTIO_ID_CRYPTO,
};
pub use virtqueue::{Transport, Virtqueue, CONTROL_QUEUE_SIZE, DATA_QUEUE_SIZE};
pub use wire::{ControlPacket, ReplyPacket, RequestPacket};

use std::sync::Arc;

/// Wire a guest and a host to one fresh transport.
///
/// The guest is probed on `driver`; the host is returned unstarted, spawn
/// [`CryptoHost::run`] to serve it.
pub fn connect(
    driver: &CryptoDriver,
    transport: Arc<Transport>,
    backend: Arc<dyn CipherDevice>,
) -> (Arc<CryptoGuest>, Arc<CryptoHost>) {
    let host = Arc::new(CryptoHost::new(transport.clone(), backend));
    let guest = driver.probe(transport);
    (guest, host)
}
