//! Error types for the virtio-crypto guest driver and host device.
//!
//! Errors raised on the host side travel back to the guest as a numeric
//! status in the reply packet; [`CryptoError::errno`] produces that status
//! and [`CryptoError::from_status`] turns it back into an error on the guest.

use lunix_core::ChannelError;
use thiserror::Error;

/// Result type alias for crypto device operations.
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur while exchanging or serving crypto requests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Failure from the cached channel core (interrupts, non-blocking misses).
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Session key longer than the device accepts.
    #[error("Key of {len} bytes exceeds the {max}-byte limit")]
    KeyTooLong { len: usize, max: usize },

    /// Payload longer than the device accepts.
    #[error("Data of {len} bytes exceeds the {max}-byte limit")]
    DataTooLong { len: usize, max: usize },

    /// Key length not supported by the cipher.
    #[error("Unsupported key length {len}")]
    BadKeyLength { len: usize },

    /// Payload not a whole number of cipher blocks.
    #[error("Data length {len} is not a multiple of the {block}-byte block")]
    Unaligned { len: usize, block: usize },

    /// Cipher algorithm the backend does not implement.
    #[error("Unsupported cipher {cipher}")]
    UnsupportedCipher { cipher: u32 },

    /// No session with this id exists.
    #[error("No session {ses}")]
    NoSession { ses: u32 },

    /// Packet could not be decoded.
    #[error("Malformed packet: {reason}")]
    Malformed { reason: String },

    /// A virtqueue had no free slot.
    #[error("Virtqueue '{queue}' is full")]
    QueueFull { queue: &'static str },

    /// The host has no open cipher device for this guest.
    #[error("Host cipher device is not open")]
    NotOpen,

    /// The host could not open its cipher device.
    #[error("Host failed to open its cipher device (fd {fd})")]
    HostOpenFailed { fd: i16 },

    /// Caller's output buffer is smaller than the result.
    #[error("Output buffer of {len} bytes cannot hold {needed}")]
    OutputTooSmall { len: usize, needed: usize },

    /// The host reported a failure status this side does not know.
    #[error("Host reported status {status}")]
    Device { status: i32 },
}

impl CryptoError {
    /// Errno value the character device returns for this error, also used as
    /// the status word of failed replies.
    pub fn errno(&self) -> i32 {
        match self {
            Self::Channel(err) => err.errno(),
            Self::KeyTooLong { .. }
            | Self::DataTooLong { .. }
            | Self::BadKeyLength { .. }
            | Self::Unaligned { .. }
            | Self::UnsupportedCipher { .. }
            | Self::NoSession { .. } => libc::EINVAL,
            Self::Malformed { .. } => libc::EPROTO,
            Self::QueueFull { .. } => libc::ENOSPC,
            Self::NotOpen => libc::EBADF,
            Self::HostOpenFailed { .. } => libc::ENODEV,
            Self::OutputTooSmall { .. } => libc::EFAULT,
            Self::Device { status } => *status,
        }
    }

    /// Rebuild an error from a reply status word.
    pub fn from_status(status: i32) -> Self {
        match status {
            libc::EBADF => Self::NotOpen,
            libc::EINTR => Self::Channel(ChannelError::Interrupted),
            status => Self::Device { status },
        }
    }

    /// Build a decoding error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Check if the call may be issued again unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Channel(err) if err.is_retryable())
    }
}
