//! Error types for cached hardware channels.
//!
//! Every failure a client can observe is a [`ChannelError`]. The refresh
//! protocol additionally produces [`UpdateError::Stale`], a control signal
//! that drives the blocking read loop and never reaches a caller.
//!
//! ## Error Categories
//!
//! - **Retryable** - `Interrupted`, `WouldBlock`: the call made no visible
//!   state change and may simply be issued again.
//! - **Caller errors** - `BadAddress`, `InvalidOperation`: fix the call.
//! - **Configuration errors** - `NotFound`, `UnknownKind`, `BufferOverflow`,
//!   `NonMonotonic`: raised before any per-client state exists, or by a
//!   producer/renderer breaking its contract.

use thiserror::Error;

/// Result type alias for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Errors surfaced by channel, cache and read operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// A lock acquisition or wait was cancelled by an interrupt signal.
    ///
    /// No lock is held and no cached state was modified; the call can be
    /// retried once the signal has been handled.
    #[error("Interrupted while waiting; call again")]
    Interrupted,

    /// The caller-supplied output location rejected the copy.
    #[error("Bad address: output buffer rejected the copy")]
    BadAddress,

    /// No channel exists for the requested unit.
    #[error("No unit {unit}: registry holds {units} units")]
    NotFound { unit: usize, units: usize },

    /// The requested kind is not served by this registry or converter.
    #[error("Unknown channel kind {kind}: {kinds} kinds per unit")]
    UnknownKind { kind: usize, kinds: usize },

    /// The control operation is not supported on this handle.
    #[error("Operation not supported: {op}")]
    InvalidOperation { op: &'static str },

    /// A rendering did not fit the bounded cache buffer.
    #[error("Rendered {len} bytes but the cache holds at most {max}")]
    BufferOverflow { len: usize, max: usize },

    /// A producer supplied a timestamp that does not move forward.
    #[error("Timestamp {proposed} does not advance past {current}")]
    NonMonotonic { current: u64, proposed: u64 },

    /// Non-blocking access found no fresh data.
    #[error("No data available yet; try again")]
    WouldBlock,
}

impl ChannelError {
    /// Errno value a kernel file operation would return for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Self::Interrupted => libc::EINTR,
            Self::BadAddress => libc::EFAULT,
            Self::NotFound { .. } | Self::UnknownKind { .. } => libc::ENODEV,
            Self::InvalidOperation { .. } | Self::NonMonotonic { .. } => libc::EINVAL,
            Self::BufferOverflow { .. } => libc::ENOBUFS,
            Self::WouldBlock => libc::EAGAIN,
        }
    }

    /// Whether the caller may retry the same call unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Interrupted | Self::WouldBlock)
    }
}

/// Outcome of a failed [`update`](crate::state::CacheGuard::update).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    /// The cache already reflects the channel's latest sample.
    #[error("Cached state is already current")]
    Stale,

    /// Refreshing failed for a reason the caller must see.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChannelError::NotFound { unit: 20, units: 16 };
        assert!(err.to_string().contains("20"));
        assert!(err.to_string().contains("16"));
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(ChannelError::Interrupted.errno(), libc::EINTR);
        assert_eq!(ChannelError::BadAddress.errno(), libc::EFAULT);
        assert_eq!(
            ChannelError::InvalidOperation { op: "ioctl" }.errno(),
            libc::EINVAL
        );
        assert_eq!(ChannelError::WouldBlock.errno(), libc::EAGAIN);
    }

    #[test]
    fn test_only_interruptions_are_retryable() {
        assert!(ChannelError::Interrupted.is_retryable());
        assert!(ChannelError::WouldBlock.is_retryable());
        assert!(!ChannelError::BadAddress.is_retryable());
    }

    #[test]
    fn test_update_error_wraps_channel_error() {
        let err: UpdateError = ChannelError::BadAddress.into();
        assert_eq!(err, UpdateError::Channel(ChannelError::BadAddress));
        assert_eq!(UpdateError::Stale.to_string(), "Cached state is already current");
    }
}
