//! Error types for the Lunix character device.

use lunix_core::ChannelError;
use thiserror::Error;

/// Result type alias for Lunix device operations.
pub type Result<T> = std::result::Result<T, LunixError>;

/// Errors that can occur when registering, opening or reading sensor nodes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LunixError {
    /// Failure from the cached channel core (interrupts, bad buffers, lookups).
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The device-number range overlaps one that is already registered.
    #[error("Device numbers {major}:{first}..{end} are busy (held by '{holder}')")]
    RegionBusy {
        major: u32,
        first: u32,
        end: u32,
        holder: String,
    },

    /// A device node name that does not follow `lunix<N>-<batt|temp|light>`.
    #[error("Not a Lunix node name: '{name}'")]
    BadNodeName { name: String },

    /// Invalid device configuration (zero sensors, oversized minor range).
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The sensor simulator task ended abnormally.
    #[error("Sensor simulator failed: {message}")]
    Simulator { message: String },
}

impl LunixError {
    /// Errno value the character device would return for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Self::Channel(err) => err.errno(),
            Self::RegionBusy { .. } => libc::EBUSY,
            Self::BadNodeName { .. } => libc::ENOENT,
            Self::InvalidConfig { .. } => libc::EINVAL,
            Self::Simulator { .. } => libc::EIO,
        }
    }

    /// Check if this error came from an interrupted wait.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Channel(ChannelError::Interrupted))
    }

    /// Check if the device-number range was already taken.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::RegionBusy { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_errors_keep_their_errno() {
        let err: LunixError = ChannelError::InvalidOperation { op: "ioctl" }.into();
        assert_eq!(err.errno(), libc::EINVAL);
        assert_eq!(err.to_string(), "Operation not supported: ioctl");
    }

    #[test]
    fn test_region_busy() {
        let err = LunixError::RegionBusy {
            major: 60,
            first: 0,
            end: 128,
            holder: "Lunix:TNG".to_string(),
        };
        assert!(err.is_busy());
        assert_eq!(err.errno(), libc::EBUSY);
        assert!(err.to_string().contains("60:0..128"));
    }

    #[test]
    fn test_is_interrupted() {
        assert!(LunixError::from(ChannelError::Interrupted).is_interrupted());
        assert!(!LunixError::from(ChannelError::BadAddress).is_interrupted());
    }
}
