//! Crypto ioctl commands and their arguments.
//!
//! The command set mirrors the cryptodev interface: open a session with a
//! key, run cipher operations on it, free it. Every length that can come
//! from an untrusted caller is checked against the limits here before any
//! buffer is built from it.

use crate::error::{CryptoError, Result};
use bytes::Bytes;
use lunix_core::ChannelError;
use std::fmt;

/// Virtio device id of the crypto device.
pub const VIRTIO_ID_CRYPTO: u32 = 13;

/// Longest accepted session key.
pub const CRYPTO_CIPHER_MAX_KEY_LEN: usize = 64;

/// Longest accepted payload of one cipher operation.
pub const CRYPTO_DATA_MAX_LEN: usize = 4096;

/// IV length (one AES block).
pub const CRYPTO_BLOCK_LEN: usize = 16;

/// ioctl command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    /// Create a session (`CIOCGSESSION`).
    GetSession = 102,
    /// Free a session (`CIOCFSESSION`).
    FreeSession = 103,
    /// Encrypt or decrypt (`CIOCCRYPT`).
    Crypt = 104,
}

impl Command {
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Decode a command code; unknown codes are `InvalidOperation`.
    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            102 => Ok(Self::GetSession),
            103 => Ok(Self::FreeSession),
            104 => Ok(Self::Crypt),
            _ => Err(ChannelError::InvalidOperation { op: "crypto ioctl" }.into()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GetSession => "CIOCGSESSION",
            Self::FreeSession => "CIOCFSESSION",
            Self::Crypt => "CIOCCRYPT",
        };
        f.write_str(name)
    }
}

/// Cipher algorithm identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherAlgorithm(pub u32);

impl CipherAlgorithm {
    /// AES in CBC mode (`CRYPTO_AES_CBC`).
    pub const AES_CBC: Self = Self(11);
}

/// Direction of a cipher operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Encrypt = 0,
    Decrypt = 1,
}

impl Direction {
    pub fn from_code(code: u16) -> Result<Self> {
        match code {
            0 => Ok(Self::Encrypt),
            1 => Ok(Self::Decrypt),
            other => Err(CryptoError::malformed(format!("unknown direction {other}"))),
        }
    }
}

/// One cipher operation on an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptOp {
    pub ses: u32,
    pub op: Direction,
    pub iv: [u8; CRYPTO_BLOCK_LEN],
    pub src: Bytes,
}

/// Argument of an ioctl call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Open a session with `key`.
    GetSession { cipher: CipherAlgorithm, key: Bytes },
    /// Run one operation.
    Crypt(CryptOp),
    /// Close session `ses`.
    FreeSession { ses: u32 },
}

impl Request {
    /// Command this argument belongs to.
    pub fn command(&self) -> Command {
        match self {
            Self::GetSession { .. } => Command::GetSession,
            Self::Crypt(_) => Command::Crypt,
            Self::FreeSession { .. } => Command::FreeSession,
        }
    }

    /// Check caller-controlled lengths against the device limits.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::GetSession { key, .. } => check_key_len(key.len()),
            Self::Crypt(op) => check_data_len(op.src.len()),
            Self::FreeSession { .. } => Ok(()),
        }
    }
}

/// Result of a successful ioctl call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Session created.
    Session { ses: u32 },
    /// Output of a cipher operation (same length as the input).
    Crypt { dst: Bytes },
    /// Session freed.
    Freed { ses: u32 },
}

impl Response {
    pub fn command(&self) -> Command {
        match self {
            Self::Session { .. } => Command::GetSession,
            Self::Crypt { .. } => Command::Crypt,
            Self::Freed { .. } => Command::FreeSession,
        }
    }
}

pub(crate) fn check_key_len(len: usize) -> Result<()> {
    if len > CRYPTO_CIPHER_MAX_KEY_LEN {
        return Err(CryptoError::KeyTooLong {
            len,
            max: CRYPTO_CIPHER_MAX_KEY_LEN,
        });
    }
    Ok(())
}

pub(crate) fn check_data_len(len: usize) -> Result<()> {
    if len > CRYPTO_DATA_MAX_LEN {
        return Err(CryptoError::DataTooLong {
            len,
            max: CRYPTO_DATA_MAX_LEN,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes() {
        for cmd in [Command::GetSession, Command::FreeSession, Command::Crypt] {
            assert_eq!(Command::from_code(cmd.code()).unwrap(), cmd);
        }
        assert_eq!(
            Command::from_code(7).unwrap_err(),
            CryptoError::Channel(ChannelError::InvalidOperation { op: "crypto ioctl" })
        );
    }

    #[test]
    fn test_validate_limits() {
        let ok = Request::GetSession {
            cipher: CipherAlgorithm::AES_CBC,
            key: Bytes::from(vec![0u8; CRYPTO_CIPHER_MAX_KEY_LEN]),
        };
        assert!(ok.validate().is_ok());

        let long_key = Request::GetSession {
            cipher: CipherAlgorithm::AES_CBC,
            key: Bytes::from(vec![0u8; CRYPTO_CIPHER_MAX_KEY_LEN + 1]),
        };
        assert_eq!(
            long_key.validate().unwrap_err(),
            CryptoError::KeyTooLong { len: 65, max: 64 }
        );

        let long_data = Request::Crypt(CryptOp {
            ses: 1,
            op: Direction::Encrypt,
            iv: [0; CRYPTO_BLOCK_LEN],
            src: Bytes::from(vec![0u8; CRYPTO_DATA_MAX_LEN + 16]),
        });
        assert!(matches!(long_data.validate(), Err(CryptoError::DataTooLong { .. })));
    }

    #[test]
    fn test_command_display() {
        assert_eq!(Command::Crypt.to_string(), "CIOCCRYPT");
    }
}
