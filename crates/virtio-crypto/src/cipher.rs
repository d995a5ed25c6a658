//! Host-side cipher backends.
//!
//! The host device forwards decoded requests to a [`CipherDevice`], the
//! equivalent of the host's `/dev/crypto`. [`SoftCipher`] implements it in
//! software with AES-CBC.

use crate::error::{CryptoError, Result};
use crate::ops::{CipherAlgorithm, Direction, CRYPTO_BLOCK_LEN};
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use tracing::debug;

/// A cipher device the host can open and issue session/crypt calls on.
pub trait CipherDevice: Send + Sync {
    /// Open the device, returning a descriptor.
    fn open(&self) -> Result<i32>;

    /// Close a descriptor returned by [`open`](Self::open).
    fn close(&self, fd: i32);

    /// Create a session for `cipher` keyed with `key`.
    fn create_session(&self, cipher: CipherAlgorithm, key: &[u8]) -> Result<u32>;

    /// Encrypt or decrypt `src` on session `ses`.
    fn crypt(
        &self,
        ses: u32,
        op: Direction,
        iv: &[u8; CRYPTO_BLOCK_LEN],
        src: &[u8],
    ) -> Result<Bytes>;

    /// Destroy a session.
    fn destroy_session(&self, ses: u32) -> Result<()>;
}

/// Software AES-CBC device (128, 192 or 256-bit keys, no padding).
#[derive(Debug)]
pub struct SoftCipher {
    sessions: Mutex<HashMap<u32, Vec<u8>>>,
    open_fds: Mutex<HashSet<i32>>,
    next_ses: AtomicU32,
    next_fd: AtomicI32,
}

impl Default for SoftCipher {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftCipher {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            open_fds: Mutex::new(HashSet::new()),
            next_ses: AtomicU32::new(1),
            next_fd: AtomicI32::new(3),
        }
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Number of open descriptors.
    pub fn open_count(&self) -> usize {
        self.open_fds.lock().len()
    }
}

impl CipherDevice for SoftCipher {
    fn open(&self) -> Result<i32> {
        let fd = self.next_fd.fetch_add(1, Ordering::Relaxed);
        self.open_fds.lock().insert(fd);
        debug!(fd, "soft cipher opened");
        Ok(fd)
    }

    fn close(&self, fd: i32) {
        self.open_fds.lock().remove(&fd);
        debug!(fd, "soft cipher closed");
    }

    fn create_session(&self, cipher: CipherAlgorithm, key: &[u8]) -> Result<u32> {
        if cipher != CipherAlgorithm::AES_CBC {
            return Err(CryptoError::UnsupportedCipher { cipher: cipher.0 });
        }
        if !matches!(key.len(), 16 | 24 | 32) {
            return Err(CryptoError::BadKeyLength { len: key.len() });
        }
        let ses = self.next_ses.fetch_add(1, Ordering::Relaxed);
        self.sessions.lock().insert(ses, key.to_vec());
        debug!(ses, key_bits = key.len() * 8, "session created");
        Ok(ses)
    }

    fn crypt(
        &self,
        ses: u32,
        op: Direction,
        iv: &[u8; CRYPTO_BLOCK_LEN],
        src: &[u8],
    ) -> Result<Bytes> {
        let key = self
            .sessions
            .lock()
            .get(&ses)
            .cloned()
            .ok_or(CryptoError::NoSession { ses })?;
        if src.len() % CRYPTO_BLOCK_LEN != 0 {
            return Err(CryptoError::Unaligned {
                len: src.len(),
                block: CRYPTO_BLOCK_LEN,
            });
        }

        let mut buf = src.to_vec();
        match (op, key.len()) {
            (Direction::Encrypt, 16) => cbc_encrypt::<aes::Aes128>(&key, iv, &mut buf)?,
            (Direction::Encrypt, 24) => cbc_encrypt::<aes::Aes192>(&key, iv, &mut buf)?,
            (Direction::Encrypt, _) => cbc_encrypt::<aes::Aes256>(&key, iv, &mut buf)?,
            (Direction::Decrypt, 16) => cbc_decrypt::<aes::Aes128>(&key, iv, &mut buf)?,
            (Direction::Decrypt, 24) => cbc_decrypt::<aes::Aes192>(&key, iv, &mut buf)?,
            (Direction::Decrypt, _) => cbc_decrypt::<aes::Aes256>(&key, iv, &mut buf)?,
        }
        Ok(Bytes::from(buf))
    }

    fn destroy_session(&self, ses: u32) -> Result<()> {
        self.sessions
            .lock()
            .remove(&ses)
            .map(|_| debug!(ses, "session destroyed"))
            .ok_or(CryptoError::NoSession { ses })
    }
}

fn cbc_encrypt<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let len = buf.len();
    cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| CryptoError::BadKeyLength { len: key.len() })?
        .encrypt_padded_mut::<NoPadding>(buf, len)
        .map_err(|_| CryptoError::Unaligned {
            len,
            block: CRYPTO_BLOCK_LEN,
        })?;
    Ok(())
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    let len = buf.len();
    cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| CryptoError::BadKeyLength { len: key.len() })?
        .decrypt_padded_mut::<NoPadding>(buf)
        .map_err(|_| CryptoError::Unaligned {
            len,
            block: CRYPTO_BLOCK_LEN,
        })?;
    Ok(())
}
