//! Packet codec for the virtqueues.
//!
//! All integers are little-endian.
//!
//! Request (`ovq`): `seq:u64 | cmd:u32 | payload`
//!
//! | cmd          | payload                                          |
//! |--------------|--------------------------------------------------|
//! | GetSession   | `cipher:u32 | keylen:u32 | key`                  |
//! | Crypt        | `ses:u32 | op:u16 | len:u32 | iv[16] | src[len]` |
//! | FreeSession  | `ses:u32`                                        |
//!
//! Reply (`ivq`): `seq:u64 | cmd:u32 | status:i32 | payload`, where a non-zero
//! status carries no payload and otherwise the payload is `ses:u32`,
//! `len:u32 | dst[len]` or `ses:u32` respectively.
//!
//! Control (`c_ivq`/`c_ovq`): `seq:u32 | event:u16 | value:i16`. The host
//! answers a `GUEST_OPEN` with a `HOST_OPEN` carrying the same `seq`.
//!
//! Decoders check every length field against the device limits and the
//! bytes actually present before slicing anything out of the packet.

use crate::error::{CryptoError, Result};
use crate::ops::{
    check_data_len, check_key_len, CipherAlgorithm, Command, CryptOp, Direction, Request, Response,
    CRYPTO_BLOCK_LEN, CRYPTO_DATA_MAX_LEN,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// `seq` + `cmd`.
pub const REQUEST_HEADER_LEN: usize = 12;

/// `seq` + `cmd` + `status`.
pub const REPLY_HEADER_LEN: usize = 16;

/// Largest reply the host can produce.
pub const MAX_REPLY_LEN: usize = REPLY_HEADER_LEN + 4 + CRYPTO_DATA_MAX_LEN;

/// Control event: guest opened (`value = 1`) or closed (`value = 0`) the device.
pub const GUEST_OPEN: u16 = 0;

/// Control event: host opened its cipher device; `value` is the descriptor.
pub const HOST_OPEN: u16 = 1;

/// Length of a control packet.
pub const CONTROL_LEN: usize = 8;

fn need(buf: &Bytes, len: usize, what: &str) -> Result<()> {
    if buf.remaining() < len {
        return Err(CryptoError::malformed(format!(
            "{what}: need {len} bytes, {} left",
            buf.remaining()
        )));
    }
    Ok(())
}

fn get_u32(buf: &mut Bytes, what: &str) -> Result<u32> {
    need(buf, 4, what)?;
    Ok(buf.get_u32_le())
}

fn get_len(buf: &mut Bytes, what: &str) -> Result<usize> {
    Ok(get_u32(buf, what)? as usize)
}

fn finish(buf: &Bytes) -> Result<()> {
    if buf.has_remaining() {
        return Err(CryptoError::malformed(format!(
            "{} trailing bytes",
            buf.remaining()
        )));
    }
    Ok(())
}

/// Sequence number and raw command code of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub seq: u64,
    pub cmd: u32,
}

impl RequestHeader {
    /// Read the header without consuming the packet.
    pub fn peek(packet: &[u8]) -> Result<Self> {
        let mut header = packet.get(..REQUEST_HEADER_LEN).ok_or_else(|| {
            CryptoError::malformed(format!("request of {} bytes has no header", packet.len()))
        })?;
        Ok(Self {
            seq: header.get_u64_le(),
            cmd: header.get_u32_le(),
        })
    }
}

/// A request travelling guest to host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPacket {
    pub seq: u64,
    pub request: Request,
}

impl RequestPacket {
    /// Encode after validating the request's lengths.
    pub fn encode(&self) -> Result<Bytes> {
        self.request.validate()?;
        let mut buf = BytesMut::with_capacity(REQUEST_HEADER_LEN + 32);
        buf.put_u64_le(self.seq);
        buf.put_u32_le(self.request.command().code());
        match &self.request {
            Request::GetSession { cipher, key } => {
                buf.put_u32_le(cipher.0);
                buf.put_u32_le(key.len() as u32);
                buf.put_slice(key);
            }
            Request::Crypt(op) => {
                buf.put_u32_le(op.ses);
                buf.put_u16_le(op.op as u16);
                buf.put_u32_le(op.src.len() as u32);
                buf.put_slice(&op.iv);
                buf.put_slice(&op.src);
            }
            Request::FreeSession { ses } => buf.put_u32_le(*ses),
        }
        Ok(buf.freeze())
    }

    pub fn decode(mut buf: Bytes) -> Result<Self> {
        need(&buf, REQUEST_HEADER_LEN, "request header")?;
        let seq = buf.get_u64_le();
        let command = Command::from_code(buf.get_u32_le())?;

        let request = match command {
            Command::GetSession => {
                let cipher = CipherAlgorithm(get_u32(&mut buf, "cipher")?);
                let keylen = get_len(&mut buf, "key length")?;
                check_key_len(keylen)?;
                need(&buf, keylen, "key")?;
                Request::GetSession {
                    cipher,
                    key: buf.split_to(keylen),
                }
            }
            Command::Crypt => {
                let ses = get_u32(&mut buf, "session")?;
                need(&buf, 2, "direction")?;
                let op = Direction::from_code(buf.get_u16_le())?;
                let len = get_len(&mut buf, "data length")?;
                check_data_len(len)?;
                need(&buf, CRYPTO_BLOCK_LEN + len, "iv and data")?;
                let mut iv = [0u8; CRYPTO_BLOCK_LEN];
                buf.copy_to_slice(&mut iv);
                Request::Crypt(CryptOp {
                    ses,
                    op,
                    iv,
                    src: buf.split_to(len),
                })
            }
            Command::FreeSession => Request::FreeSession {
                ses: get_u32(&mut buf, "session")?,
            },
        };
        finish(&buf)?;
        Ok(Self { seq, request })
    }
}

/// A reply travelling host to guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyPacket {
    pub seq: u64,
    pub cmd: u32,
    /// The response, or the errno-style status of a failed request.
    pub outcome: std::result::Result<Response, i32>,
}

impl ReplyPacket {
    pub fn success(seq: u64, response: Response) -> Self {
        Self {
            seq,
            cmd: response.command().code(),
            outcome: Ok(response),
        }
    }

    pub fn failure(seq: u64, cmd: u32, err: &CryptoError) -> Self {
        Self {
            seq,
            cmd,
            outcome: Err(err.errno()),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(REPLY_HEADER_LEN + 8);
        buf.put_u64_le(self.seq);
        buf.put_u32_le(self.cmd);
        match &self.outcome {
            Err(status) => buf.put_i32_le(*status),
            Ok(response) => {
                buf.put_i32_le(0);
                match response {
                    Response::Session { ses } | Response::Freed { ses } => buf.put_u32_le(*ses),
                    Response::Crypt { dst } => {
                        buf.put_u32_le(dst.len() as u32);
                        buf.put_slice(dst);
                    }
                }
            }
        }
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self> {
        need(&buf, REPLY_HEADER_LEN, "reply header")?;
        let seq = buf.get_u64_le();
        let cmd = buf.get_u32_le();
        let status = buf.get_i32_le();
        if status != 0 {
            finish(&buf)?;
            return Ok(Self {
                seq,
                cmd,
                outcome: Err(status),
            });
        }

        let response = match Command::from_code(cmd)? {
            Command::GetSession => Response::Session {
                ses: get_u32(&mut buf, "session")?,
            },
            Command::FreeSession => Response::Freed {
                ses: get_u32(&mut buf, "session")?,
            },
            Command::Crypt => {
                let len = get_len(&mut buf, "data length")?;
                check_data_len(len)?;
                need(&buf, len, "data")?;
                Response::Crypt {
                    dst: buf.split_to(len),
                }
            }
        };
        finish(&buf)?;
        Ok(Self {
            seq,
            cmd,
            outcome: Ok(response),
        })
    }

    /// The response, or the host's failure as an error.
    pub fn into_response(self) -> Result<Response> {
        self.outcome.map_err(CryptoError::from_status)
    }
}

/// Control message on the control virtqueues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlPacket {
    pub seq: u32,
    pub event: u16,
    pub value: i16,
}

impl ControlPacket {
    pub fn guest_open(seq: u32, open: bool) -> Self {
        Self {
            seq,
            event: GUEST_OPEN,
            value: i16::from(open),
        }
    }

    /// Answer to the `GUEST_OPEN` numbered `seq`.
    pub fn host_open(seq: u32, fd: i16) -> Self {
        Self {
            seq,
            event: HOST_OPEN,
            value: fd,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(CONTROL_LEN);
        buf.put_u32_le(self.seq);
        buf.put_u16_le(self.event);
        buf.put_i16_le(self.value);
        buf.freeze()
    }

    /// Decode; packets shorter than [`CONTROL_LEN`] are malformed.
    pub fn decode(mut packet: &[u8]) -> Result<Self> {
        if packet.len() < CONTROL_LEN {
            return Err(CryptoError::malformed(format!(
                "control packet of {} bytes",
                packet.len()
            )));
        }
        Ok(Self {
            seq: packet.get_u32_le(),
            event: packet.get_u16_le(),
            value: packet.get_i16_le(),
        })
    }
}
