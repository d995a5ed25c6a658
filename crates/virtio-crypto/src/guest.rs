//! Guest driver.
//!
//! Each probed device owns two cached channels fed from its host-to-guest
//! queues: the input-queue callback publishes every reply packet into the
//! reply channel, and the control-queue callback publishes control packets
//! into the control channel. An ioctl then works like a sensor read: send the
//! request, and refresh a cached view of the reply channel until it shows the
//! reply carrying this request's sequence number.
//!
//! One exchange runs at a time per device (the request lock). A reply whose
//! sequence number does not match was left behind by an exchange that was
//! interrupted or gave up in non-blocking mode; it is dropped. If that reply
//! opened a session, the session is freed ahead of the next request.
//! Control packets are numbered the same way, and an `open` abandoned after
//! its `GUEST_OPEN` was sent is balanced by a close.

use crate::error::{CryptoError, Result};
use crate::ops::{
    CipherAlgorithm, Command, CryptOp, Direction, Request, Response, CRYPTO_BLOCK_LEN,
};
use crate::virtqueue::{Transport, Virtqueue};
use crate::wire::{
    ControlPacket, ReplyPacket, RequestPacket, CONTROL_LEN, HOST_OPEN, MAX_REPLY_LEN,
};
use bytes::{Bytes, BytesMut};
use lunix_core::{CachedState, ChannelError, HardwareChannel, Interrupt, UpdateError};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Flags given at open time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Fail with `WouldBlock` instead of sleeping when no reply is ready.
    pub nonblocking: bool,
}

impl OpenFlags {
    pub const NONBLOCK: Self = Self { nonblocking: true };
}

fn copy_packet(packet: &Bytes, out: &mut BytesMut) {
    out.extend_from_slice(packet);
}

/// Feed every packet that arrives on `vq` into `channel`.
fn publish_arrivals(vq: &Virtqueue, channel: &Arc<HardwareChannel<Bytes>>) {
    let channel = channel.clone();
    vq.set_callback(Arc::new(move |vq: &Virtqueue| {
        while let Some(packet) = vq.pop() {
            channel.publish(packet);
        }
    }));
}

/// Wait for the next packet on a cached channel.
///
/// Returns whatever the cache was refreshed to, which may be an empty
/// placeholder on the very first refresh.
async fn next_packet(
    cache: &CachedState<Bytes>,
    nonblocking: bool,
    interrupt: &Interrupt,
) -> Result<Bytes> {
    let mut guard = cache.lock(interrupt).await?;
    if nonblocking {
        match guard.update() {
            Ok(()) => {}
            Err(UpdateError::Stale) => return Err(ChannelError::WouldBlock.into()),
            Err(UpdateError::Channel(err)) => return Err(err.into()),
        }
    } else {
        guard = cache.refresh_blocking(guard, interrupt).await?;
    }
    Ok(guard.bytes().clone())
}

/// One virtio-crypto device as seen by the guest.
pub struct CryptoGuest {
    minor: u32,
    transport: Arc<Transport>,
    replies: CachedState<Bytes>,
    control: CachedState<Bytes>,
    request_lock: tokio::sync::Mutex<()>,
    next_seq: AtomicU64,
    next_control_seq: AtomicU32,
    /// Sessions granted to abandoned exchanges, freed before the next request.
    orphans: Mutex<Vec<u32>>,
}

impl fmt::Debug for CryptoGuest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoGuest")
            .field("minor", &self.minor)
            .field("next_seq", &self.next_seq.load(Ordering::Relaxed))
            .field("orphans", &*self.orphans.lock())
            .finish_non_exhaustive()
    }
}

impl CryptoGuest {
    /// Attach to `transport`, installing the input and control callbacks.
    pub fn probe(minor: u32, transport: Arc<Transport>) -> Arc<Self> {
        let reply_channel =
            Arc::new(HardwareChannel::new(format!("crypto{minor}-ivq"), Bytes::new()));
        let control_channel =
            Arc::new(HardwareChannel::new(format!("crypto{minor}-c_ivq"), Bytes::new()));
        publish_arrivals(&transport.ivq, &reply_channel);
        publish_arrivals(&transport.c_ivq, &control_channel);

        info!(minor, "virtio-crypto device probed");
        Arc::new(Self {
            minor,
            transport,
            replies: CachedState::new(reply_channel, Arc::new(copy_packet), MAX_REPLY_LEN),
            control: CachedState::new(control_channel, Arc::new(copy_packet), CONTROL_LEN),
            request_lock: tokio::sync::Mutex::new(()),
            next_seq: AtomicU64::new(1),
            next_control_seq: AtomicU32::new(1),
            orphans: Mutex::new(Vec::new()),
        })
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    /// Detach the callbacks from the transport.
    pub fn remove(&self) {
        self.transport.ivq.clear_callback();
        self.transport.c_ivq.clear_callback();
        info!(minor = self.minor, "virtio-crypto device removed");
    }

    /// Send `GUEST_OPEN(open)`, returning its sequence number.
    fn send_guest_open(&self, open: bool) -> Result<u32> {
        let seq = self.next_control_seq.fetch_add(1, Ordering::Relaxed);
        self.transport.c_ovq.push(ControlPacket::guest_open(seq, open).encode())?;
        self.transport.c_ovq.notify();
        Ok(seq)
    }

    async fn host_open_reply(&self, seq: u32, interrupt: &Interrupt) -> Result<i16> {
        loop {
            let packet = next_packet(&self.control, false, interrupt).await?;
            if packet.is_empty() {
                continue;
            }
            let control = ControlPacket::decode(&packet)?;
            if control.event != HOST_OPEN {
                debug!(minor = self.minor, event = control.event, "ignoring control event");
            } else if control.seq != seq {
                warn!(
                    minor = self.minor,
                    expected = seq,
                    got = control.seq,
                    "discarding stale open reply"
                );
            } else {
                return Ok(control.value);
            }
        }
    }

    /// Open the device: ask the host to open its cipher device and wait for
    /// the descriptor it reports.
    ///
    /// If the wait fails after the request went out, a close is sent so the
    /// host's open count is left as it was.
    pub async fn open(
        self: &Arc<Self>,
        flags: OpenFlags,
        interrupt: &Interrupt,
    ) -> Result<CryptoFile> {
        let _serial = interrupt.guard(self.request_lock.lock()).await?;
        let seq = self.send_guest_open(true)?;

        let fd = match self.host_open_reply(seq, interrupt).await {
            Ok(fd) => fd,
            Err(err) => {
                warn!(minor = self.minor, seq, %err, "open abandoned, closing");
                self.send_guest_open(false)?;
                return Err(err);
            }
        };
        if fd < 0 {
            return Err(CryptoError::HostOpenFailed { fd });
        }

        debug!(minor = self.minor, fd, "crypto device opened");
        Ok(CryptoFile {
            guest: self.clone(),
            flags,
            host_fd: fd,
        })
    }

    /// Send `request` and wait for its reply.
    ///
    /// Lengths are validated before anything is queued. In non-blocking mode
    /// a reply that is not already there fails with `WouldBlock`; the
    /// request stays queued and its late reply is discarded by a later
    /// exchange.
    pub async fn exchange(
        &self,
        request: Request,
        flags: OpenFlags,
        interrupt: &Interrupt,
    ) -> Result<Response> {
        request.validate()?;
        let _serial = interrupt.guard(self.request_lock.lock()).await?;
        self.free_orphans();

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let command = request.command();
        let packet = RequestPacket { seq, request }.encode()?;
        self.transport.ovq.push(packet)?;
        self.transport.ovq.notify();
        debug!(minor = self.minor, seq, %command, "request sent");

        loop {
            let packet = next_packet(&self.replies, flags.nonblocking, interrupt).await?;
            if packet.is_empty() {
                continue;
            }
            let reply = ReplyPacket::decode(packet)?;
            if reply.seq != seq {
                warn!(
                    minor = self.minor,
                    expected = seq,
                    got = reply.seq,
                    "discarding stale reply"
                );
                if let Ok(Response::Session { ses }) = reply.outcome {
                    self.orphans.lock().push(ses);
                }
                continue;
            }
            debug!(minor = self.minor, seq, ok = reply.outcome.is_ok(), "reply received");
            return reply.into_response();
        }
    }

    /// Queue a `FreeSession` for every orphaned session. Their replies are
    /// skipped like any other stale reply.
    fn free_orphans(&self) {
        let orphans = std::mem::take(&mut *self.orphans.lock());
        for ses in orphans {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            let packet = RequestPacket {
                seq,
                request: Request::FreeSession { ses },
            }
            .encode();
            match packet.and_then(|packet| self.transport.ovq.push(packet)) {
                Ok(()) => {
                    info!(minor = self.minor, ses, seq, "freeing session of an abandoned exchange");
                }
                Err(err) => {
                    warn!(minor = self.minor, ses, %err, "cannot free orphaned session yet");
                    self.orphans.lock().push(ses);
                }
            }
        }
    }

    /// Sessions waiting to be freed on behalf of abandoned exchanges.
    pub fn orphaned_sessions(&self) -> Vec<u32> {
        self.orphans.lock().clone()
    }
}

/// An open crypto device.
pub struct CryptoFile {
    guest: Arc<CryptoGuest>,
    flags: OpenFlags,
    host_fd: i16,
}

impl fmt::Debug for CryptoFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoFile")
            .field("minor", &self.guest.minor)
            .field("flags", &self.flags)
            .field("host_fd", &self.host_fd)
            .finish()
    }
}

fn unexpected(response: &Response, expected: Command) -> CryptoError {
    CryptoError::malformed(format!("{} reply to {expected}", response.command()))
}

impl CryptoFile {
    /// Descriptor of the host's cipher device backing this file.
    pub fn host_fd(&self) -> i16 {
        self.host_fd
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Raw ioctl entry point. `arg` must belong to `cmd`.
    pub async fn ioctl(&self, cmd: u32, arg: Request, interrupt: &Interrupt) -> Result<Response> {
        let command = Command::from_code(cmd)?;
        if arg.command() != command {
            return Err(ChannelError::InvalidOperation { op: "crypto ioctl" }.into());
        }
        self.guest.exchange(arg, self.flags, interrupt).await
    }

    /// `CIOCGSESSION`: open a session keyed with `key`.
    pub async fn get_session(
        &self,
        cipher: CipherAlgorithm,
        key: &[u8],
        interrupt: &Interrupt,
    ) -> Result<u32> {
        let request = Request::GetSession {
            cipher,
            key: Bytes::copy_from_slice(key),
        };
        match self.guest.exchange(request, self.flags, interrupt).await? {
            Response::Session { ses } => Ok(ses),
            other => Err(unexpected(&other, Command::GetSession)),
        }
    }

    /// `CIOCCRYPT`: run one operation, writing the result into `dst`.
    ///
    /// Returns the number of bytes written.
    pub async fn crypt(
        &self,
        ses: u32,
        op: Direction,
        iv: &[u8; CRYPTO_BLOCK_LEN],
        src: &[u8],
        dst: &mut [u8],
        interrupt: &Interrupt,
    ) -> Result<usize> {
        if dst.len() < src.len() {
            return Err(CryptoError::OutputTooSmall {
                len: dst.len(),
                needed: src.len(),
            });
        }
        let request = Request::Crypt(CryptOp {
            ses,
            op,
            iv: *iv,
            src: Bytes::copy_from_slice(src),
        });
        match self.guest.exchange(request, self.flags, interrupt).await? {
            Response::Crypt { dst: out } => {
                let len = dst.len();
                let target = dst.get_mut(..out.len()).ok_or(CryptoError::OutputTooSmall {
                    len,
                    needed: out.len(),
                })?;
                target.copy_from_slice(&out);
                Ok(out.len())
            }
            other => Err(unexpected(&other, Command::Crypt)),
        }
    }

    /// `CIOCFSESSION`: free a session.
    pub async fn free_session(&self, ses: u32, interrupt: &Interrupt) -> Result<()> {
        match self.guest.exchange(Request::FreeSession { ses }, self.flags, interrupt).await? {
            Response::Freed { .. } => Ok(()),
            other => Err(unexpected(&other, Command::FreeSession)),
        }
    }

    /// Close the file; the host closes its cipher device once no file is left.
    pub fn close(self) -> Result<()> {
        self.guest.send_guest_open(false)?;
        debug!(minor = self.guest.minor, "crypto device closed");
        Ok(())
    }
}

/// Driver-wide list of probed devices.
#[derive(Debug, Default)]
pub struct CryptoDriver {
    devices: Mutex<Vec<Arc<CryptoGuest>>>,
    next_minor: AtomicU32,
}

impl CryptoDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe a new device on `transport`, giving it the next minor.
    pub fn probe(&self, transport: Arc<Transport>) -> Arc<CryptoGuest> {
        let minor = self.next_minor.fetch_add(1, Ordering::Relaxed);
        let guest = CryptoGuest::probe(minor, transport);
        self.devices.lock().push(guest.clone());
        guest
    }

    /// Look a device up by minor.
    pub fn device(&self, minor: u32) -> Result<Arc<CryptoGuest>> {
        let devices = self.devices.lock();
        devices
            .iter()
            .find(|guest| guest.minor == minor)
            .cloned()
            .ok_or_else(|| {
                ChannelError::NotFound {
                    unit: minor as usize,
                    units: devices.len(),
                }
                .into()
            })
    }

    /// Remove a device, detaching it from its transport.
    pub fn remove(&self, minor: u32) -> Option<Arc<CryptoGuest>> {
        let mut devices = self.devices.lock();
        let index = devices.iter().position(|guest| guest.minor == minor)?;
        let guest = devices.remove(index);
        guest.remove();
        Some(guest)
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }
}
