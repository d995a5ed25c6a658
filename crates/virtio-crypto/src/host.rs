//! Host device model.
//!
//! Serves the guest-to-host queues: control packets open and close the
//! backing [`CipherDevice`], data packets are decoded, executed on it, and
//! answered on the input queue. Every decodable request gets a reply, with
//! an errno-style status when it failed, so a waiting guest never hangs on a
//! request the host rejected.
//!
//! Sessions are owned by the open backend: whatever the guest has not freed
//! when the last open is closed is destroyed together with it.

use crate::cipher::CipherDevice;
use crate::error::{CryptoError, Result};
use crate::ops::{Request, Response, VIRTIO_ID_CRYPTO};
use crate::virtqueue::{Transport, Virtqueue};
use crate::wire::{ControlPacket, ReplyPacket, RequestHeader, RequestPacket, GUEST_OPEN};
use bytes::Bytes;
use lunix_core::Interrupt;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Descriptor value while the backend is not open.
pub const FD_NOT_OPENED: i32 = -13;

/// Device configuration space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VirtioCryptoConfig {
    pub unused: u32,
}

impl VirtioCryptoConfig {
    pub const LEN: usize = 4;

    pub fn to_bytes(self) -> [u8; Self::LEN] {
        self.unused.to_le_bytes()
    }
}

#[derive(Debug)]
struct Backend {
    fd: i32,
    opens: usize,
    sessions: Vec<u32>,
}

/// Counters returned by [`CryptoHost::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub control: usize,
    pub requests: usize,
}

/// The host side of one virtio-crypto device.
pub struct CryptoHost {
    transport: Arc<Transport>,
    device: Arc<dyn CipherDevice>,
    config: VirtioCryptoConfig,
    backend: Mutex<Backend>,
}

impl fmt::Debug for CryptoHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoHost")
            .field("config", &self.config)
            .field("backend", &*self.backend.lock())
            .finish_non_exhaustive()
    }
}

impl CryptoHost {
    pub fn new(transport: Arc<Transport>, device: Arc<dyn CipherDevice>) -> Self {
        Self {
            transport,
            device,
            config: VirtioCryptoConfig::default(),
            backend: Mutex::new(Backend {
                fd: FD_NOT_OPENED,
                opens: 0,
                sessions: Vec::new(),
            }),
        }
    }

    pub fn device_id(&self) -> u32 {
        VIRTIO_ID_CRYPTO
    }

    /// Feature negotiation: the device needs no feature bits and accepts
    /// whatever the guest offers.
    pub fn get_features(&self, features: u32) -> u32 {
        features
    }

    pub fn get_config(&self) -> [u8; VirtioCryptoConfig::LEN] {
        self.config.to_bytes()
    }

    /// Config writes are accepted and ignored.
    pub fn set_config(&self, data: &[u8]) {
        trace!(len = data.len(), "ignoring config write");
    }

    /// Descriptor of the open backend, or [`FD_NOT_OPENED`].
    pub fn fd(&self) -> i32 {
        self.backend.lock().fd
    }

    fn send_control_event(&self, packet: ControlPacket) {
        if self.transport.c_ivq.push(packet.encode()).is_ok() {
            self.transport.c_ivq.notify();
        }
    }

    fn handle_control_message(&self, packet: &[u8]) {
        let control = match ControlPacket::decode(packet) {
            Ok(control) => control,
            Err(err) => {
                warn!(%err, "dropping invalid control packet");
                return;
            }
        };
        if control.event != GUEST_OPEN {
            debug!(event = control.event, "ignoring control event");
            return;
        }

        if control.value != 0 {
            let fd = {
                let mut backend = self.backend.lock();
                if backend.opens == 0 {
                    backend.fd = match self.device.open() {
                        Ok(fd) => fd,
                        Err(err) => {
                            warn!(%err, "failed to open cipher device");
                            -err.errno()
                        }
                    };
                }
                if backend.fd >= 0 {
                    backend.opens += 1;
                }
                backend.fd
            };
            info!(fd, seq = control.seq, "guest opened crypto device");
            let value = i16::try_from(fd).unwrap_or(i16::MIN);
            self.send_control_event(ControlPacket::host_open(control.seq, value));
        } else {
            let mut backend = self.backend.lock();
            backend.opens = backend.opens.saturating_sub(1);
            if backend.opens == 0 && backend.fd >= 0 {
                for ses in std::mem::take(&mut backend.sessions) {
                    if self.device.destroy_session(ses).is_ok() {
                        info!(ses, "destroyed session left open by the guest");
                    }
                }
                self.device.close(backend.fd);
                info!(fd = backend.fd, "closed cipher device");
                backend.fd = FD_NOT_OPENED;
            }
        }
    }

    /// Drain the control output queue. Returns the number of packets handled.
    pub fn handle_control(&self) -> usize {
        let mut handled = 0;
        while let Some(packet) = self.transport.c_ovq.pop() {
            self.handle_control_message(&packet);
            handled += 1;
        }
        handled
    }

    fn perform(&self, request: Request) -> Result<Response> {
        if self.fd() < 0 {
            return Err(CryptoError::NotOpen);
        }
        match request {
            Request::GetSession { cipher, key } => {
                let ses = self.device.create_session(cipher, &key)?;
                self.backend.lock().sessions.push(ses);
                Ok(Response::Session { ses })
            }
            Request::Crypt(op) => Ok(Response::Crypt {
                dst: self.device.crypt(op.ses, op.op, &op.iv, &op.src)?,
            }),
            Request::FreeSession { ses } => {
                self.device.destroy_session(ses)?;
                self.backend.lock().sessions.retain(|&live| live != ses);
                Ok(Response::Freed { ses })
            }
        }
    }

    fn handle_request(&self, packet: Bytes) -> Option<ReplyPacket> {
        let header = match RequestHeader::peek(&packet) {
            Ok(header) => header,
            Err(err) => {
                warn!(%err, "dropping request without header");
                return None;
            }
        };
        let outcome = RequestPacket::decode(packet).and_then(|packet| self.perform(packet.request));
        Some(match outcome {
            Ok(response) => ReplyPacket::success(header.seq, response),
            Err(err) => {
                debug!(seq = header.seq, cmd = header.cmd, %err, "request failed");
                ReplyPacket::failure(header.seq, header.cmd, &err)
            }
        })
    }

    /// Drain the data output queue, answering each request on the input
    /// queue. Returns the number of requests handled.
    pub fn handle_output(&self) -> usize {
        let mut handled = 0;
        while let Some(packet) = self.transport.ovq.pop() {
            handled += 1;
            let Some(reply) = self.handle_request(packet) else {
                continue;
            };
            if self.transport.ivq.push(reply.encode()).is_ok() {
                self.transport.ivq.notify();
            }
        }
        handled
    }

    /// Serve both output queues from their notification callbacks, so a
    /// request is answered before the guest's `notify` returns.
    pub fn attach_inline(self: &Arc<Self>) {
        let host = Arc::downgrade(self);
        self.transport.c_ovq.set_callback(Arc::new(move |_: &Virtqueue| {
            if let Some(host) = host.upgrade() {
                host.handle_control();
            }
        }));
        let host = Arc::downgrade(self);
        self.transport.ovq.set_callback(Arc::new(move |_: &Virtqueue| {
            if let Some(host) = host.upgrade() {
                host.handle_output();
            }
        }));
    }

    /// Serve kicks on the output queues until `shutdown` is raised.
    pub async fn run(self: Arc<Self>, shutdown: Interrupt) -> HostStats {
        let mut stats = HostStats::default();
        info!("virtio-crypto host running");
        loop {
            stats.control += self.handle_control();
            stats.requests += self.handle_output();
            tokio::select! {
                biased;
                _ = shutdown.raised() => break,
                _ = self.transport.c_ovq.kicked() => {}
                _ = self.transport.ovq.kicked() => {}
            }
        }
        info!(control = stats.control, requests = stats.requests, "virtio-crypto host stopped");
        stats
    }
}
