//! Binary packet protocol, [RFC4253](https://tools.ietf.org/html/rfc4253) section 6.
//!
//! [`TrafOut`] frames outbound payloads, [`TrafIn`] reads and validates
//! inbound packets. [`Outbound`] serialises senders and holds back
//! non-kex traffic while a key exchange is in progress.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::io::{self, Read, Write};
use std::num::Wrapping;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use pretty_hex::PrettyHex;
use subtle::ConstantTimeEq;

use crate::compress::{compress_bound, CompressAlgo, Compressor, Decompressor};
use crate::config::MAXIMUM_PACKET_SIZE;
use crate::encrypt::*;
use crate::packets::{NewKeys, Packet};
use crate::random;
use crate::sshwire;

// hmac-sha2-512
const MAX_MAC_LEN: usize = 64;

/// Cipher and MAC for one direction
pub(crate) struct DirKeys {
    cipher: Option<Box<dyn PacketCipher>>,
    block_len: usize,
    mac: Option<Box<dyn PacketMac>>,
    mac_len: usize,
}

impl DirKeys {
    /// Before the first key exchange
    pub fn cleartext() -> Self {
        DirKeys { cipher: None, block_len: SSH_MIN_BLOCK, mac: None, mac_len: 0 }
    }

    pub fn new(
        cipher: &CipherAlgo,
        key: &[u8],
        iv: &[u8],
        mac: &MacAlgo,
        mac_key: &[u8],
    ) -> Result<Self> {
        debug_assert!(mac.mac_len <= MAX_MAC_LEN);
        Ok(DirKeys {
            cipher: Some((cipher.make)(key, iv)?),
            block_len: cipher.block_len.max(SSH_MIN_BLOCK),
            mac: Some((mac.make)(mac_key)?),
            mac_len: mac.mac_len,
        })
    }

    fn is_cleartext(&self) -> bool {
        self.cipher.is_none()
    }
}

/// Compression state for one direction.
///
/// A fresh stream is started with each new set of keys. Delayed methods
/// start once authentication has succeeded.
struct CompState<T: ?Sized> {
    algo: Option<&'static CompressAlgo>,
    active: Option<Box<T>>,
}

impl<T: ?Sized> CompState<T> {
    fn none() -> Self {
        CompState { algo: None, active: None }
    }

    fn new(algo: &'static CompressAlgo) -> Self {
        CompState { algo: Some(algo), active: None }
    }

    fn activate(&mut self, authenticated: bool, make: impl FnOnce(&CompressAlgo) -> Option<Box<T>>) {
        if self.active.is_some() {
            return;
        }
        if let Some(algo) = self.algo {
            if !algo.delayed || authenticated {
                self.active = make(algo);
                if self.active.is_some() {
                    debug!("{} compression active", algo.name);
                }
            }
        }
    }
}

pub(crate) struct OutKeys {
    dir: DirKeys,
    comp: CompState<dyn Compressor>,
}

impl OutKeys {
    pub fn cleartext() -> Self {
        OutKeys { dir: DirKeys::cleartext(), comp: CompState::none() }
    }

    pub fn new(dir: DirKeys, comp: &'static CompressAlgo) -> Self {
        OutKeys { dir, comp: CompState::new(comp) }
    }

    fn activate(&mut self, authenticated: bool) {
        self.comp.activate(authenticated, |a| a.make.as_ref().map(|m| (m.compressor)()))
    }
}

pub(crate) struct InKeys {
    dir: DirKeys,
    comp: CompState<dyn Decompressor>,
}

impl InKeys {
    pub fn cleartext() -> Self {
        InKeys { dir: DirKeys::cleartext(), comp: CompState::none() }
    }

    pub fn new(dir: DirKeys, comp: &'static CompressAlgo) -> Self {
        InKeys { dir, comp: CompState::new(comp) }
    }

    fn activate(&mut self, authenticated: bool) {
        self.comp.activate(authenticated, |a| a.make.as_ref().map(|m| (m.decompressor)()))
    }
}

/// Outbound packet framing
pub(crate) struct TrafOut {
    keys: OutKeys,
    seq: Wrapping<u32>,
    authenticated: bool,
    zbuf: Vec<u8>,
    /// Sent under the current keys
    bytes: u64,
    packets: u32,
}

impl TrafOut {
    pub fn new() -> Self {
        TrafOut {
            keys: OutKeys::cleartext(),
            seq: Wrapping(0),
            authenticated: false,
            zbuf: Vec::new(),
            bytes: 0,
            packets: 0,
        }
    }

    /// Next outbound sequence number
    pub fn seq(&self) -> u32 {
        self.seq.0
    }

    /// Fails with [`Error::BigPacket`] if `payload` may not fit in one packet.
    ///
    /// With compression active this allows for the largest compressed size.
    pub fn check_size(&self, payload: &[u8]) -> Result<()> {
        let len = match self.keys.comp.active {
            Some(_) => compress_bound(payload.len()),
            None => payload.len(),
        };
        let size = SSH_LENGTH_SIZE + 1 + len + calc_encrypt_pad(self.keys.dir.block_len, len);
        if size > MAXIMUM_PACKET_SIZE {
            return Err(Error::BigPacket { size });
        }
        Ok(())
    }

    /// Frames `payload` into `buf` as a complete wire packet, replacing its
    /// contents. The sequence number doesn't advance until [`sent()`](Self::sent).
    ///
    /// A payload failing [`check_size()`](Self::check_size) leaves the
    /// compression stream untouched. Any other failure leaves it unusable.
    pub fn encode(&mut self, payload: &[u8], buf: &mut Vec<u8>) -> Result<()> {
        self.check_size(payload)?;
        let TrafOut { keys, seq, zbuf, .. } = self;

        let payload = match keys.comp.active.as_mut() {
            Some(c) => {
                c.compress(payload, zbuf)?;
                &zbuf[..]
            }
            None => payload,
        };

        let block_len = keys.dir.block_len;
        let padlen = calc_encrypt_pad(block_len, payload.len());
        // packet_length excludes itself and the mac
        let len = 1 + payload.len() + padlen;
        if SSH_LENGTH_SIZE + len > MAXIMUM_PACKET_SIZE {
            return Err(Error::BigPacket { size: SSH_LENGTH_SIZE + len });
        }

        buf.clear();
        buf.reserve(SSH_LENGTH_SIZE + len + keys.dir.mac_len);
        buf.extend_from_slice(&(len as u32).to_be_bytes());
        buf.push(padlen as u8);
        buf.extend_from_slice(payload);
        let pad_start = buf.len();
        buf.resize(pad_start + padlen, 0);
        random::fill_random(&mut buf[pad_start..])?;

        let end = buf.len();
        if let Some(mac) = keys.dir.mac.as_ref() {
            buf.resize(end + keys.dir.mac_len, 0);
            let (data, m) = buf.split_at_mut(end);
            mac.compute(seq.0, data, m);
        }
        if let Some(c) = keys.dir.cipher.as_mut() {
            c.encrypt(&mut buf[..end]);
        }
        Ok(())
    }

    /// Records a packet of `len` bytes as written
    pub fn sent(&mut self, len: usize) {
        self.seq += 1;
        self.bytes += len as u64;
        self.packets = self.packets.saturating_add(1);
    }

    /// Takes new keys into use for the next packet
    pub fn rekey(&mut self, keys: OutKeys) {
        self.keys = keys;
        self.keys.activate(self.authenticated);
        self.bytes = 0;
        self.packets = 0;
    }

    pub fn set_authenticated(&mut self) {
        self.authenticated = true;
        self.keys.activate(true);
    }

    /// Whether the current keys have carried enough traffic to warrant a rekey
    pub fn rekey_due(&self, bytes: u64, packets: u32) -> bool {
        !self.keys.dir.is_cleartext() && (self.bytes >= bytes || self.packets >= packets)
    }
}

/// Inbound packet decoding
pub(crate) struct TrafIn {
    keys: InKeys,
    seq: Wrapping<u32>,
    authenticated: bool,
    buf: Vec<u8>,
    zbuf: Vec<u8>,
}

impl TrafIn {
    pub fn new() -> Self {
        TrafIn {
            keys: InKeys::cleartext(),
            seq: Wrapping(0),
            authenticated: false,
            buf: Vec::new(),
            zbuf: Vec::new(),
        }
    }

    /// Sequence number of the next inbound packet
    pub fn seq(&self) -> u32 {
        self.seq.0
    }

    pub fn rekey(&mut self, keys: InKeys) {
        self.keys = keys;
        self.keys.activate(self.authenticated);
    }

    pub fn set_authenticated(&mut self) {
        self.authenticated = true;
        self.keys.activate(true);
    }

    /// Reads one packet from `r`, returning its payload.
    ///
    /// Returns `Ok(None)` if the stream ends cleanly before a packet starts.
    pub fn read_packet<R: Read>(&mut self, r: &mut R) -> Result<Option<&[u8]>> {
        let TrafIn { keys, seq, buf, zbuf, .. } = self;
        let block_len = keys.dir.block_len;
        let mac_len = keys.dir.mac_len;

        buf.clear();
        buf.resize(block_len, 0);
        if !read_first(r, &mut buf[..])? {
            return Ok(None);
        }

        // The length is encrypted, decrypt the first block to learn it
        if let Some(c) = keys.dir.cipher.as_mut() {
            c.decrypt(&mut buf[..block_len]);
        }
        let mut l = [0u8; SSH_LENGTH_SIZE];
        l.copy_from_slice(&buf[..SSH_LENGTH_SIZE]);
        let len = u32::from_be_bytes(l);

        let total = len as usize + SSH_LENGTH_SIZE;
        if total < SSH_MIN_PACKET_SIZE.max(block_len)
            || total > MAXIMUM_PACKET_SIZE
            || total % block_len != 0
        {
            debug!("Bad packet length {len}");
            return Err(Error::BadPacketLength { len });
        }

        buf.resize(total + mac_len, 0);
        r.read_exact(&mut buf[block_len..])?;

        let (data, mac) = buf.split_at_mut(total);
        if let Some(c) = keys.dir.cipher.as_mut() {
            c.decrypt(&mut data[block_len..]);
        }

        if let Some(m) = keys.dir.mac.as_ref() {
            let mut expect = [0u8; MAX_MAC_LEN];
            let expect = &mut expect[..mac_len];
            m.compute(seq.0, data, expect);
            if !bool::from(expect.ct_eq(mac)) {
                info!("Packet integrity failed");
                return Err(Error::BadDecrypt);
            }
        }

        let padlen = data[SSH_LENGTH_SIZE] as usize;
        if padlen < SSH_MIN_PADLEN {
            debug!("Packet padding too short");
            return Err(Error::SSHProtoError);
        }
        let payload_end = total.checked_sub(padlen).ok_or(Error::SSHProtoError)?;
        if payload_end <= SSH_PAYLOAD_START {
            debug!("Bad padding length");
            return Err(Error::SSHProtoError);
        }

        *seq += 1;

        let payload = &data[SSH_PAYLOAD_START..payload_end];
        let payload = match keys.comp.active.as_mut() {
            Some(d) => {
                d.decompress(payload, zbuf)?;
                &zbuf[..]
            }
            None => payload,
        };
        trace!("received payload {:?}", payload.hex_dump());
        Ok(Some(payload))
    }
}

/// Fills `buf`, returning `false` on EOF before any byte arrives.
fn read_first<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut pos = 0;
    while pos < buf.len() {
        match r.read(&mut buf[pos..]) {
            Ok(0) if pos == 0 => return Ok(false),
            Ok(0) => return Err(Error::ConnectionLost { msg: "truncated packet" }),
            Ok(n) => pos += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

struct SendState {
    traf: TrafOut,
    writer: Option<Box<dyn Write + Send>>,
    buf: Vec<u8>,
    /// A key exchange is under way, only kex messages may be sent
    kex_active: bool,
    /// Encoded payloads from the receive loop, held until the exchange completes
    pending: Vec<Vec<u8>>,
    closed: bool,
}

impl SendState {
    /// Encodes and writes a payload.
    ///
    /// Apart from an oversized payload, a failure part way through leaves
    /// the cipher and compression streams out of step with the peer, so
    /// the connection is closed for sending.
    fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        self.traf.check_size(payload)?;
        let r = self.encode_write(payload);
        if r.is_err() {
            self.closed = true;
            self.kex_active = false;
            self.pending.clear();
            self.writer = None;
        }
        r
    }

    fn encode_write(&mut self, payload: &[u8]) -> Result<()> {
        let SendState { traf, writer, buf, .. } = self;
        let w = writer.as_mut().ok_or(Error::NotConnected)?;
        traf.encode(payload, buf)?;
        w.write_all(buf)?;
        w.flush()?;
        traf.sent(buf.len());
        Ok(())
    }
}

/// Outbound side of a connection, shared by all sending threads.
///
/// Encoding, the sequence number increment and the socket write all
/// happen under one lock, so packets never interleave.
pub(crate) struct Outbound {
    state: Mutex<SendState>,
    kex_done: Condvar,
    rekey_bytes: u64,
    rekey_packets: u32,
}

impl Outbound {
    pub fn new(rekey_bytes: u64, rekey_packets: u32) -> Self {
        Outbound {
            state: Mutex::new(SendState {
                traf: TrafOut::new(),
                writer: None,
                buf: Vec::new(),
                kex_active: false,
                pending: Vec::new(),
                closed: true,
            }),
            kex_done: Condvar::new(),
            rekey_bytes,
            rekey_packets,
        }
    }

    /// Starts sending on a new connection with cleartext keys
    pub fn open(&self, writer: Box<dyn Write + Send>) {
        let mut st = self.state.lock();
        st.traf = TrafOut::new();
        st.writer = Some(writer);
        st.kex_active = false;
        st.pending.clear();
        st.closed = false;
    }

    /// Sends a message, waiting up to `timeout` for any key exchange
    /// to complete first.
    ///
    /// Returns `true` when the current keys are due to be replaced.
    pub fn send(&self, p: &Packet, timeout: Duration) -> Result<bool> {
        let payload = sshwire::to_vec(p)?;
        let mut st = self.state.lock();
        if !p.category().kex_allowed() {
            let deadline = Instant::now() + timeout;
            while st.kex_active && !st.closed {
                trace!("{} waiting for kex", p.message_num());
                if self.kex_done.wait_until(&mut st, deadline).timed_out() && st.kex_active {
                    return Err(Error::Timeout);
                }
            }
        }
        trace!("send {p:?}");
        self.write(&mut st, &payload)?;
        Ok(!st.kex_active && st.traf.rekey_due(self.rekey_bytes, self.rekey_packets))
    }

    /// Sends from the receive loop, which can't wait for a key exchange
    /// it is itself running. Non-kex messages are queued until it completes.
    pub fn reply(&self, p: &Packet) -> Result<()> {
        let payload = sshwire::to_vec(p)?;
        let mut st = self.state.lock();
        if st.kex_active && !p.category().kex_allowed() {
            trace!("{} queued until kex completes", p.message_num());
            st.pending.push(payload);
            return Ok(());
        }
        trace!("send {p:?}");
        self.write(&mut st, &payload)
    }

    /// Like [`reply()`](Self::reply) but gives up if the send lock isn't
    /// free within `wait`, for instance while another sender is blocked
    /// on a stalled socket. Returns whether the message was sent.
    pub fn try_reply(&self, p: &Packet, wait: Duration) -> Result<bool> {
        let payload = sshwire::to_vec(p)?;
        let Some(mut st) = self.state.try_lock_for(wait) else {
            return Ok(false);
        };
        if st.closed {
            return Ok(false);
        }
        trace!("send {p:?}");
        self.write(&mut st, &payload)?;
        Ok(true)
    }

    /// Sends an already encoded kex payload, not subject to the kex wait.
    pub fn send_payload(&self, payload: &[u8]) -> Result<()> {
        let mut st = self.state.lock();
        self.write(&mut st, payload)
    }

    fn write(&self, st: &mut SendState, payload: &[u8]) -> Result<()> {
        let r = st.write_payload(payload);
        if r.is_err() && st.closed {
            // release senders waiting for a key exchange
            self.kex_done.notify_all();
        }
        r
    }

    /// Sends `SSH_MSG_NEWKEYS` then switches to `keys`, with no other
    /// packet able to be sent in between.
    pub fn send_newkeys(&self, keys: OutKeys) -> Result<()> {
        let payload = sshwire::to_vec(&Packet::from(NewKeys {}))?;
        let mut st = self.state.lock();
        self.write(&mut st, &payload)?;
        st.traf.rekey(keys);
        Ok(())
    }

    /// Holds back non-kex messages until [`end_kex`](Self::end_kex)
    pub fn begin_kex(&self) {
        self.state.lock().kex_active = true;
    }

    /// Sends anything queued by [`reply()`](Self::reply) then releases
    /// waiting senders.
    pub fn end_kex(&self) -> Result<()> {
        let mut st = self.state.lock();
        st.kex_active = false;
        let pending = core::mem::take(&mut st.pending);
        let r = pending.iter().try_for_each(|p| st.write_payload(p));
        drop(st);
        self.kex_done.notify_all();
        r
    }

    /// Fails further sends and releases any waiting for kex
    pub fn close(&self) {
        let mut st = self.state.lock();
        st.closed = true;
        st.kex_active = false;
        st.pending.clear();
        if let Some(mut w) = st.writer.take() {
            let _ = w.flush();
        }
        drop(st);
        self.kex_done.notify_all();
    }

    pub fn set_authenticated(&self) {
        self.state.lock().traf.set_authenticated();
    }

    /// Next outbound sequence number
    pub fn seq(&self) -> u32 {
        self.state.lock().traf.seq()
    }
}
