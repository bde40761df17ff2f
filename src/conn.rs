//! Represents the state of a SSH connection.
//!
//! [`Conn`] handles the transport layer messages itself. Everything else
//! passes through to consumers once the registry accepts it.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use crate::auth::AuthReply;
use crate::config::ConnectionInfo;
use crate::ident::ServerVersion;
use crate::kex::{Kex, NegotiatedAlgorithms, SessId};
use crate::packets::{ChannelOpenFailure, Packet, RequestFailure};
use crate::registry::{MessageRegistry, Phase};
use crate::sign::HostKeyInfo;
use crate::sshnames::*;
use crate::traffic::{InKeys, Outbound};

/// Lifecycle of a [`Session`](crate::Session)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// TCP connection in progress
    Connecting,
    /// Identification lines have been exchanged
    VersionExchanged,
    /// First key exchange in progress
    KeyExchanging,
    Authenticating,
    Connected,
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Effects of a dispatched packet, applied by the receive loop
// must_use so return values can't be forgotten in Conn::dispatch
#[must_use]
#[derive(Default)]
pub(crate) struct Dispatched {
    /// The peer started a key exchange
    pub kex_started: bool,
    /// Keys to decrypt the next packet with
    pub new_keys: Option<InKeys>,
    pub kex_done: bool,
    pub host_key: Option<HostKeyInfo>,
    pub service_accepted: bool,
    /// A reply to a userauth request arrived
    pub auth_reply: bool,
    pub authenticated: bool,
}

pub(crate) struct Conn {
    pub state: SessionState,

    // State of any current Key Exchange
    pub kex: Kex,

    pub registry: MessageRegistry,

    /// Set by the first key exchange
    pub sess_id: Option<SessId>,

    /// Our identification line without CR LF
    pub client_version: String,
    pub server_version: Option<ServerVersion>,

    pub algos: Option<NegotiatedAlgorithms>,
    pub host_key: Option<HostKeyInfo>,

    pub authenticated: bool,
    /// Latest userauth answer, taken by the authenticator
    pub auth_reply: Option<AuthReply>,
}

impl Conn {
    pub fn new(info: &ConnectionInfo) -> Self {
        Conn {
            state: SessionState::Disconnected,
            kex: Kex::new(),
            registry: MessageRegistry::new(info.early_global_request),
            sess_id: None,
            client_version: info.client_version(),
            server_version: None,
            algos: None,
            host_key: None,
            authenticated: false,
            auth_reply: None,
        }
    }

    /// Clears everything for a new connection attempt. Consumer
    /// subscriptions are kept.
    pub fn reset(&mut self, info: &ConnectionInfo) {
        let mut registry = core::mem::replace(&mut self.registry, MessageRegistry::new(false));
        registry.reset();
        *self = Conn { registry, ..Conn::new(info) };
    }

    /// Sends our KEXINIT unless a key exchange is already running.
    /// Returns `true` if a new exchange was started.
    pub fn start_kex(&mut self, info: &ConnectionInfo, out: &Outbound) -> Result<bool> {
        if !self.kex.is_idle() {
            return Ok(false);
        }
        debug!("Starting key exchange");
        self.kex.send_kexinit(info, out)?;
        Ok(true)
    }

    /// Handles a received packet. `payload` is its raw form.
    ///
    /// `consumer` is whether a consumer has subscribed to the message,
    /// some requests get a default reply otherwise.
    pub fn dispatch(
        &mut self,
        p: &Packet,
        payload: &[u8],
        info: &ConnectionInfo,
        out: &Outbound,
        consumer: bool,
    ) -> Result<Dispatched> {
        let mut disp = Dispatched::default();
        match p {
            Packet::KexInit(k) => {
                disp.kex_started = self.kex.is_idle();
                self.registry.freeze_for_kex();
                let Conn { kex, client_version, server_version, .. } = self;
                let sv = server_version.as_ref().ok_or(Error::PacketWrong)?;
                kex.handle_kexinit(k, payload, info, (client_version, &sv.line), out)?;
            }
            Packet::KexDHReply(_) if self.kex.maybe_discard_packet() => {
                debug!("Discarded guessed kex packet");
            }
            Packet::KexDHReply(r) => {
                let hk = self.kex.handle_kexdhreply(r, self.sess_id.as_ref(), info, out)?;
                debug!("Server host key {}", hk.fingerprint());
                self.host_key = Some(hk.clone());
                disp.host_key = Some(hk);
            }
            Packet::NewKeys(_) => {
                let (keys, algos) = self.kex.handle_newkeys(&mut self.sess_id)?;
                self.registry.unfreeze();
                self.algos = Some(algos);
                disp.new_keys = Some(keys);
                disp.kex_done = true;
            }
            Packet::KexDHInit(_) | Packet::ServiceRequest(_) | Packet::UserauthRequest(_) => {
                // client-to-server only
                debug!("Unexpected {}", p.message_num());
                return Err(Error::PacketWrong);
            }
            Packet::ServiceAccept(s) => {
                if s.name != SSH_SERVICE_USERAUTH {
                    debug!("Unexpected service {:?}", s.name);
                    return Err(Error::PacketWrong);
                }
                self.registry.set_phase(Phase::Authenticating);
                disp.service_accepted = true;
            }
            Packet::UserauthSuccess(_) => {
                if !self.authenticated {
                    info!("Authentication succeeded");
                    self.authenticated = true;
                    self.registry.set_phase(Phase::Connected);
                    disp.authenticated = true;
                }
                self.auth_reply = Some(AuthReply::Success);
                disp.auth_reply = true;
            }
            Packet::UserauthFailure(f) => {
                self.auth_reply = Some(AuthReply::failure(f));
                disp.auth_reply = true;
            }
            Packet::UserauthBanner(b) => {
                if let Ok(m) = b.message.as_str() {
                    info!("Banner: {m}");
                }
            }
            Packet::Disconnect(d) => {
                let desc = d.desc.as_str().unwrap_or("(bad utf8)").to_string();
                info!("Received disconnect: {desc:?} reason {}", d.reason);
                return Err(Error::PeerDisconnect { reason: d.reason, desc });
            }
            Packet::Ignore(_) => {
                trace!("Ignore");
            }
            Packet::DebugPacket(d) => {
                if let Ok(m) = d.message.as_str() {
                    if d.always_display {
                        info!("Peer debug: {m}");
                    } else {
                        debug!("Peer debug: {m}");
                    }
                }
            }
            Packet::Unimplemented(u) => {
                warn!("Received SSH_MSG_UNIMPLEMENTED for our packet {}", u.seq);
            }
            Packet::GlobalRequest(g) if g.want_reply && !consumer => {
                debug!("Refusing global request {:?}", g.name);
                out.reply(&RequestFailure {}.into())?;
            }
            Packet::ChannelOpen(c) if !consumer => {
                debug!("Refusing {} channel {}", c.ty.name(), c.num);
                out.reply(
                    &ChannelOpenFailure {
                        num: c.num,
                        reason: ChanFail::SSH_OPEN_ADMINISTRATIVELY_PROHIBITED as u32,
                        desc: "".into(),
                        lang: "".into(),
                    }
                    .into(),
                )?;
            }
            _ => {
                // consumer messages
            }
        }
        Ok(disp)
    }
}
