//! Channel numbers and open parameters.
//!
//! The session only allocates local channel numbers and builds the
//! open messages. Window accounting and channel state belong to the
//! channel layer built on top.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::{LOCAL_CHANNEL_DATA_PACKET_SIZE, LOCAL_WINDOW_SIZE};
use crate::packets::{
    ChannelOpen, ChannelOpenConfirmation, ChannelOpenFailure, ChannelOpenType, DirectTcpip,
    Packet,
};
use crate::sshnames::ChanFail;
use crate::sshwire::{Rest, TextString};

/// Local channel number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChanNum(pub u32);

impl fmt::Display for ChanNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Hands out increasing channel numbers
pub(crate) struct ChanNumbers {
    next: AtomicU32,
}

impl ChanNumbers {
    pub fn new() -> Self {
        ChanNumbers { next: AtomicU32::new(0) }
    }

    pub fn next(&self) -> ChanNum {
        ChanNum(self.next.fetch_add(1, Ordering::Relaxed))
    }

    pub fn reset(&self) {
        self.next.store(0, Ordering::Relaxed)
    }
}

/// The peer's side of a channel it opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteChannel {
    pub num: u32,
    pub window: u32,
    pub max_packet: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanKind {
    Session,
    DirectTcpip,
    /// Opened by the server for a remote forward
    ForwardedTcpip(RemoteChannel),
}

/// A newly allocated channel with our initial window and packet size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInit {
    pub num: ChanNum,
    pub initial_window: u32,
    pub max_packet: u32,
    pub kind: ChanKind,
}

impl ChannelInit {
    pub(crate) fn new(num: ChanNum, kind: ChanKind) -> Self {
        ChannelInit {
            num,
            initial_window: LOCAL_WINDOW_SIZE,
            max_packet: LOCAL_CHANNEL_DATA_PACKET_SIZE,
            kind,
        }
    }

    /// `SSH_MSG_CHANNEL_OPEN` for a session channel
    pub fn session_open(&self) -> Result<Packet<'static>> {
        if self.kind != ChanKind::Session {
            return Err(Error::msg("not a session channel"));
        }
        Ok(self.open(ChannelOpenType::Session))
    }

    /// `SSH_MSG_CHANNEL_OPEN` for a direct-tcpip channel to `host:port`
    pub fn direct_tcpip_open<'a>(
        &self,
        host: &'a str,
        port: u16,
        origin: &'a str,
        origin_port: u16,
    ) -> Result<Packet<'a>> {
        if self.kind != ChanKind::DirectTcpip {
            return Err(Error::msg("not a direct-tcpip channel"));
        }
        Ok(self.open(ChannelOpenType::DirectTcpip(DirectTcpip {
            address: TextString::from(host),
            port: port as u32,
            origin: TextString::from(origin),
            origin_port: origin_port as u32,
        })))
    }

    fn open<'a>(&self, ty: ChannelOpenType<'a>) -> Packet<'a> {
        ChannelOpen {
            num: self.num.0,
            initial_window: self.initial_window,
            max_packet: self.max_packet,
            ty,
        }
        .into()
    }

    /// Accepts a forwarded-tcpip channel the server opened
    pub fn forwarded_confirm(&self) -> Result<Packet<'static>> {
        let ChanKind::ForwardedTcpip(remote) = self.kind else {
            return Err(Error::msg("not a forwarded-tcpip channel"));
        };
        Ok(ChannelOpenConfirmation {
            num: remote.num,
            sender_num: self.num.0,
            initial_window: self.initial_window,
            max_packet: self.max_packet,
            data: Rest(&[]),
        }
        .into())
    }

    /// Refuses a forwarded-tcpip channel the server opened
    pub fn forwarded_reject(&self, reason: ChanFail) -> Result<Packet<'static>> {
        let ChanKind::ForwardedTcpip(remote) = self.kind else {
            return Err(Error::msg("not a forwarded-tcpip channel"));
        };
        Ok(ChannelOpenFailure {
            num: remote.num,
            reason: reason as u32,
            desc: "".into(),
            lang: "".into(),
        }
        .into())
    }
}
