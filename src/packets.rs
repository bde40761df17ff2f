//! SSH protocol packets.
//!
//! A [`Packet`] can be encoded/decoded to the
//! SSH Binary Packet Protocol using [`sshwire`](crate::sshwire).
//! SSH packet format is described in [RFC4253](https://tools.ietf.org/html/rfc4253) SSH Transport

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use pretty_hex::PrettyHex;
use sunset_sshwire_derive::*;

use crate::namelist::NameList;
use crate::sshnames::*;
use crate::sshwire::{self, BinString, Rest, TextString};
use crate::sshwire::{SSHDecode, SSHEncode, SSHSink, SSHSource, WireError, WireResult};
use crate::sshwire::{SSHDecodeEnum, SSHEncodeEnum};

// Each message is a plain struct, the wire layout follows field order.
// Enum variant names on the wire are handled with `#[sshwire(...)]` attributes.

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct KexInit<'a> {
    pub cookie: [u8; 16],
    pub kex: NameList<'a>,
    /// Host key algorithms
    pub hostkey: NameList<'a>,
    pub cipher_c2s: NameList<'a>,
    pub cipher_s2c: NameList<'a>,
    pub mac_c2s: NameList<'a>,
    pub mac_s2c: NameList<'a>,
    pub comp_c2s: NameList<'a>,
    pub comp_s2c: NameList<'a>,
    pub lang_c2s: NameList<'a>,
    pub lang_s2c: NameList<'a>,
    pub first_follows: bool,
    pub reserved: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct NewKeys {}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Ignore<'a> {
    pub data: BinString<'a>,
}

/// Named to avoid clashing with [`fmt::Debug`]
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct DebugPacket<'a> {
    pub always_display: bool,
    pub message: TextString<'a>,
    pub lang: TextString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Disconnect<'a> {
    pub reason: u32,
    pub desc: TextString<'a>,
    pub lang: TextString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Unimplemented {
    pub seq: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ServiceRequest<'a> {
    pub name: &'a str,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ServiceAccept<'a> {
    pub name: &'a str,
}

/// `SSH_MSG_KEX_ECDH_INIT`, also used for plain DH style exchanges
/// since the layout is the same.
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct KexDHInit<'a> {
    pub q_c: BinString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct KexDHReply<'a> {
    /// Host key blob
    pub k_s: BinString<'a>,
    pub q_s: BinString<'a>,
    /// Signature blob over the exchange hash
    pub sig: BinString<'a>,
}

/// The method specific part is carried in `rest`, it is
/// encoded by the authentication method.
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct UserauthRequest<'a> {
    pub username: TextString<'a>,
    pub service: &'a str,
    pub method: &'a str,
    pub rest: Rest<'a>,
}

/// Trailer of a `password` [`UserauthRequest`]
#[derive(SSHEncode, SSHDecode)]
pub struct MethodPassword<'a> {
    pub change: bool,
    pub password: TextString<'a>,
}

// Don't print password
impl fmt::Debug for MethodPassword<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodPassword").field("change", &self.change).finish_non_exhaustive()
    }
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct UserauthFailure<'a> {
    pub methods: NameList<'a>,
    pub partial: bool,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct UserauthSuccess {}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct UserauthBanner<'a> {
    pub message: TextString<'a>,
    pub lang: TextString<'a>,
}

/// Message 60 depends on the authentication method in progress,
/// interpretation is left to the authenticator.
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct Userauth60<'a> {
    pub data: Rest<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct GlobalRequest<'a> {
    pub name: &'a str,
    pub want_reply: bool,
    pub data: Rest<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct RequestSuccess<'a> {
    pub data: Rest<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct RequestFailure {}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelOpen<'a> {
    // channel_type is implicit in ty below
    #[sshwire(variant_name = ty)]
    pub num: u32,
    pub initial_window: u32,
    pub max_packet: u32,
    pub ty: ChannelOpenType<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub enum ChannelOpenType<'a> {
    #[sshwire(variant = SSH_CHANNEL_SESSION)]
    Session,
    #[sshwire(variant = SSH_CHANNEL_FORWARDED_TCPIP)]
    ForwardedTcpip(ForwardedTcpip<'a>),
    #[sshwire(variant = SSH_CHANNEL_DIRECT_TCPIP)]
    DirectTcpip(DirectTcpip<'a>),
    // The remainder of an unknown open is left unparsed
    #[sshwire(unknown)]
    Unknown(Unknown<'a>),
}

impl ChannelOpenType<'_> {
    /// The channel type name, for logging
    pub fn name(&self) -> &str {
        match self {
            Self::Unknown(u) => sshwire::try_as_ascii_str(u.0).unwrap_or("(non-ascii)"),
            // only Unknown lacks a name
            k => k.variant_name().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, SSHEncode, SSHDecode)]
pub struct DirectTcpip<'a> {
    pub address: TextString<'a>,
    pub port: u32,
    pub origin: TextString<'a>,
    pub origin_port: u32,
}

#[derive(Debug, Clone, SSHEncode, SSHDecode)]
pub struct ForwardedTcpip<'a> {
    pub address: TextString<'a>,
    pub port: u32,
    pub origin: TextString<'a>,
    pub origin_port: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelOpenConfirmation<'a> {
    pub num: u32,
    pub sender_num: u32,
    pub initial_window: u32,
    pub max_packet: u32,
    pub data: Rest<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelOpenFailure<'a> {
    pub num: u32,
    pub reason: u32,
    pub desc: TextString<'a>,
    pub lang: TextString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelWindowAdjust {
    pub num: u32,
    pub adjust: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelData<'a> {
    pub num: u32,
    pub data: BinString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelDataExt<'a> {
    pub num: u32,
    pub code: u32,
    pub data: BinString<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelEof {
    pub num: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelClose {
    pub num: u32,
}

/// Request specific data is left in `data`
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelRequest<'a> {
    pub num: u32,
    pub req: &'a str,
    pub want_reply: bool,
    pub data: Rest<'a>,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelSuccess {
    pub num: u32,
}

#[derive(Debug, SSHEncode, SSHDecode)]
pub struct ChannelFailure {
    pub num: u32,
}

/// An unknown variant name, recorded when decoding.
///
/// Can't be encoded.
#[derive(Clone, PartialEq)]
pub struct Unknown<'a>(pub &'a [u8]);

impl fmt::Display for Unknown<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(s) = sshwire::try_as_ascii_str(self.0) {
            f.write_str(s)
        } else {
            write!(f, "non-ascii {:?}", self.0.hex_dump())
        }
    }
}

impl fmt::Debug for Unknown<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// State passed through decoding
#[derive(Default, Clone, Debug)]
pub struct ParseContext {
    // Set to true if an unknown variant is encountered.
    // Packet length checks should be omitted in that case.
    pub(crate) seen_unknown: bool,
}

/// Which part of the protocol a message belongs to.
///
/// Used to decide when a message may be sent or received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Transport generic, allowed at any time including during key exchange.
    Transport,
    /// Service request and accept
    Service,
    /// Key exchange, including during a later re-exchange
    Kex,
    /// User authentication
    Auth,
    /// Connection protocol, after authentication
    Conn,
}

impl Category {
    /// Whether a message may be sent while a key exchange is in progress
    pub fn kex_allowed(&self) -> bool {
        matches!(self, Category::Transport | Category::Kex)
    }
}

// we have repeated `match` statements for the various packet types, use a macro
macro_rules! messagetypes {
    (
        $( ( $message_num:literal,
            $SpecificPacketVariant:ident,
            $SpecificPacketType:ty,
            $SSH_MESSAGE_NAME:ident,
            $category:ident
            ),
             )*
    ) => {

/// Message numbers known to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(non_camel_case_types)]
pub enum MessageNumber {
    // variants are eg
    // SSH_MSG_KEXINIT = 20,
    $(
    $SSH_MESSAGE_NAME = $message_num,
    )*
}

impl TryFrom<u8> for MessageNumber {
    type Error = Error;
    fn try_from(v: u8) -> Result<Self> {
        match v {
            // eg
            // 20 = Ok(MessageNumber::SSH_MSG_KEXINIT)
            $(
            $message_num => Ok(MessageNumber::$SSH_MESSAGE_NAME),
            )*
            _ => {
                Err(Error::UnknownPacket { number: v })
            }
        }
    }
}

impl MessageNumber {
    pub fn category(&self) -> Category {
        match self {
            $(
            MessageNumber::$SSH_MESSAGE_NAME => Category::$category,
            )*
        }
    }

    /// The RFC name, eg `SSH_MSG_KEXINIT`
    pub fn name(&self) -> &'static str {
        match self {
            $(
            MessageNumber::$SSH_MESSAGE_NAME => stringify!($SSH_MESSAGE_NAME),
            )*
        }
    }

    /// Every message number in the catalog
    pub fn all() -> &'static [MessageNumber] {
        &[ $( MessageNumber::$SSH_MESSAGE_NAME, )* ]
    }
}

impl fmt::Display for MessageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), *self as u8)
    }
}

impl SSHEncode for Packet<'_> {
    fn enc<S>(&self, s: &mut S) -> WireResult<()>
    where S: SSHSink {
        let t = self.message_num() as u8;
        t.enc(s)?;
        match self {
            // eg
            // Packet::KexInit(p) => {
            // ...
            $(
            Packet::$SpecificPacketVariant(p) => {
                p.enc(s)?
            }
            )*
        };
        Ok(())
    }
}

impl<'de: 'a, 'a> SSHDecode<'de> for Packet<'a> {
    fn dec<S>(s: &mut S) -> WireResult<Self>
    where S: SSHSource<'de> {
        let msg_num = u8::dec(s)?;
        let ty = match MessageNumber::try_from(msg_num) {
            Ok(t) => t,
            Err(_) => return Err(WireError::UnknownPacket { number: msg_num })
        };

        // Decode based on the message number
        let p = match ty {
            // eg
            // MessageNumber::SSH_MSG_KEXINIT => Packet::KexInit(
            // ...
            $(
            MessageNumber::$SSH_MESSAGE_NAME => Packet::$SpecificPacketVariant(SSHDecode::dec(s)?),
            )*
        };
        Ok(p)
    }
}

/// Top level SSH packet enum
#[derive(Debug)]
pub enum Packet<'a> {
    // eg KexInit(KexInit<'a>),
    $(
    $SpecificPacketVariant($SpecificPacketType),
    )*
}

impl<'a> Packet<'a> {
    pub fn message_num(&self) -> MessageNumber {
        match self {
            // eg
            // Packet::KexInit() => {
            // ..
            $(
            Packet::$SpecificPacketVariant(_) => {
                MessageNumber::$SSH_MESSAGE_NAME
            }
            )*
        }
    }

    pub fn category(&self) -> Category {
        self.message_num().category()
    }
}

$(
impl<'a> From<$SpecificPacketType> for Packet<'a> {
    fn from(s: $SpecificPacketType) -> Packet<'a> {
        Packet::$SpecificPacketVariant(s)
    }
}
)*

} } // macro

messagetypes![
(1, Disconnect, Disconnect<'a>, SSH_MSG_DISCONNECT, Transport),
(2, Ignore, Ignore<'a>, SSH_MSG_IGNORE, Transport),
(3, Unimplemented, Unimplemented, SSH_MSG_UNIMPLEMENTED, Transport),
(4, DebugPacket, DebugPacket<'a>, SSH_MSG_DEBUG, Transport),
(5, ServiceRequest, ServiceRequest<'a>, SSH_MSG_SERVICE_REQUEST, Service),
(6, ServiceAccept, ServiceAccept<'a>, SSH_MSG_SERVICE_ACCEPT, Service),

(20, KexInit, KexInit<'a>, SSH_MSG_KEXINIT, Kex),
(21, NewKeys, NewKeys, SSH_MSG_NEWKEYS, Kex),
(30, KexDHInit, KexDHInit<'a>, SSH_MSG_KEX_ECDH_INIT, Kex),
(31, KexDHReply, KexDHReply<'a>, SSH_MSG_KEX_ECDH_REPLY, Kex),

(50, UserauthRequest, UserauthRequest<'a>, SSH_MSG_USERAUTH_REQUEST, Auth),
(51, UserauthFailure, UserauthFailure<'a>, SSH_MSG_USERAUTH_FAILURE, Auth),
(52, UserauthSuccess, UserauthSuccess, SSH_MSG_USERAUTH_SUCCESS, Auth),
(53, UserauthBanner, UserauthBanner<'a>, SSH_MSG_USERAUTH_BANNER, Auth),
// One of
// SSH_MSG_USERAUTH_PASSWD_CHANGEREQ
// SSH_MSG_USERAUTH_PK_OK
// SSH_MSG_USERAUTH_INFO_REQUEST
(60, Userauth60, Userauth60<'a>, SSH_MSG_USERAUTH_60, Auth),

(80, GlobalRequest, GlobalRequest<'a>, SSH_MSG_GLOBAL_REQUEST, Conn),
(81, RequestSuccess, RequestSuccess<'a>, SSH_MSG_REQUEST_SUCCESS, Conn),
(82, RequestFailure, RequestFailure, SSH_MSG_REQUEST_FAILURE, Conn),

(90, ChannelOpen, ChannelOpen<'a>, SSH_MSG_CHANNEL_OPEN, Conn),
(91, ChannelOpenConfirmation, ChannelOpenConfirmation<'a>, SSH_MSG_CHANNEL_OPEN_CONFIRMATION, Conn),
(92, ChannelOpenFailure, ChannelOpenFailure<'a>, SSH_MSG_CHANNEL_OPEN_FAILURE, Conn),
(93, ChannelWindowAdjust, ChannelWindowAdjust, SSH_MSG_CHANNEL_WINDOW_ADJUST, Conn),
(94, ChannelData, ChannelData<'a>, SSH_MSG_CHANNEL_DATA, Conn),
(95, ChannelDataExt, ChannelDataExt<'a>, SSH_MSG_CHANNEL_EXTENDED_DATA, Conn),
(96, ChannelEof, ChannelEof, SSH_MSG_CHANNEL_EOF, Conn),
(97, ChannelClose, ChannelClose, SSH_MSG_CHANNEL_CLOSE, Conn),
(98, ChannelRequest, ChannelRequest<'a>, SSH_MSG_CHANNEL_REQUEST, Conn),
(99, ChannelSuccess, ChannelSuccess, SSH_MSG_CHANNEL_SUCCESS, Conn),
(100, ChannelFailure, ChannelFailure, SSH_MSG_CHANNEL_FAILURE, Conn),
];
