//! Dusk is a threaded SSH client transport engine.
//!
//! It handles the binary packet protocol, key exchange and rekeying,
//! and hands decoded messages to consumers such as authentication and
//! channel layers. See [`Session`] to get started.

#![forbid(unsafe_code)]

// avoids headscratching
#![deny(unused_must_use)]

pub mod sshwire;
pub mod packets;
pub mod sshnames;
pub mod config;
// exported so that error variants can be matched by consumers
pub mod error;
// perhaps don't need this, users could just use getrandom?
pub mod random;

pub mod event;

mod auth;
mod channel;
mod compress;
mod conn;
mod dusklog;
mod encrypt;
mod ident;
mod kex;
mod namelist;
mod registry;
mod runner;
mod session;
mod sign;
mod signal;
mod traffic;

#[cfg(test)]
mod testserver;

// Application API
pub use sshwire::{BinString, TextString};

pub use auth::{AuthReply, Authenticator};
pub use channel::{ChanKind, ChanNum, ChannelInit, RemoteChannel};
pub use compress::CompressAlgo;
pub use config::ConnectionInfo;
pub use conn::SessionState;
pub use encrypt::{CipherAlgo, MacAlgo};
pub use error::{Error, Result};
pub use event::ObserverId;
pub use ident::ServerVersion;
pub use kex::{KexAlgo, NegotiatedAlgorithms};
pub use packets::{MessageNumber, Packet};
pub use registry::Phase;
pub use session::{Session, SessionHandle};
pub use sign::{HostKeyAlgo, HostKeyInfo};
pub use signal::{ConnectGate, GatePermit, Signal};
pub use sshnames::{ChanFail, DisconnectReason};

/// Algorithm implementations that can be selected in [`ConnectionInfo`]
pub mod algorithms {
    pub use crate::compress::{default_compression, NONE, ZLIB, ZLIB_OPENSSH};
    pub use crate::encrypt::{
        default_ciphers, default_macs, AES128_CTR, AES192_CTR, AES256_CTR, HMAC_SHA256,
        HMAC_SHA512,
    };
    pub use crate::kex::{default_kex, CURVE25519, CURVE25519_LIBSSH};
    pub use crate::sign::{default_host_keys, ED25519};
}
