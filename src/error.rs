use core::str::Utf8Error;
#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use core::fmt::Arguments;
use std::io;
use std::sync::Arc;

use snafu::prelude::*;

use crate::sshnames::DisconnectReason;

/// The Dusk error type.
///
/// Errors are `Clone` so that one stored connection failure can be handed
/// to every caller blocked in a wait.
#[non_exhaustive]
#[derive(Snafu, Debug, Clone)]
#[snafu(context(suffix(false)))]
#[snafu(visibility(pub))]
pub enum Error {
    /// Output buffer ran out of room
    NoRoom,

    /// Input buffer ran out
    RanOut,

    /// Not a UTF-8 string
    BadString,

    /// Not a valid SSH ASCII string
    BadName,

    /// Key exchange incorrect
    BadKex,

    /// Packet integrity failed
    BadDecrypt,

    /// Signature is incorrect
    BadSig,

    /// Bad key format
    BadKey,

    /// Compression or decompression failed
    BadCompression,

    /// Error in received SSH protocol. Will disconnect.
    SSHProtoError,

    /// Remote peer isn't SSH
    NotSSH,

    #[snafu(display("Server protocol version {version} is not supported"))]
    VersionNotSupported { version: String },

    #[snafu(display("Bad packet length {len}"))]
    BadPacketLength { len: u32 },

    /// SSH packet contents doesn't match length
    WrongPacketLength,

    #[snafu(display("Packet size {size} too large"))]
    BigPacket { size: usize },

    #[snafu(display("Unknown packet type {number}"))]
    UnknownPacket { number: u8 },

    /// Received packet at a disallowed time.
    PacketWrong,

    #[snafu(display("Message {number} is not allowed in the current state"))]
    MessageNotAllowed { number: u8 },

    #[snafu(display("No matching {algo} algorithm"))]
    AlgoNoMatch { algo: &'static str },

    /// An unknown SSH name is provided, for a key type, signature type,
    /// channel name etc.
    #[snafu(display("Unknown {kind} method"))]
    UnknownMethod { kind: &'static str },

    /// The host key was refused by the configured check
    HostKeyRejected,

    /// User authentication did not succeed
    AuthFailed,

    /// A bounded wait elapsed
    Timeout,

    /// The session is not connected
    NotConnected,

    /// Invalid connection configuration
    #[snafu(display("Bad configuration: {msg}"))]
    BadConfig { msg: &'static str },

    #[snafu(display("Connection lost: {msg}"))]
    ConnectionLost { msg: &'static str },

    /// The server sent `SSH_MSG_DISCONNECT`
    #[snafu(display("Server disconnected ({reason}): {desc}"))]
    PeerDisconnect { reason: u32, desc: String },

    #[snafu(display("{msg}"))]
    Custom { msg: &'static str },

    /// IO Error
    #[snafu(display("IO error: {source}"))]
    IoError { source: Arc<io::Error> },

    // This state should not be reached, previous logic should have prevented it.
    // Create this using [`Error::bug()`] or [`.trap()`](TrapBug::trap).
    /// Program bug
    Bug,
}

impl Error {
    pub fn msg(m: &'static str) -> Error {
        Error::Custom { msg: m }
    }

    /// The reason code sent in `SSH_MSG_DISCONNECT` when this error
    /// tears down a connection.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            Error::BadDecrypt => DisconnectReason::SSH_DISCONNECT_MAC_ERROR,
            Error::BadCompression => {
                DisconnectReason::SSH_DISCONNECT_COMPRESSION_ERROR
            }
            Error::VersionNotSupported { .. } => {
                DisconnectReason::SSH_DISCONNECT_PROTOCOL_VERSION_NOT_SUPPORTED
            }
            Error::BadKex | Error::AlgoNoMatch { .. } => {
                DisconnectReason::SSH_DISCONNECT_KEY_EXCHANGE_FAILED
            }
            Error::BadSig | Error::BadKey | Error::HostKeyRejected => {
                DisconnectReason::SSH_DISCONNECT_HOST_KEY_NOT_VERIFIABLE
            }
            Error::AuthFailed => {
                DisconnectReason::SSH_DISCONNECT_NO_MORE_AUTH_METHODS_AVAILABLE
            }
            Error::ConnectionLost { .. } | Error::IoError { .. } => {
                DisconnectReason::SSH_DISCONNECT_CONNECTION_LOST
            }
            Error::Timeout | Error::Custom { .. } => {
                DisconnectReason::SSH_DISCONNECT_BY_APPLICATION
            }
            _ => DisconnectReason::SSH_DISCONNECT_PROTOCOL_ERROR,
        }
    }

    /// Whether the transport is already unusable, so no
    /// `SSH_MSG_DISCONNECT` should be attempted.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Error::ConnectionLost { .. }
                | Error::IoError { .. }
                | Error::PeerDisconnect { .. }
                | Error::NotConnected
        )
    }

    #[cold]
    #[track_caller]
    /// Panics in debug builds, returns [`Error::Bug`] in release.
    pub fn bug() -> Error {
        // Easier to track the source of errors in development,
        // but release builds shouldn't panic.
        if cfg!(debug_assertions) {
            panic!("Hit a bug");
        } else {
            Error::Bug
        }
    }

    /// Like [`bug()`](Error::bug) but with a message
    ///
    /// The message can be used instead of a code comment, is logged at `debug` level.
    #[cold]
    pub fn bug_fmt(args: Arguments) -> Error {
        if cfg!(debug_assertions) {
            panic!("Hit a bug: {args}");
        } else {
            debug!("Hit a bug: {args}");
            Error::Bug
        }
    }

    #[cold]
    pub fn bug_msg<T>(msg: &str) -> Result<T, Error> {
        Err(Self::bug_fmt(format_args!("{}", msg)))
    }
}

/// A Dusk-specific Result type.
pub type Result<T, E = Error> = core::result::Result<T, E>;

pub trait TrapBug<T> {
    /// `.trap()` should be used like `.unwrap()`, in situations
    /// never expected to fail. Instead it calls [`Error::bug()`].
    /// (or debug builds may panic)
    fn trap(self) -> Result<T, Error>;

    /// Like `trap()` but with a message, calls [`Error::bug_msg()`]
    /// The message can be used instead of a comment.
    fn trap_msg(self, args: Arguments) -> Result<T, Error>;
}

impl<T, E> TrapBug<T> for Result<T, E> {
    #[track_caller]
    fn trap(self) -> Result<T, Error> {
        match self {
            Ok(i) => Ok(i),
            Err(_) => Err(Error::bug()),
        }
    }
    fn trap_msg(self, args: Arguments) -> Result<T, Error> {
        match self {
            Ok(i) => Ok(i),
            Err(_) => Err(Error::bug_fmt(args)),
        }
    }
}

impl<T> TrapBug<T> for Option<T> {
    #[track_caller]
    fn trap(self) -> Result<T, Error> {
        match self {
            Some(i) => Ok(i),
            None => Err(Error::bug()),
        }
    }
    fn trap_msg(self, args: Arguments) -> Result<T, Error> {
        match self {
            Some(i) => Ok(i),
            None => Err(Error::bug_fmt(args)),
        }
    }
}

impl From<Utf8Error> for Error {
    fn from(_e: Utf8Error) -> Error {
        Error::BadString
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            io::ErrorKind::UnexpectedEof => {
                Error::ConnectionLost { msg: "unexpected end of stream" }
            }
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                Error::ConnectionLost { msg: "connection reset" }
            }
            io::ErrorKind::BrokenPipe => Error::ConnectionLost { msg: "broken pipe" },
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout,
            _ => Error::IoError { source: Arc::new(value) },
        }
    }
}
