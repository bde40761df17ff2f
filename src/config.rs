//! Connection parameters and protocol constants.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::compress::{self, CompressAlgo};
use crate::encrypt::{self, CipherAlgo, MacAlgo};
use crate::kex::{self, KexAlgo};
use crate::namelist::Named;
use crate::sign::{self, HostKeyAlgo, HostKeyInfo};

/// Initial window advertised for channels we open
pub const LOCAL_WINDOW_SIZE: u32 = 0x7FFF_FFFF;

/// Largest channel data packet we accept
pub const LOCAL_CHANNEL_DATA_PACKET_SIZE: u32 = 64 * 1024;

/// Largest SSH packet (payload plus protocol framing) sent or received.
pub const MAXIMUM_PACKET_SIZE: usize = LOCAL_CHANNEL_DATA_PACKET_SIZE as usize + 3000;

/// Concurrent connection handshakes allowed by a default [`ConnectGate`](crate::ConnectGate)
pub const DEFAULT_CONNECT_CONCURRENCY: usize = 3;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// RFC4253 9 recommends rekeying after a gigabyte or an hour
pub const DEFAULT_REKEY_BYTES: u64 = 1 << 30;
pub const DEFAULT_REKEY_PACKETS: u32 = 1 << 31;

pub const DEFAULT_SOFTWARE: &str = "Dusk_0.1";

/// Decides whether a server host key is acceptable
pub type HostKeyCheck = Arc<dyn Fn(&HostKeyInfo) -> bool + Send + Sync>;

/// Parameters for a [`Session`](crate::Session).
///
/// Algorithm lists are in preference order, the first entry is tried first.
#[derive(Clone)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub username: String,

    pub kex: Vec<&'static KexAlgo>,
    pub host_keys: Vec<&'static HostKeyAlgo>,
    pub ciphers: Vec<&'static CipherAlgo>,
    pub macs: Vec<&'static MacAlgo>,
    pub compression: Vec<&'static CompressAlgo>,

    /// Limit for each blocking wait on the session
    pub timeout: Duration,
    /// TCP connection timeout, per attempt
    pub connect_timeout: Duration,
    /// How long channel layers should wait for a peer's close
    pub channel_close_timeout: Duration,
    /// Further TCP connection attempts after the first fails
    pub retry_attempts: u32,
    /// Concurrent channels a consumer should allow
    pub max_sessions: usize,

    /// Software part of our version line, `SSH-2.0-{software}`
    pub software: String,

    /// Accept `SSH_MSG_GLOBAL_REQUEST` during authentication.
    /// Some servers send one before `SSH_MSG_USERAUTH_SUCCESS`.
    pub early_global_request: bool,

    /// Called with the server's host key after each key exchange.
    /// Returning `false` fails the exchange. All keys are accepted when unset.
    pub host_key_check: Option<HostKeyCheck>,

    /// Rekey after sending this many bytes under the same keys
    pub rekey_after_bytes: u64,
    /// Rekey after sending this many packets under the same keys
    pub rekey_after_packets: u32,
}

impl ConnectionInfo {
    pub fn new(host: &str, port: u16, username: &str) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            kex: kex::default_kex(),
            host_keys: sign::default_host_keys(),
            ciphers: encrypt::default_ciphers(),
            macs: encrypt::default_macs(),
            compression: compress::default_compression(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_TIMEOUT,
            channel_close_timeout: Duration::from_secs(1),
            retry_attempts: 10,
            max_sessions: 10,
            software: DEFAULT_SOFTWARE.into(),
            early_global_request: true,
            host_key_check: None,
            rekey_after_bytes: DEFAULT_REKEY_BYTES,
            rekey_after_packets: DEFAULT_REKEY_PACKETS,
        }
    }

    /// Our identification line without CR LF
    pub fn client_version(&self) -> String {
        format!("SSH-2.0-{}", self.software)
    }

    /// Checks that each algorithm category is populated and unique,
    /// and the version line is sendable.
    pub fn validate(&self) -> Result<()> {
        fn check<T: Named>(algos: &[&'static T], msg: &'static str) -> Result<()> {
            let mut seen = HashSet::new();
            if algos.is_empty() || !algos.iter().all(|a| seen.insert(a.name())) {
                return Err(Error::BadConfig { msg });
            }
            Ok(())
        }
        check(&self.kex, "kex algorithms")?;
        check(&self.host_keys, "host key algorithms")?;
        check(&self.ciphers, "ciphers")?;
        check(&self.macs, "macs")?;
        check(&self.compression, "compression")?;

        if self.host.is_empty() {
            return Err(Error::BadConfig { msg: "host" });
        }
        if self.software.is_empty()
            || !self.software.chars().all(|c| c.is_ascii_graphic() && c != '-')
        {
            return Err(Error::BadConfig { msg: "software version" });
        }
        if self.timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(Error::BadConfig { msg: "timeout" });
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("kex", &self.kex)
            .field("host_keys", &self.host_keys)
            .field("ciphers", &self.ciphers)
            .field("macs", &self.macs)
            .field("compression", &self.compression)
            .field("timeout", &self.timeout)
            .field("retry_attempts", &self.retry_attempts)
            .field("host_key_check", &self.host_key_check.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::*;

    #[test]
    fn defaults_validate() {
        let c = ConnectionInfo::new("example.com", 22, "me");
        c.validate().unwrap();
        assert_eq!(c.client_version(), "SSH-2.0-Dusk_0.1");
        assert!(c.early_global_request);
    }

    #[test]
    fn empty_and_duplicate_lists() {
        let mut c = ConnectionInfo::new("example.com", 22, "me");
        c.macs.clear();
        assert!(matches!(c.validate(), Err(Error::BadConfig { msg: "macs" })));

        let mut c = ConnectionInfo::new("example.com", 22, "me");
        c.ciphers.push(&encrypt::AES128_CTR);
        assert!(matches!(c.validate(), Err(Error::BadConfig { msg: "ciphers" })));
    }

    #[test]
    fn software_string() {
        let mut c = ConnectionInfo::new("example.com", 22, "me");
        c.software = "has space".into();
        assert!(c.validate().is_err());
        c.software = "has-dash".into();
        assert!(c.validate().is_err());
    }
}
