//! Host key algorithms and signature verification.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use ed25519_dalek::Verifier;
use sha2::{Digest, Sha256};

use crate::namelist::Named;
use crate::sshnames::*;
use crate::sshwire::{self, BinString};
use sunset_sshwire_derive::*;

/// A server host key algorithm.
pub struct HostKeyAlgo {
    pub name: &'static str,
    /// Checks `sig` (a signature blob) over `msg` with the key blob `pubkey`
    pub verify: fn(pubkey: &[u8], msg: &[u8], sig: &[u8]) -> Result<()>,
}

impl Named for HostKeyAlgo {
    fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for HostKeyAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostKeyAlgo({})", self.name)
    }
}

pub static ED25519: HostKeyAlgo = HostKeyAlgo { name: SSH_NAME_ED25519, verify: verify_ed25519 };

/// Default host key algorithm preference
pub fn default_host_keys() -> Vec<&'static HostKeyAlgo> {
    vec![&ED25519]
}

/// `string algo, string key` as used for ed25519 public keys
/// and for signature blobs.
#[derive(Debug, SSHEncode, SSHDecode)]
pub struct NamedBlob<'a> {
    pub algo: &'a str,
    pub data: BinString<'a>,
}

fn verify_ed25519(pubkey: &[u8], msg: &[u8], sig: &[u8]) -> Result<()> {
    let k: NamedBlob = sshwire::read_ssh(pubkey).map_err(|_| Error::BadKey)?;
    if k.algo != SSH_NAME_ED25519 {
        warn!("Host key type {:?} doesn't match {SSH_NAME_ED25519}", k.algo);
        return Err(Error::BadKey);
    }
    let k: &[u8; 32] = k.data.0.try_into().map_err(|_| Error::BadKey)?;
    let k = ed25519_dalek::VerifyingKey::from_bytes(k).map_err(|_| Error::BadKey)?;

    let s: NamedBlob = sshwire::read_ssh(sig).map_err(|_| Error::BadSig)?;
    if s.algo != SSH_NAME_ED25519 {
        warn!("Received {:?} signature, expecting {SSH_NAME_ED25519}", s.algo);
        return Err(Error::BadSig);
    }
    let s: &[u8; 64] = s.data.0.try_into().map_err(|_| Error::BadSig)?;
    let s = ed25519_dalek::Signature::from_bytes(s);
    k.verify(msg, &s).map_err(|_| Error::BadSig)
}

/// The server's host key, presented to the host key check and
/// host key observers during each key exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct HostKeyInfo {
    pub algorithm: &'static str,
    /// Public key blob in SSH wire format
    pub key: Vec<u8>,
}

impl HostKeyInfo {
    pub fn fingerprint_sha256(&self) -> [u8; 32] {
        Sha256::digest(&self.key).into()
    }

    /// Hex SHA256 fingerprint, `SHA256:ab:cd:...`
    pub fn fingerprint(&self) -> String {
        let hex: Vec<String> =
            self.fingerprint_sha256().iter().map(|b| format!("{b:02x}")).collect();
        format!("SHA256:{}", hex.join(":"))
    }
}

impl fmt::Debug for HostKeyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostKeyInfo({} {})", self.algorithm, self.fingerprint())
    }
}
