//! Ciphers and MACs for the binary packet protocol.
//!
//! Each algorithm is a static descriptor with a constructor, so that
//! [`ConnectionInfo`](crate::ConnectionInfo) can hold an ordered
//! preference list and new algorithms can be added without touching
//! the codec.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use aes::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

use crate::namelist::Named;
use crate::sshnames::*;

pub(crate) const SSH_MIN_PACKET_SIZE: usize = 16;
pub(crate) const SSH_MIN_PADLEN: usize = 4;
pub(crate) const SSH_MIN_BLOCK: usize = 8;
pub(crate) const SSH_LENGTH_SIZE: usize = 4;
pub(crate) const SSH_PAYLOAD_START: usize = SSH_LENGTH_SIZE + 1;

/// A packet cipher, keyed for one direction.
///
/// State carries across packets (the CTR counter).
pub trait PacketCipher: Send {
    fn encrypt(&mut self, buf: &mut [u8]);
    fn decrypt(&mut self, buf: &mut [u8]);
}

/// A packet MAC, keyed for one direction.
pub trait PacketMac: Send {
    /// Writes `MAC(key, seq || packet)` to `out`, which is `mac_len` long.
    fn compute(&self, seq: u32, packet: &[u8], out: &mut [u8]);
}

pub struct CipherAlgo {
    pub name: &'static str,
    pub block_len: usize,
    pub key_len: usize,
    pub iv_len: usize,
    pub make: fn(key: &[u8], iv: &[u8]) -> Result<Box<dyn PacketCipher>>,
}

pub struct MacAlgo {
    pub name: &'static str,
    pub key_len: usize,
    pub mac_len: usize,
    pub make: fn(key: &[u8]) -> Result<Box<dyn PacketMac>>,
}

impl Named for CipherAlgo {
    fn name(&self) -> &'static str {
        self.name
    }
}

impl Named for MacAlgo {
    fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for CipherAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CipherAlgo({})", self.name)
    }
}

impl fmt::Debug for MacAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAlgo({})", self.name)
    }
}

pub static AES128_CTR: CipherAlgo = CipherAlgo {
    name: SSH_NAME_AES128_CTR,
    block_len: 16,
    key_len: 16,
    iv_len: 16,
    make: make_aes128_ctr,
};

pub static AES192_CTR: CipherAlgo = CipherAlgo {
    name: SSH_NAME_AES192_CTR,
    block_len: 16,
    key_len: 24,
    iv_len: 16,
    make: make_aes192_ctr,
};

pub static AES256_CTR: CipherAlgo = CipherAlgo {
    name: SSH_NAME_AES256_CTR,
    block_len: 16,
    key_len: 32,
    iv_len: 16,
    make: make_aes256_ctr,
};

pub static HMAC_SHA256: MacAlgo = MacAlgo {
    name: SSH_NAME_HMAC_SHA256,
    key_len: 32,
    mac_len: 32,
    make: make_hmac_sha256,
};

pub static HMAC_SHA512: MacAlgo = MacAlgo {
    name: SSH_NAME_HMAC_SHA512,
    key_len: 64,
    mac_len: 64,
    make: make_hmac_sha512,
};

/// Default cipher preference
pub fn default_ciphers() -> Vec<&'static CipherAlgo> {
    vec![&AES256_CTR, &AES192_CTR, &AES128_CTR]
}

/// Default MAC preference
pub fn default_macs() -> Vec<&'static MacAlgo> {
    vec![&HMAC_SHA256, &HMAC_SHA512]
}

// RFC4344 counter mode uses the whole block as a big endian counter
type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type Aes192Ctr = ctr::Ctr128BE<aes::Aes192>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

struct CtrCipher<C>(C);

impl<C: StreamCipher + Send> PacketCipher for CtrCipher<C> {
    fn encrypt(&mut self, buf: &mut [u8]) {
        self.0.apply_keystream(buf)
    }

    fn decrypt(&mut self, buf: &mut [u8]) {
        self.0.apply_keystream(buf)
    }
}

fn make_aes128_ctr(key: &[u8], iv: &[u8]) -> Result<Box<dyn PacketCipher>> {
    let c = Aes128Ctr::new_from_slices(key, iv).map_err(|_| Error::BadKey)?;
    Ok(Box::new(CtrCipher(c)))
}

fn make_aes192_ctr(key: &[u8], iv: &[u8]) -> Result<Box<dyn PacketCipher>> {
    let c = Aes192Ctr::new_from_slices(key, iv).map_err(|_| Error::BadKey)?;
    Ok(Box::new(CtrCipher(c)))
}

fn make_aes256_ctr(key: &[u8], iv: &[u8]) -> Result<Box<dyn PacketCipher>> {
    let c = Aes256Ctr::new_from_slices(key, iv).map_err(|_| Error::BadKey)?;
    Ok(Box::new(CtrCipher(c)))
}

struct HmacMac<M>(M);

impl<M: Mac + Clone + Send> PacketMac for HmacMac<M> {
    fn compute(&self, seq: u32, packet: &[u8], out: &mut [u8]) {
        let mut m = self.0.clone();
        m.update(&seq.to_be_bytes());
        m.update(packet);
        out.copy_from_slice(&m.finalize().into_bytes());
    }
}

fn make_hmac_sha256(key: &[u8]) -> Result<Box<dyn PacketMac>> {
    let m = Hmac::<Sha256>::new_from_slice(key).map_err(|_| Error::BadKey)?;
    Ok(Box::new(HmacMac(m)))
}

fn make_hmac_sha512(key: &[u8]) -> Result<Box<dyn PacketMac>> {
    let m = Hmac::<Sha512>::new_from_slice(key).map_err(|_| Error::BadKey)?;
    Ok(Box::new(HmacMac(m)))
}

/// Returns the padding length for a payload.
///
/// The result makes the packet a multiple of `block_len` with at
/// least 4 bytes of padding and a minimum packet size of 16.
pub(crate) fn calc_encrypt_pad(block_len: usize, payload_len: usize) -> usize {
    let len = SSH_LENGTH_SIZE + 1 + payload_len;

    // round padding length upwards so that len is a multiple of block size
    let mut padlen = block_len - len % block_len;

    // need at least 4 bytes padding
    if padlen < SSH_MIN_PADLEN {
        padlen += block_len
    }

    // The minimum size of a packet is 16 (plus mac)
    if len + padlen < SSH_MIN_PACKET_SIZE {
        padlen += block_len;
    }
    padlen
}

#[cfg(test)]
mod tests {
    use crate::encrypt::*;

    fn unhex(s: &str) -> Vec<u8> {
        (0..s.len()).step_by(2).map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap()).collect()
    }

    #[test]
    fn aes128_ctr_vector() {
        // NIST SP800-38A F.5.1
        let key = unhex("2b7e151628aed2a6abf7158809cf4f3c");
        let iv = unhex("f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff");
        let mut c = (AES128_CTR.make)(&key, &iv).unwrap();
        let mut buf = unhex("6bc1bee22e409f96e93d7e117393172a");
        c.encrypt(&mut buf);
        assert_eq!(buf, unhex("874d6191b620e3261bef6864990db6ce"));
    }

    #[test]
    fn ctr_state_continues() {
        let key = [7u8; 32];
        let iv = [9u8; 16];
        let mut whole = (AES256_CTR.make)(&key, &iv).unwrap();
        let mut split = (AES256_CTR.make)(&key, &iv).unwrap();
        let mut a = [0u8; 48];
        let mut b = [0u8; 48];
        whole.encrypt(&mut a);
        split.encrypt(&mut b[..16]);
        split.encrypt(&mut b[16..]);
        assert_eq!(a, b);
        split.decrypt(&mut [0u8; 16]);
    }

    #[test]
    fn bad_key_length() {
        assert!(matches!((AES128_CTR.make)(&[0u8; 5], &[0u8; 16]), Err(Error::BadKey)));
    }

    #[test]
    fn hmac_covers_sequence() {
        // RFC4231 test case 2, with "what" standing in as the sequence number
        let m = (HMAC_SHA256.make)(b"Jefe").unwrap();
        let seq = u32::from_be_bytes(*b"what");
        let mut out = [0u8; 32];
        m.compute(seq, b" do ya want for nothing?", &mut out);
        assert_eq!(
            out.to_vec(),
            unhex("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
        );

        let mut other = [0u8; 32];
        m.compute(seq + 1, b" do ya want for nothing?", &mut other);
        assert_ne!(out, other);
    }

    #[test]
    fn padding() {
        for block in [SSH_MIN_BLOCK, 16] {
            for payload in 0..100 {
                let pad = calc_encrypt_pad(block, payload);
                let total = SSH_LENGTH_SIZE + 1 + payload + pad;
                assert!(pad >= SSH_MIN_PADLEN);
                assert!(pad < 255);
                assert_eq!(total % block, 0);
                assert!(total >= SSH_MIN_PACKET_SIZE);
            }
        }
    }
}
