//! Key exchange.
//!
//! Algorithm negotiation, the exchange hash, and key derivation as
//! described in [RFC4253](https://tools.ietf.org/html/rfc4253) sections 7 and 8.
#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use digest::DynDigest;
use rand_core::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::compress::CompressAlgo;
use crate::config::ConnectionInfo;
use crate::encrypt::{CipherAlgo, MacAlgo};
use crate::namelist::{LocalNames, NameList, Named};
use crate::packets::{KexDHInit, KexDHReply, KexInit, Packet};
use crate::random;
use crate::sign::{HostKeyAlgo, HostKeyInfo};
use crate::sshnames::*;
use crate::sshwire::{self, hash_mpint, hash_ser, BinString};
use crate::traffic::{DirKeys, InKeys, OutKeys, Outbound};

// sha512 is the largest exchange hash we could use
const MAX_SESSID: usize = 64;
pub type SessId = heapless::Vec<u8, MAX_SESSID>;

/// A key exchange method.
pub struct KexAlgo {
    pub name: &'static str,
    /// Hash used for the exchange hash and key derivation
    pub new_hash: fn() -> Box<dyn DynDigest + Send>,
    /// Creates our ephemeral key
    pub start: fn() -> Result<Box<dyn KexEphemeral>>,
}

/// Our half of an ephemeral key agreement.
pub trait KexEphemeral: Send {
    /// Our public value, `Q_C` for a client
    fn public(&self) -> &[u8];

    /// Computes the shared secret `K` from the peer's public value,
    /// as an unsigned big endian integer.
    fn shared_secret(self: Box<Self>, peer: &[u8]) -> Result<Zeroizing<Vec<u8>>>;
}

impl Named for KexAlgo {
    fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for KexAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KexAlgo({})", self.name)
    }
}

/// [RFC8731](https://tools.ietf.org/html/rfc8731)
pub static CURVE25519: KexAlgo =
    KexAlgo { name: SSH_NAME_CURVE25519, new_hash: new_sha256, start: start_curve25519 };

pub static CURVE25519_LIBSSH: KexAlgo =
    KexAlgo { name: SSH_NAME_CURVE25519_LIBSSH, new_hash: new_sha256, start: start_curve25519 };

/// Default key exchange preference
pub fn default_kex() -> Vec<&'static KexAlgo> {
    vec![&CURVE25519, &CURVE25519_LIBSSH]
}

fn new_sha256() -> Box<dyn DynDigest + Send> {
    Box::new(Sha256::default())
}

struct Curve25519 {
    secret: x25519_dalek::EphemeralSecret,
    public: [u8; 32],
}

fn start_curve25519() -> Result<Box<dyn KexEphemeral>> {
    let secret = x25519_dalek::EphemeralSecret::random_from_rng(OsRng);
    let public = x25519_dalek::PublicKey::from(&secret).to_bytes();
    Ok(Box::new(Curve25519 { secret, public }))
}

impl KexEphemeral for Curve25519 {
    fn public(&self) -> &[u8] {
        &self.public
    }

    fn shared_secret(self: Box<Self>, peer: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let peer: [u8; 32] = peer.try_into().map_err(|_| Error::BadKex)?;
        let peer = x25519_dalek::PublicKey::from(peer);
        let Curve25519 { secret, .. } = *self;
        let shsec = secret.diffie_hellman(&peer);
        if !shsec.was_contributory() {
            return Err(Error::BadKex);
        }
        Ok(Zeroizing::new(shsec.as_bytes().to_vec()))
    }
}

/// Algorithms chosen for one key exchange, from our side's point of view
#[derive(Clone)]
pub(crate) struct Algos {
    pub is_client: bool,
    pub kex: &'static KexAlgo,
    pub hostkey: &'static HostKeyAlgo,
    pub cipher_enc: &'static CipherAlgo,
    pub cipher_dec: &'static CipherAlgo,
    pub mac_enc: &'static MacAlgo,
    pub mac_dec: &'static MacAlgo,
    pub comp_enc: &'static CompressAlgo,
    pub comp_dec: &'static CompressAlgo,

    /// The peer's guessed kex packet should be ignored
    pub discard_next: bool,
}

impl Algos {
    pub fn negotiated(&self) -> NegotiatedAlgorithms {
        let (c2s, s2c) = if self.is_client {
            ((self.cipher_enc, self.mac_enc, self.comp_enc), (self.cipher_dec, self.mac_dec, self.comp_dec))
        } else {
            ((self.cipher_dec, self.mac_dec, self.comp_dec), (self.cipher_enc, self.mac_enc, self.comp_enc))
        };
        NegotiatedAlgorithms {
            kex: self.kex.name,
            host_key: self.hostkey.name,
            cipher_c2s: c2s.0.name,
            cipher_s2c: s2c.0.name,
            mac_c2s: c2s.1.name,
            mac_s2c: s2c.1.name,
            compression_c2s: c2s.2.name,
            compression_s2c: s2c.2.name,
        }
    }
}

/// The algorithms in use after a completed key exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedAlgorithms {
    pub kex: &'static str,
    pub host_key: &'static str,
    pub cipher_c2s: &'static str,
    pub cipher_s2c: &'static str,
    pub mac_c2s: &'static str,
    pub mac_s2c: &'static str,
    pub compression_c2s: &'static str,
    pub compression_s2c: &'static str,
}

impl fmt::Display for NegotiatedAlgorithms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Negotiated algorithms {{\nkex {}\nhostkey {}\ncipher c2s {} s2c {}\nmac c2s {} s2c {}\ncomp c2s {} s2c {}\n}}",
            self.kex,
            self.host_key,
            self.cipher_c2s,
            self.cipher_s2c,
            self.mac_c2s,
            self.mac_s2c,
            self.compression_c2s,
            self.compression_s2c
        )
    }
}

fn local_names<T: Named>(algos: &[&'static T]) -> LocalNames {
    algos.iter().map(|a| a.name()).collect()
}

/// Picks the first of the client's names that both sides support.
fn choose<T: Named>(
    remote: &NameList,
    ours: &[&'static T],
    is_client: bool,
    algo: &'static str,
) -> Result<&'static T> {
    let local = local_names(ours);
    let n = remote.first_match(is_client, &local)?.ok_or(Error::AlgoNoMatch { algo })?;
    ours.iter().copied().find(|a| a.name() == n).trap()
}

/// Negotiates algorithms against the peer's `SSH_MSG_KEXINIT`.
pub(crate) fn negotiate(is_client: bool, p: &KexInit, conf: &ConnectionInfo) -> Result<Algos> {
    let kex = choose(&p.kex, &conf.kex, is_client, "kex")?;
    let hostkey = choose(&p.hostkey, &conf.host_keys, is_client, "hostkey")?;

    // The guess is right if both sides' first preferences agree
    let goodguess = p.kex.first() == conf.kex.first().map(|k| k.name).unwrap_or("")
        && p.hostkey.first() == conf.host_keys.first().map(|k| k.name).unwrap_or("");
    let discard_next = p.first_follows && !goodguess;

    // Switch between client/server tx/rx
    let c2s = (&p.cipher_c2s, &p.mac_c2s, &p.comp_c2s);
    let s2c = (&p.cipher_s2c, &p.mac_s2c, &p.comp_s2c);
    let ((cipher_tx, mac_tx, comp_tx), (cipher_rx, mac_rx, comp_rx)) =
        if is_client { (c2s, s2c) } else { (s2c, c2s) };

    Ok(Algos {
        is_client,
        kex,
        hostkey,
        cipher_enc: choose(cipher_tx, &conf.ciphers, is_client, "encryption")?,
        cipher_dec: choose(cipher_rx, &conf.ciphers, is_client, "encryption")?,
        mac_enc: choose(mac_tx, &conf.macs, is_client, "mac")?,
        mac_dec: choose(mac_rx, &conf.macs, is_client, "mac")?,
        comp_enc: choose(comp_tx, &conf.compression, is_client, "compression")?,
        comp_dec: choose(comp_rx, &conf.compression, is_client, "compression")?,
        discard_next,
    })
}

/// Builds our `SSH_MSG_KEXINIT` payload from the configured algorithms.
pub(crate) fn make_kexinit(conf: &ConnectionInfo) -> Result<Vec<u8>> {
    let kex = local_names(&conf.kex);
    let hostkey = local_names(&conf.host_keys);
    let ciphers = local_names(&conf.ciphers);
    let macs = local_names(&conf.macs);
    let comps = local_names(&conf.compression);
    let empty = LocalNames::default();
    let p = KexInit {
        cookie: random::kex_cookie()?,
        kex: (&kex).into(),
        hostkey: (&hostkey).into(),
        cipher_c2s: (&ciphers).into(),
        cipher_s2c: (&ciphers).into(),
        mac_c2s: (&macs).into(),
        mac_s2c: (&macs).into(),
        comp_c2s: (&comps).into(),
        comp_s2c: (&comps).into(),
        lang_c2s: (&empty).into(),
        lang_s2c: (&empty).into(),
        first_follows: false,
        reserved: 0,
    };
    sshwire::to_vec(&Packet::from(p))
}

/// Exchange hash state.
///
/// Progressively includes version idents, kexinit payloads, the host key,
/// both public values and finally the shared secret.
pub(crate) struct KexHash {
    hash: Box<dyn DynDigest + Send>,
}

impl KexHash {
    /// RFC4253 section 8: `V_C || V_S || I_C || I_S` are hashed first,
    /// each as a string. Versions exclude CR LF, kexinits are whole payloads.
    pub fn new(
        algo: &KexAlgo,
        v_c: &str,
        v_s: &str,
        i_c: &[u8],
        i_s: &[u8],
    ) -> Result<Self> {
        let mut kh = KexHash { hash: (algo.new_hash)() };
        kh.hash_string(v_c.as_bytes())?;
        kh.hash_string(v_s.as_bytes())?;
        kh.hash_string(i_c)?;
        kh.hash_string(i_s)?;
        Ok(kh)
    }

    fn hash_string(&mut self, b: &[u8]) -> Result<()> {
        hash_ser(&mut *self.hash, &BinString(b))
    }

    /// `K_S || Q_C || Q_S`
    pub fn prefinish(&mut self, k_s: &[u8], q_c: &[u8], q_s: &[u8]) -> Result<()> {
        self.hash_string(k_s)?;
        self.hash_string(q_c)?;
        self.hash_string(q_s)
    }

    /// Adds the shared secret `K` as a mpint and returns `H`
    pub fn finish(mut self, k: &[u8]) -> Vec<u8> {
        hash_mpint(&mut *self.hash, k);
        self.hash.finalize().into_vec()
    }
}

/// Result of the exchange, keys are derived from it.
pub(crate) struct KexOutput {
    pub h: Vec<u8>,
    pub k: Zeroizing<Vec<u8>>,
}

/// RFC4253 7.2 key derivation, extended to `len` bytes.
///
/// `K1 = HASH(K || H || letter || session_id)`,
/// `Kn = HASH(K || H || K1 || ... || Kn-1)`
pub(crate) fn compute_key(
    new_hash: fn() -> Box<dyn DynDigest + Send>,
    k: &[u8],
    h: &[u8],
    letter: u8,
    sess_id: &[u8],
    len: usize,
) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(len));
    let mut hash = new_hash();
    hash_mpint(&mut *hash, k);
    hash.update(h);
    hash.update(&[letter]);
    hash.update(sess_id);
    out.extend_from_slice(&hash.finalize());
    while out.len() < len {
        let mut hash = new_hash();
        hash_mpint(&mut *hash, k);
        hash.update(h);
        hash.update(&out);
        out.extend_from_slice(&hash.finalize());
    }
    out.truncate(len);
    out
}

/// Derives both directions' keys. Our encryption direction is
/// client to server for a client.
pub(crate) fn derive_keys(
    algos: &Algos,
    output: &KexOutput,
    sess_id: &[u8],
) -> Result<(OutKeys, InKeys)> {
    // (iv, key, integrity) letters
    let c2s = (b'A', b'C', b'E');
    let s2c = (b'B', b'D', b'F');
    let (tx, rx) = if algos.is_client { (c2s, s2c) } else { (s2c, c2s) };
    let key = |letter: u8, len: usize| {
        compute_key(algos.kex.new_hash, &output.k, &output.h, letter, sess_id, len)
    };

    let enc = DirKeys::new(
        algos.cipher_enc,
        &key(tx.1, algos.cipher_enc.key_len),
        &key(tx.0, algos.cipher_enc.iv_len),
        algos.mac_enc,
        &key(tx.2, algos.mac_enc.key_len),
    )?;
    let dec = DirKeys::new(
        algos.cipher_dec,
        &key(rx.1, algos.cipher_dec.key_len),
        &key(rx.0, algos.cipher_dec.iv_len),
        algos.mac_dec,
        &key(rx.2, algos.mac_dec.key_len),
    )?;
    Ok((OutKeys::new(enc, algos.comp_enc), InKeys::new(dec, algos.comp_dec)))
}

/// Client side key exchange state
pub(crate) enum Kex {
    /// No key exchange in progress
    Idle,

    /// Have sent our KexInit, waiting for the peer's.
    KexInit {
        /// Our payload, kept for the exchange hash
        our_kexinit: Vec<u8>,
    },

    /// Waiting for `SSH_MSG_KEX_ECDH_REPLY`
    KexDH {
        algos: Algos,
        kex_hash: KexHash,
        ephemeral: Box<dyn KexEphemeral>,
    },

    /// Have sent `SSH_MSG_NEWKEYS`, waiting for the peer's.
    /// `in_keys` are taken into use once it arrives.
    NewKeys {
        algos: Algos,
        in_keys: InKeys,
        h: Vec<u8>,
    },

    /// A transient state use internally to transition between other states.
    ///
    /// Should only ever occur while inside a method call, a proper state
    /// will be set before returning. (Could remain set if an error occurs,
    /// but an error returned from Kex is not recoverable anyway).
    Taken,
}

impl Kex {
    pub fn new() -> Self {
        Kex::Idle
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Kex::Idle)
    }

    fn take(&mut self) -> Self {
        core::mem::replace(self, Kex::Taken)
    }

    /// Sends our `SSH_MSG_KEXINIT` and blocks other outbound traffic,
    /// unless an exchange is already under way.
    pub fn send_kexinit(&mut self, conf: &ConnectionInfo, out: &Outbound) -> Result<()> {
        if !self.is_idle() {
            return Ok(());
        }
        out.begin_kex();
        let our_kexinit = make_kexinit(conf)?;
        out.send_payload(&our_kexinit)?;
        *self = Kex::KexInit { our_kexinit };
        Ok(())
    }

    /// Handles the server's `SSH_MSG_KEXINIT`. `payload` is the raw
    /// message as received.
    pub fn handle_kexinit(
        &mut self,
        p: &KexInit,
        payload: &[u8],
        conf: &ConnectionInfo,
        versions: (&str, &str),
        out: &Outbound,
    ) -> Result<()> {
        // Server initiated exchange
        self.send_kexinit(conf, out)?;

        let our_kexinit = match self.take() {
            Kex::KexInit { our_kexinit } => our_kexinit,
            _ => return Err(Error::PacketWrong),
        };

        let algos = negotiate(true, p, conf)?;
        debug!("{}", algos.negotiated());
        if algos.discard_next {
            debug!("Server's kex guess was wrong, its next kex packet is ignored");
        }

        let kex_hash = KexHash::new(algos.kex, versions.0, versions.1, &our_kexinit, payload)?;
        let ephemeral = (algos.kex.start)()?;
        out.reply(&KexDHInit { q_c: BinString(ephemeral.public()) }.into())?;
        *self = Kex::KexDH { algos, kex_hash, ephemeral };
        Ok(())
    }

    /// Whether the packet just received is the server's wrongly guessed
    /// kex packet. Only ever true once per exchange.
    pub fn maybe_discard_packet(&mut self) -> bool {
        match self {
            Kex::KexDH { algos, .. } => core::mem::replace(&mut algos.discard_next, false),
            _ => false,
        }
    }

    /// Verifies the server's reply, sends `SSH_MSG_NEWKEYS` and switches
    /// outbound keys. Returns the server's host key.
    pub fn handle_kexdhreply(
        &mut self,
        p: &KexDHReply,
        sess_id: Option<&SessId>,
        conf: &ConnectionInfo,
        out: &Outbound,
    ) -> Result<HostKeyInfo> {
        let (algos, mut kex_hash, ephemeral) = match self.take() {
            Kex::KexDH { algos, kex_hash, ephemeral } => (algos, kex_hash, ephemeral),
            _ => return Err(Error::PacketWrong),
        };

        kex_hash.prefinish(p.k_s.0, ephemeral.public(), p.q_s.0)?;
        let k = ephemeral.shared_secret(p.q_s.0)?;
        let h = kex_hash.finish(&k);

        (algos.hostkey.verify)(p.k_s.0, &h, p.sig.0)?;
        let hostkey = HostKeyInfo { algorithm: algos.hostkey.name, key: p.k_s.0.to_vec() };
        if let Some(check) = conf.host_key_check.as_ref() {
            if !check(&hostkey) {
                info!("Host key {} rejected", hostkey.fingerprint());
                return Err(Error::HostKeyRejected);
            }
        }

        // The first exchange hash becomes the session id
        let sid = match sess_id {
            Some(s) => s.to_vec(),
            None => h.clone(),
        };
        let output = KexOutput { h, k };
        let (out_keys, in_keys) = derive_keys(&algos, &output, &sid)?;
        out.send_newkeys(out_keys)?;
        *self = Kex::NewKeys { algos, in_keys, h: output.h };
        Ok(hostkey)
    }

    /// Handles the server's `SSH_MSG_NEWKEYS`, returning the inbound keys
    /// to take into use for the next packet.
    pub fn handle_newkeys(
        &mut self,
        sess_id: &mut Option<SessId>,
    ) -> Result<(InKeys, NegotiatedAlgorithms)> {
        match self.take() {
            Kex::NewKeys { algos, in_keys, h } => {
                if sess_id.is_none() {
                    *sess_id = Some(SessId::from_slice(&h).trap()?);
                }
                *self = Kex::Idle;
                Ok((in_keys, algos.negotiated()))
            }
            _ => Err(Error::PacketWrong),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ConnectionInfo;
    use crate::kex::*;
    use crate::sshwire::packet_from_bytes;
    use digest::Digest;

    fn kexinit_from(conf: &ConnectionInfo) -> Vec<u8> {
        make_kexinit(conf).unwrap()
    }

    #[test]
    fn client_preference_wins() {
        let mut cli = ConnectionInfo::new("localhost", 22, "user");
        cli.ciphers = vec![&crate::encrypt::AES128_CTR, &crate::encrypt::AES256_CTR];
        let mut srv = ConnectionInfo::new("localhost", 22, "user");
        srv.ciphers = vec![&crate::encrypt::AES256_CTR, &crate::encrypt::AES128_CTR];

        let srv_payload = kexinit_from(&srv);
        let Packet::KexInit(srv_init) = packet_from_bytes(&srv_payload).unwrap() else {
            panic!("not kexinit")
        };
        let a = negotiate(true, &srv_init, &cli).unwrap();
        assert_eq!(a.cipher_enc.name, SSH_NAME_AES128_CTR);
        assert_eq!(a.cipher_dec.name, SSH_NAME_AES128_CTR);

        // server side picks from the client's list too
        let cli_payload = kexinit_from(&cli);
        let Packet::KexInit(cli_init) = packet_from_bytes(&cli_payload).unwrap() else {
            panic!("not kexinit")
        };
        let a = negotiate(false, &cli_init, &srv).unwrap();
        assert_eq!(a.cipher_enc.name, SSH_NAME_AES128_CTR);
        assert_eq!(a.negotiated().cipher_c2s, SSH_NAME_AES128_CTR);
    }

    #[test]
    fn no_common_algorithm() {
        let mut cli = ConnectionInfo::new("localhost", 22, "user");
        cli.macs = vec![&crate::encrypt::HMAC_SHA512];
        let mut srv = ConnectionInfo::new("localhost", 22, "user");
        srv.macs = vec![&crate::encrypt::HMAC_SHA256];
        let srv_payload = kexinit_from(&srv);
        let Packet::KexInit(srv_init) = packet_from_bytes(&srv_payload).unwrap() else {
            panic!("not kexinit")
        };
        let r = negotiate(true, &srv_init, &cli);
        assert!(matches!(r, Err(Error::AlgoNoMatch { algo: "mac" })));
    }

    #[test]
    fn wrong_guess_discards() {
        let cli = ConnectionInfo::new("localhost", 22, "user");
        let mut srv = ConnectionInfo::new("localhost", 22, "user");
        srv.kex = vec![&CURVE25519_LIBSSH, &CURVE25519];
        let payload = kexinit_from(&srv);
        let Packet::KexInit(mut p) = packet_from_bytes(&payload).unwrap() else {
            panic!("not kexinit")
        };
        p.first_follows = true;
        let a = negotiate(true, &p, &cli).unwrap();
        assert!(a.discard_next);
        assert_eq!(a.kex.name, SSH_NAME_CURVE25519);

        let out = Outbound::new(u64::MAX, u32::MAX);
        out.open(Box::new(std::io::sink()));
        let mut kex = Kex::new();
        kex.handle_kexinit(&p, &payload, &cli, ("SSH-2.0-a", "SSH-2.0-b"), &out).unwrap();
        assert!(kex.maybe_discard_packet());
        // only the one packet
        assert!(!kex.maybe_discard_packet());
        assert!(matches!(kex, Kex::KexDH { .. }));

        // a correct guess discards nothing
        let same = kexinit_from(&cli);
        let Packet::KexInit(mut p) = packet_from_bytes(&same).unwrap() else {
            panic!("not kexinit")
        };
        p.first_follows = true;
        let mut kex = Kex::new();
        kex.handle_kexinit(&p, &same, &cli, ("SSH-2.0-a", "SSH-2.0-b"), &out).unwrap();
        assert!(!kex.maybe_discard_packet());
    }

    #[test]
    fn key_extension() {
        let k = [0x55u8; 32];
        let h = [0x11u8; 32];
        let sid = [0x22u8; 32];
        let long = compute_key(new_sha256, &k, &h, b'C', &sid, 80);
        assert_eq!(long.len(), 80);

        // the first block is plain K1
        let short = compute_key(new_sha256, &k, &h, b'C', &sid, 16);
        assert_eq!(&long[..16], &short[..]);

        // K2 = HASH(K || H || K1)
        let k1 = compute_key(new_sha256, &k, &h, b'C', &sid, 32);
        let mut d = <Sha256 as Digest>::new();
        hash_mpint(&mut d, &k);
        Digest::update(&mut d, h);
        Digest::update(&mut d, &k1[..]);
        let k2 = Digest::finalize(d);
        assert_eq!(&long[32..64], &k2[..]);

        let other = compute_key(new_sha256, &k, &h, b'D', &sid, 32);
        assert_ne!(&other[..], &k1[..]);
    }

    #[test]
    fn curve25519_agrees() {
        let a = (CURVE25519.start)().unwrap();
        let b = (CURVE25519.start)().unwrap();
        let pa = a.public().to_vec();
        let pb = b.public().to_vec();
        let sa = a.shared_secret(&pb).unwrap();
        let sb = b.shared_secret(&pa).unwrap();
        assert_eq!(*sa, *sb);

        let c = (CURVE25519.start)().unwrap();
        assert!(matches!(c.shared_secret(&[0u8; 31]), Err(Error::BadKex)));
        // the all zero point isn't contributory
        let c = (CURVE25519.start)().unwrap();
        assert!(matches!(c.shared_secret(&[0u8; 32]), Err(Error::BadKex)));
    }

    #[test]
    fn exchange_hash_inputs_matter() {
        let mk = |v_s: &str| {
            let mut kh = KexHash::new(&CURVE25519, "SSH-2.0-a", v_s, b"ic", b"is").unwrap();
            kh.prefinish(b"ks", b"qc", b"qs").unwrap();
            kh.finish(&[1, 2, 3])
        };
        assert_eq!(mk("SSH-2.0-b"), mk("SSH-2.0-b"));
        assert_ne!(mk("SSH-2.0-b"), mk("SSH-2.0-c"));
        assert_eq!(mk("SSH-2.0-b").len(), 32);
    }
}
