//! A minimal loopback SSH server for session tests.
//!
//! Built from the crate's own codec and kex pieces, running the server
//! side with an ed25519 host key. Each accepted connection is served on
//! its own thread.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ed25519_dalek::{Signer, SigningKey};
use parking_lot::Mutex;

use crate::config::ConnectionInfo;
use crate::ident;
use crate::kex::{derive_keys, make_kexinit, negotiate, KexHash, KexOutput};
use crate::packets::*;
use crate::sign::NamedBlob;
use crate::sshnames::*;
use crate::sshwire::{packet_from_bytes, to_vec, BinString, Rest};
use crate::traffic::{TrafIn, TrafOut};

#[derive(Clone)]
pub(crate) struct ServerOpts {
    pub version: &'static str,
    /// Server side algorithm preferences
    pub conf: ConnectionInfo,
    /// Pause before `SSH_MSG_KEX_ECDH_REPLY`
    pub kex_delay: Duration,
    pub reject_auth: bool,
    /// Start a key exchange once authenticated
    pub rekey_after_auth: bool,
    /// Stop reading once authenticated, leaving the socket open
    pub silent_after_auth: bool,
    /// Sent after `SSH_MSG_SERVICE_ACCEPT`, before authentication
    pub early: Vec<Vec<u8>>,
    /// Sent after `SSH_MSG_USERAUTH_SUCCESS`
    pub after_auth: Vec<Vec<u8>>,
}

impl Default for ServerOpts {
    fn default() -> Self {
        ServerOpts {
            version: "SSH-2.0-DuskTest",
            conf: ConnectionInfo::new("localhost", 22, "test"),
            kex_delay: Duration::ZERO,
            reject_auth: false,
            rekey_after_auth: false,
            silent_after_auth: false,
            early: Vec::new(),
            after_auth: Vec::new(),
        }
    }
}

/// Observations shared by all connections to one server
#[derive(Default)]
pub(crate) struct Shared {
    /// Message numbers received, in order
    pub received: Mutex<Vec<u8>>,
    /// Non-kex messages received during a key exchange
    pub during_kex: Mutex<Vec<u8>>,
    pub disconnect_reasons: Mutex<Vec<u32>>,
    pub kex_count: AtomicUsize,
    /// Connections between accept and the auth reply
    pub handshaking: AtomicUsize,
    pub peak_handshaking: AtomicUsize,
    pub stop: AtomicBool,
}

impl Shared {
    pub fn received_count(&self, num: MessageNumber) -> usize {
        self.received.lock().iter().filter(|n| **n == num as u8).count()
    }
}

pub(crate) struct TestServer {
    pub addr: SocketAddr,
    pub shared: Arc<Shared>,
}

impl TestServer {
    pub fn start(opts: ServerOpts) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared::default());
        let sh = shared.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let opts = opts.clone();
                let sh = sh.clone();
                thread::spawn(move || {
                    let n = sh.handshaking.fetch_add(1, SeqCst) + 1;
                    sh.peak_handshaking.fetch_max(n, SeqCst);
                    let sh2 = sh.clone();
                    let mut conn = match ServerConn::new(stream, opts, sh) {
                        Ok(c) => c,
                        Err(e) => {
                            debug!("test server setup failed: {e}");
                            sh2.handshaking.fetch_sub(1, SeqCst);
                            return;
                        }
                    };
                    if let Err(e) = conn.serve() {
                        debug!("test server connection ended: {e}");
                    }
                    if !conn.auth_replied {
                        conn.shared.handshaking.fetch_sub(1, SeqCst);
                    }
                });
            }
        });
        TestServer { addr, shared }
    }

    pub fn info(&self) -> ConnectionInfo {
        let mut info = ConnectionInfo::new("127.0.0.1", self.addr.port(), "test");
        info.timeout = Duration::from_secs(10);
        info.retry_attempts = 0;
        info
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shared.stop.store(true, SeqCst);
    }
}

struct ServerConn {
    opts: ServerOpts,
    shared: Arc<Shared>,
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    traf_in: TrafIn,
    traf_out: TrafOut,
    buf: Vec<u8>,
    client_version: String,
    our_kexinit: Option<Vec<u8>>,
    sess_id: Option<Vec<u8>>,
    key: SigningKey,
    auth_replied: bool,
}

impl ServerConn {
    fn new(stream: TcpStream, opts: ServerOpts, shared: Arc<Shared>) -> Result<Self> {
        let mut writer = stream.try_clone()?;
        ident::send_version(&mut writer, opts.version)?;
        let mut reader = BufReader::new(stream);
        let client_version = ident::read_version(&mut reader)?.line;
        Ok(ServerConn {
            opts,
            shared,
            reader,
            writer,
            traf_in: TrafIn::new(),
            traf_out: TrafOut::new(),
            buf: Vec::new(),
            client_version,
            our_kexinit: None,
            sess_id: None,
            key: SigningKey::from_bytes(&[0x42; 32]),
            auth_replied: false,
        })
    }

    fn send_payload(&mut self, payload: &[u8]) -> Result<()> {
        self.traf_out.encode(payload, &mut self.buf)?;
        // the client may already have gone, keep reading what it sent
        if let Err(e) = self.writer.write_all(&self.buf) {
            debug!("test server write failed: {e}");
        }
        self.traf_out.sent(self.buf.len());
        Ok(())
    }

    fn send(&mut self, p: Packet) -> Result<()> {
        self.send_payload(&to_vec(&p)?)
    }

    /// Next payload, `None` once the client closes
    fn read(&mut self) -> Result<Option<Vec<u8>>> {
        let p = self.traf_in.read_packet(&mut self.reader)?.map(|p| p.to_vec());
        if let Some(p) = &p {
            self.shared.received.lock().push(p[0]);
        }
        Ok(p)
    }

    fn read_required(&mut self) -> Result<Vec<u8>> {
        self.read()?.ok_or(Error::ConnectionLost { msg: "test client closed" })
    }

    fn send_kexinit(&mut self) -> Result<Vec<u8>> {
        let k = make_kexinit(&self.opts.conf)?;
        self.send_payload(&k)?;
        Ok(k)
    }

    /// Reads until a message `num` arrives, noting anything that
    /// shouldn't be sent during a key exchange.
    fn read_kex(&mut self, num: MessageNumber) -> Result<Vec<u8>> {
        loop {
            let p = self.read_required()?;
            if p[0] == num as u8 {
                return Ok(p);
            }
            if !packet_from_bytes(&p)?.category().kex_allowed() {
                self.shared.during_kex.lock().push(p[0]);
            }
        }
    }

    fn kex(&mut self, client_kexinit: Vec<u8>) -> Result<()> {
        let ours = match self.our_kexinit.take() {
            Some(k) => k,
            None => self.send_kexinit()?,
        };
        let Packet::KexInit(ki) = packet_from_bytes(&client_kexinit)? else {
            return Err(Error::PacketWrong);
        };
        let algos = negotiate(false, &ki, &self.opts.conf)?;
        let mut kh =
            KexHash::new(algos.kex, &self.client_version, self.opts.version, &client_kexinit, &ours)?;

        let p = self.read_kex(MessageNumber::SSH_MSG_KEX_ECDH_INIT)?;
        let Packet::KexDHInit(init) = packet_from_bytes(&p)? else {
            return Err(Error::PacketWrong);
        };
        let q_c = init.q_c.0.to_vec();

        let eph = (algos.kex.start)()?;
        let q_s = eph.public().to_vec();
        let k = eph.shared_secret(&q_c)?;

        let pubkey = self.key.verifying_key().to_bytes();
        let k_s = to_vec(&NamedBlob { algo: SSH_NAME_ED25519, data: BinString(&pubkey) })?;
        kh.prefinish(&k_s, &q_c, &q_s)?;
        let h = kh.finish(&k);
        let sig = self.key.sign(&h).to_bytes();
        let sig = to_vec(&NamedBlob { algo: SSH_NAME_ED25519, data: BinString(&sig) })?;

        thread::sleep(self.opts.kex_delay);
        self.send(
            KexDHReply { k_s: BinString(&k_s), q_s: BinString(&q_s), sig: BinString(&sig) }.into(),
        )?;

        let sid = self.sess_id.get_or_insert_with(|| h.clone()).clone();
        let (out_keys, in_keys) = derive_keys(&algos, &KexOutput { h, k }, &sid)?;
        self.send(NewKeys {}.into())?;
        self.traf_out.rekey(out_keys);

        self.read_kex(MessageNumber::SSH_MSG_NEWKEYS)?;
        self.traf_in.rekey(in_keys);
        self.shared.kex_count.fetch_add(1, SeqCst);
        Ok(())
    }

    fn serve(&mut self) -> Result<()> {
        self.our_kexinit = Some(self.send_kexinit()?);

        while let Some(payload) = self.read()? {
            let p = packet_from_bytes(&payload)?;
            match p {
                Packet::KexInit(_) => self.kex(payload.clone())?,
                Packet::ServiceRequest(_) => {
                    self.send(ServiceAccept { name: SSH_SERVICE_USERAUTH }.into())?;
                    for e in self.opts.early.clone() {
                        self.send_payload(&e)?;
                    }
                }
                Packet::UserauthRequest(_) => {
                    if !self.auth_replied {
                        self.auth_replied = true;
                        self.shared.handshaking.fetch_sub(1, SeqCst);
                    }
                    if self.opts.reject_auth {
                        let methods = crate::namelist::LocalNames::from_iter(["password"]);
                        self.send(
                            UserauthFailure { methods: (&methods).into(), partial: false }.into(),
                        )?;
                    } else {
                        self.send(UserauthSuccess {}.into())?;
                        self.traf_out.set_authenticated();
                        self.traf_in.set_authenticated();
                        self.after_auth()?;
                    }
                }
                Packet::Disconnect(d) => {
                    self.shared.disconnect_reasons.lock().push(d.reason);
                    return Ok(());
                }
                Packet::GlobalRequest(g) if g.want_reply => {
                    self.send(RequestSuccess { data: Rest(&[]) }.into())?;
                }
                _ => (),
            }
        }
        Ok(())
    }

    fn after_auth(&mut self) -> Result<()> {
        for e in self.opts.after_auth.clone() {
            self.send_payload(&e)?;
        }
        if self.opts.rekey_after_auth {
            self.our_kexinit = Some(self.send_kexinit()?);
        }
        if self.opts.silent_after_auth {
            while !self.shared.stop.load(SeqCst) {
                thread::sleep(Duration::from_millis(20));
            }
        }
        Ok(())
    }
}

/// Authenticates with the `none` method
pub(crate) struct NoneAuth;

impl crate::auth::Authenticator for NoneAuth {
    fn authenticate(&self, session: &crate::session::SessionHandle, username: &str) -> Result<()> {
        session.send(
            &UserauthRequest {
                username: username.into(),
                service: SSH_SERVICE_CONNECTION,
                method: SSH_AUTHMETHOD_NONE,
                rest: Rest(&[]),
            }
            .into(),
        )?;
        match session.userauth_reply(Duration::from_secs(10))? {
            crate::auth::AuthReply::Success => Ok(()),
            crate::auth::AuthReply::Failure { .. } => Err(Error::AuthFailed),
        }
    }
}
