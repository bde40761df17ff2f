//! The consumer facing session API.
//!
//! A [`Session`] owns one SSH connection at a time. [`Session::connect`]
//! runs the handshake on the calling thread while a receive thread
//! decodes incoming packets and hands them to registered observers.
//! Any number of threads may send through a [`SessionHandle`].

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::ops::Deref;
use std::io::BufReader;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::auth::{AuthReply, Authenticator};
use crate::channel::{ChanKind, ChanNumbers, ChannelInit, RemoteChannel};
use crate::config::ConnectionInfo;
use crate::conn::{Conn, SessionState};
use crate::event::{
    DisconnectHandler, ErrorHandler, HostKeyHandler, MessageHandler, ObserverId, Observers,
};
use crate::ident::{self, ServerVersion};
use crate::kex::NegotiatedAlgorithms;
use crate::packets::{Disconnect, Ignore, MessageNumber, Packet, ServiceRequest};
use crate::registry::Phase;
use crate::runner;
use crate::sign::HostKeyInfo;
use crate::signal::{ConnectGate, Signal, Wake, Waiters};
use crate::sshnames::*;
use crate::sshwire::BinString;
use crate::traffic::Outbound;

const RETRY_DELAY: Duration = Duration::from_millis(100);
/// How long a disconnect waits for another sender to finish
const DISCONNECT_SEND_WAIT: Duration = Duration::from_millis(200);

/// State shared between a session's handles and its receive thread.
pub(crate) struct Inner {
    pub info: ConnectionInfo,
    pub conn: Mutex<Conn>,
    pub out: Outbound,
    pub observers: Observers,
    pub waiters: Waiters,
    chans: ChanNumbers,
    gate: Arc<ConnectGate>,
    authenticator: Arc<dyn Authenticator>,

    pub kex_done: Signal,
    pub service_accepted: Signal,
    pub auth_reply: Signal,
    /// Set once the receive loop has exited
    pub listener_done: Signal,

    /// A stored error is waiting in `error`
    pub failed: AtomicBool,
    pub disconnecting: AtomicBool,
    pub disconnect_sent: AtomicBool,
    pub listener_exited: AtomicBool,
    error: Mutex<Option<Error>>,

    /// Kept for shutdown and liveness checks
    socket: Mutex<Option<TcpStream>>,
    recv_thread: Mutex<Option<JoinHandle<()>>>,
    pub recv_thread_id: Mutex<Option<ThreadId>>,
    connect_lock: Mutex<()>,
}

impl Inner {
    /// Whether waits should stop watching their own signal
    fn interrupted(&self) -> bool {
        self.failed.load(SeqCst) || self.listener_exited.load(SeqCst)
    }

    pub fn set_state(&self, state: SessionState) {
        let mut c = self.conn.lock();
        if c.state != state {
            trace!("state {} -> {state}", c.state);
            c.state = state;
        }
    }

    pub fn on_recv_thread(&self) -> bool {
        *self.recv_thread_id.lock() == Some(thread::current().id())
    }

    /// Records a fatal error and tears the connection down.
    ///
    /// Errors arriving once the session is already disconnecting are
    /// only logged.
    pub fn raise_error(&self, e: Error) {
        if self.disconnecting.load(SeqCst) {
            debug!("Ignoring error while disconnecting: {e}");
            return;
        }
        warn!("Session failed: {e}");
        {
            let mut stored = self.error.lock();
            if stored.is_none() {
                *stored = Some(e.clone());
            }
        }
        self.failed.store(true, SeqCst);
        self.waiters.wake_all();
        self.observers.error(&e);

        self.disconnecting.store(true, SeqCst);
        self.set_state(SessionState::Disconnecting);
        if !e.is_connection_lost() {
            self.send_disconnect(e.disconnect_reason(), "");
        }
        self.close_transport();
    }

    /// Sends `SSH_MSG_DISCONNECT` once, ignoring failure.
    ///
    /// Skipped if another sender holds the send lock for too long, the
    /// socket shutdown that follows releases it.
    pub fn send_disconnect(&self, reason: DisconnectReason, desc: &str) {
        if self.disconnect_sent.swap(true, SeqCst) {
            return;
        }
        let p = Disconnect { reason: reason as u32, desc: desc.into(), lang: "".into() };
        match self.out.try_reply(&p.into(), DISCONNECT_SEND_WAIT) {
            Ok(true) => debug!("Sent disconnect {reason:?}"),
            Ok(false) => debug!("Disconnect not sent, sending is closed or busy"),
            Err(e) => debug!("Disconnect not sent: {e}"),
        }
    }

    pub fn close_transport(&self) {
        // Shut the socket first, a sender blocked writing holds the send lock
        if let Some(s) = self.socket.lock().take() {
            let _ = s.shutdown(Shutdown::Both);
        }
        self.out.close();
    }

    pub fn store_recv_thread(&self, t: JoinHandle<()>) {
        *self.recv_thread.lock() = Some(t);
    }

    fn join_recv_thread(&self) {
        if self.on_recv_thread() {
            // exits once the current handler returns
            return;
        }
        let t = self.recv_thread.lock().take();
        if let Some(t) = t {
            if t.join().is_err() {
                warn!("Receive thread panicked");
            }
        }
    }
}

/// A cloneable reference to a session, for sending and waiting from
/// any thread. Also passed to message observers.
#[derive(Clone)]
pub struct SessionHandle {
    pub(crate) inner: Arc<Inner>,
}

/// An SSH client session.
///
/// Dropping the session disconnects it.
pub struct Session {
    handle: SessionHandle,
}

impl Session {
    /// `gate` bounds concurrent handshakes and is normally shared
    /// between all sessions of an application.
    pub fn new(
        info: ConnectionInfo,
        authenticator: Arc<dyn Authenticator>,
        gate: Arc<ConnectGate>,
    ) -> Self {
        let inner = Inner {
            conn: Mutex::new(Conn::new(&info)),
            out: Outbound::new(info.rekey_after_bytes, info.rekey_after_packets),
            info,
            observers: Observers::new(),
            waiters: Waiters::default(),
            chans: ChanNumbers::new(),
            gate,
            authenticator,
            kex_done: Signal::new(),
            service_accepted: Signal::new(),
            auth_reply: Signal::new(),
            listener_done: Signal::new(),
            failed: AtomicBool::new(false),
            disconnecting: AtomicBool::new(false),
            disconnect_sent: AtomicBool::new(false),
            listener_exited: AtomicBool::new(false),
            error: Mutex::new(None),
            socket: Mutex::new(None),
            recv_thread: Mutex::new(None),
            recv_thread_id: Mutex::new(None),
            connect_lock: Mutex::new(()),
        };
        Session { handle: SessionHandle { inner: Arc::new(inner) } }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Connects, exchanges keys and authenticates.
    ///
    /// Returns immediately if already connected. On failure the
    /// connection is torn down before the error is returned.
    pub fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        if self.is_connected() {
            return Ok(());
        }
        inner.info.validate()?;

        let _serial = inner.connect_lock.lock();
        if self.is_connected() {
            return Ok(());
        }
        self.reset();

        let permit = inner.gate.acquire();
        let r = self.handshake();
        drop(permit);

        if let Err(e) = r {
            // an error from the receive loop is the cause of a local one
            let e = self.error().unwrap_or(e);
            info!("Connect to {}:{} failed: {e}", inner.info.host, inner.info.port);
            self.abort(&e);
            return Err(e);
        }
        info!("Connected to {}:{}", inner.info.host, inner.info.port);
        Ok(())
    }

    /// Clears state left by any previous connection
    fn reset(&self) {
        let inner = &self.inner;
        inner.close_transport();
        inner.join_recv_thread();

        inner.conn.lock().reset(&inner.info);
        for s in [&inner.kex_done, &inner.service_accepted, &inner.auth_reply, &inner.listener_done]
        {
            s.reset();
        }
        for f in
            [&inner.failed, &inner.disconnecting, &inner.disconnect_sent, &inner.listener_exited]
        {
            f.store(false, SeqCst);
        }
        *inner.error.lock() = None;
        *inner.recv_thread_id.lock() = None;
        inner.chans.reset();
    }

    fn handshake(&self) -> Result<()> {
        let inner = &self.inner;
        let info = &inner.info;

        inner.set_state(SessionState::Connecting);
        let stream = self.open_socket()?;
        stream.set_nodelay(true)?;
        *inner.socket.lock() = Some(stream.try_clone()?);

        let mut writer = stream.try_clone()?;
        ident::send_version(&mut writer, &info.client_version())?;
        stream.set_read_timeout(Some(info.timeout))?;
        let mut reader = BufReader::new(stream);
        let version = ident::read_version(&mut reader)?;
        reader.get_ref().set_read_timeout(None)?;
        {
            let mut c = inner.conn.lock();
            c.server_version = Some(version);
            c.state = SessionState::VersionExchanged;
            c.registry.set_phase(Phase::Transport);
        }

        inner.out.open(Box::new(writer));
        runner::spawn(inner.clone(), reader)?;

        {
            let mut c = inner.conn.lock();
            c.state = SessionState::KeyExchanging;
            // The server may already have started, or even finished, the exchange
            if c.algos.is_none() && c.start_kex(info, &inner.out)? {
                inner.kex_done.reset();
            }
        }
        self.wait_on(&inner.kex_done, info.timeout)?;

        inner.service_accepted.reset();
        self.send(&ServiceRequest { name: SSH_SERVICE_USERAUTH }.into())?;
        self.wait_on(&inner.service_accepted, info.timeout)?;

        inner.set_state(SessionState::Authenticating);
        inner.authenticator.authenticate(&self.handle, &info.username)?;
        let mut c = inner.conn.lock();
        if !c.authenticated {
            return Err(Error::AuthFailed);
        }
        if inner.interrupted() || inner.disconnecting.load(SeqCst) {
            return Err(Error::NotConnected);
        }
        c.state = SessionState::Connected;
        Ok(())
    }

    fn open_socket(&self) -> Result<TcpStream> {
        let info = &self.inner.info;
        let attempts = info.retry_attempts.saturating_add(1);
        let mut last = Error::NotConnected;
        for attempt in 1..=attempts {
            for addr in (info.host.as_str(), info.port).to_socket_addrs()? {
                match TcpStream::connect_timeout(&addr, info.connect_timeout) {
                    Ok(s) => {
                        debug!("Connected TCP to {addr}");
                        return Ok(s);
                    }
                    Err(e) => {
                        debug!("Connect to {addr} attempt {attempt} failed: {e}");
                        last = e.into();
                    }
                }
            }
            if attempt < attempts {
                thread::sleep(RETRY_DELAY);
            }
        }
        Err(last)
    }

    /// Tears down a failed connection attempt
    fn abort(&self, e: &Error) {
        let inner = &self.inner;
        inner.disconnecting.store(true, SeqCst);
        inner.set_state(SessionState::Disconnecting);
        inner.waiters.wake_all();
        if !e.is_connection_lost() {
            inner.send_disconnect(e.disconnect_reason(), "");
        }
        inner.close_transport();
        inner.join_recv_thread();
        inner.set_state(SessionState::Disconnected);
    }
}

impl Deref for Session {
    type Target = SessionHandle;
    fn deref(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect()
    }
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.inner.info.host)
            .field("port", &self.inner.info.port)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// Sends `SSH_MSG_DISCONNECT` and closes the connection, returning
    /// once the receive thread has exited.
    ///
    /// When called from a message handler the receive thread exits
    /// after the handler returns instead.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        if inner.conn.lock().state == SessionState::Disconnected
            && inner.recv_thread.lock().is_none()
        {
            return;
        }
        debug!("Disconnecting");
        inner.set_state(SessionState::Disconnecting);
        inner.disconnecting.store(true, SeqCst);
        inner.waiters.wake_all();
        inner.send_disconnect(DisconnectReason::SSH_DISCONNECT_BY_APPLICATION, "");
        inner.close_transport();
        inner.join_recv_thread();
        inner.set_state(SessionState::Disconnected);
    }

    /// Sends a message.
    ///
    /// During a key exchange non-kex messages wait for it to complete,
    /// for up to the configured timeout. From a message handler they
    /// are queued instead.
    pub fn send(&self, p: &Packet) -> Result<()> {
        let inner = &self.inner;
        if inner.on_recv_thread() {
            return inner.out.reply(p);
        }
        if inner.out.send(p, inner.info.timeout)? {
            debug!("Rekey threshold reached");
            self.start_rekey()?;
        }
        Ok(())
    }

    /// Like [`send()`](Self::send) but returns `false` on failure
    pub fn try_send(&self, p: &Packet) -> bool {
        match self.send(p) {
            Ok(()) => true,
            Err(e) => {
                debug!("try_send {} failed: {e}", p.message_num());
                false
            }
        }
    }

    /// Sends `SSH_MSG_IGNORE`, useful as a keepalive
    pub fn send_ignore(&self) -> Result<()> {
        self.send(&Ignore { data: BinString(&[]) }.into())
    }

    /// Starts a key exchange unless one is running
    fn start_rekey(&self) -> Result<()> {
        let inner = &self.inner;
        let mut c = inner.conn.lock();
        if c.start_kex(&inner.info, &inner.out)? {
            inner.kex_done.reset();
        }
        Ok(())
    }

    /// Exchanges new keys, waiting for the exchange to complete.
    ///
    /// From a message handler the exchange is only started.
    pub fn rekey(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.start_rekey()?;
        if self.inner.on_recv_thread() {
            return Ok(());
        }
        self.wait_on(&self.inner.kex_done, self.inner.info.timeout)
    }

    /// Waits for `signal` to be set.
    ///
    /// Returns early with the session's error if it fails, or
    /// [`Error::NotConnected`] once the receive loop has exited. A timeout
    /// while the session is disconnecting returns `Ok`.
    pub fn wait_on(&self, signal: &Signal, timeout: Duration) -> Result<()> {
        let inner = &self.inner;
        let wake = {
            let _g = inner.waiters.register(signal);
            signal.wait_until(Instant::now() + timeout, || inner.interrupted())
        };

        if inner.failed.load(SeqCst) {
            if let Some(e) = inner.error.lock().clone() {
                return Err(e);
            }
        }
        if inner.listener_exited.load(SeqCst) {
            return Err(Error::NotConnected);
        }
        match wake {
            Wake::Set => Ok(()),
            Wake::TimedOut if inner.disconnecting.load(SeqCst) => {
                debug!("Wait timed out while disconnecting");
                Ok(())
            }
            Wake::TimedOut => Err(Error::Timeout),
            // interrupts are handled above
            Wake::Interrupted => Err(Error::NotConnected),
        }
    }

    /// Waits for the reply to a `SSH_MSG_USERAUTH_REQUEST`
    pub fn userauth_reply(&self, timeout: Duration) -> Result<AuthReply> {
        let inner = &self.inner;
        loop {
            {
                let mut c = inner.conn.lock();
                if let Some(r) = c.auth_reply.take() {
                    inner.auth_reply.reset();
                    return Ok(r);
                }
            }
            // no reply will arrive on a closing connection
            if inner.disconnecting.load(SeqCst) {
                return Err(Error::NotConnected);
            }
            self.wait_on(&inner.auth_reply, timeout)?;
        }
    }

    /// Delivers `num` to its message observers.
    ///
    /// Messages that are received but not registered are dropped.
    pub fn register_message(&self, num: MessageNumber) {
        self.inner.conn.lock().registry.activate(num)
    }

    pub fn unregister_message(&self, num: MessageNumber) {
        self.inner.conn.lock().registry.deactivate(num)
    }

    /// Adds a handler for `num`, run on the receive thread once the
    /// message is registered.
    pub fn on_message(&self, num: MessageNumber, f: MessageHandler) -> ObserverId {
        self.inner.observers.add_message(num, f)
    }

    pub fn on_error(&self, f: ErrorHandler) -> ObserverId {
        self.inner.observers.add_error(f)
    }

    pub fn on_disconnect(&self, f: DisconnectHandler) -> ObserverId {
        self.inner.observers.add_disconnected(f)
    }

    pub fn on_host_key(&self, f: HostKeyHandler) -> ObserverId {
        self.inner.observers.add_host_key(f)
    }

    /// Returns `false` if `id` wasn't registered
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.inner.observers.remove(id)
    }

    pub fn create_channel_session(&self) -> ChannelInit {
        ChannelInit::new(self.inner.chans.next(), ChanKind::Session)
    }

    pub fn create_direct_tcpip_channel(&self) -> ChannelInit {
        ChannelInit::new(self.inner.chans.next(), ChanKind::DirectTcpip)
    }

    /// For a `forwarded-tcpip` channel opened by the server
    pub fn create_forwarded_tcpip_channel(&self, remote: RemoteChannel) -> ChannelInit {
        ChannelInit::new(self.inner.chans.next(), ChanKind::ForwardedTcpip(remote))
    }

    /// Authenticated, not disconnected and with the receive loop running
    pub fn is_connected(&self) -> bool {
        let inner = &self.inner;
        !inner.disconnect_sent.load(SeqCst)
            && !inner.listener_exited.load(SeqCst)
            && inner.conn.lock().authenticated
            && inner.socket.lock().is_some()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.conn.lock().authenticated
    }

    pub fn state(&self) -> SessionState {
        self.inner.conn.lock().state
    }

    /// Exchange hash of the first key exchange
    pub fn session_id(&self) -> Option<Vec<u8>> {
        self.inner.conn.lock().sess_id.as_ref().map(|s| s.to_vec())
    }

    pub fn server_version(&self) -> Option<ServerVersion> {
        self.inner.conn.lock().server_version.clone()
    }

    /// Our identification line, without CR LF
    pub fn client_version(&self) -> String {
        self.inner.conn.lock().client_version.clone()
    }

    /// Algorithms of the most recent key exchange
    pub fn algorithms(&self) -> Option<NegotiatedAlgorithms> {
        self.inner.conn.lock().algos.clone()
    }

    pub fn host_key(&self) -> Option<HostKeyInfo> {
        self.inner.conn.lock().host_key.clone()
    }

    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.inner.info
    }

    /// The error that failed the current connection
    pub fn error(&self) -> Option<Error> {
        self.inner.error.lock().clone()
    }

    /// Sequence number of the next packet sent
    pub fn outbound_sequence(&self) -> u32 {
        self.inner.out.seq()
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;

    use crate::dusklog::init_test_log;
    use crate::packets::*;
    use crate::session::*;
    use crate::sshwire::{to_vec, Rest};
    use crate::testserver::{NoneAuth, ServerOpts, TestServer};

    fn session(info: ConnectionInfo) -> Session {
        Session::new(info, Arc::new(NoneAuth), Arc::new(ConnectGate::default()))
    }

    fn payload(p: Packet) -> Vec<u8> {
        to_vec(&p).unwrap()
    }

    /// Polls `f` for a few seconds
    fn wait_for(f: impl Fn() -> bool) -> bool {
        let end = Instant::now() + Duration::from_secs(5);
        while Instant::now() < end {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        f()
    }

    fn data(num: u32) -> Packet<'static> {
        ChannelData { num, data: BinString(b"some channel data") }.into()
    }

    #[test]
    fn connect_and_disconnect() {
        init_test_log();
        let server = TestServer::start(ServerOpts::default());
        let sess = session(server.info());
        assert_eq!(sess.state(), SessionState::Disconnected);
        sess.connect().unwrap();

        assert!(sess.is_connected());
        assert!(sess.is_authenticated());
        assert_eq!(sess.state(), SessionState::Connected);
        assert_eq!(sess.server_version().unwrap().protocol, "2.0");
        assert_eq!(sess.client_version(), "SSH-2.0-Dusk_0.1");
        assert_eq!(sess.session_id().unwrap().len(), 32);
        let algos = sess.algorithms().unwrap();
        assert_eq!(algos.kex, SSH_NAME_CURVE25519);
        assert_eq!(algos.host_key, SSH_NAME_ED25519);
        assert!(sess.host_key().unwrap().fingerprint().starts_with("SHA256:"));

        // already connected
        sess.connect().unwrap();
        assert_eq!(server.shared.kex_count.load(SeqCst), 1);

        sess.disconnect();
        assert!(!sess.is_connected());
        assert!(sess.inner.listener_done.is_set());
        assert_eq!(sess.state(), SessionState::Disconnected);
        assert!(sess.send(&data(0)).is_err());
        assert!(!sess.try_send(&data(0)));

        let reasons = &server.shared.disconnect_reasons;
        assert!(wait_for(|| !reasons.lock().is_empty()));
        assert_eq!(
            reasons.lock()[0],
            DisconnectReason::SSH_DISCONNECT_BY_APPLICATION as u32
        );
    }

    #[test]
    fn reconnect() {
        init_test_log();
        let server = TestServer::start(ServerOpts::default());
        let sess = session(server.info());
        sess.connect().unwrap();
        let first = sess.session_id().unwrap();
        assert_eq!(sess.create_channel_session().num.0, 0);
        sess.disconnect();

        sess.connect().unwrap();
        assert!(sess.is_connected());
        assert_ne!(sess.session_id().unwrap(), first);
        // channel numbers restart for a new connection
        assert_eq!(sess.create_channel_session().num.0, 0);
        assert_eq!(sess.create_direct_tcpip_channel().num.0, 1);
    }

    #[test]
    fn legacy_version_accepted() {
        init_test_log();
        let server =
            TestServer::start(ServerOpts { version: "SSH-1.99-OpenSSH_3.9", ..Default::default() });
        let sess = session(server.info());
        sess.connect().unwrap();
        assert_eq!(sess.server_version().unwrap().protocol, "1.99");
    }

    #[test]
    fn old_version_rejected() {
        init_test_log();
        let server = TestServer::start(ServerOpts { version: "SSH-1.3-Ancient", ..Default::default() });
        let sess = session(server.info());
        let e = sess.connect().unwrap_err();
        assert!(matches!(e, Error::VersionNotSupported { ref version } if version == "1.3"));
        assert!(!sess.is_connected());
        assert_eq!(sess.state(), SessionState::Disconnected);
    }

    #[test]
    fn connection_refused() {
        init_test_log();
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let mut info = ConnectionInfo::new("127.0.0.1", port, "test");
        info.retry_attempts = 2;
        let sess = session(info);
        assert!(sess.connect().is_err());
        assert_eq!(sess.state(), SessionState::Disconnected);
    }

    #[test]
    fn auth_rejected() {
        init_test_log();
        let server = TestServer::start(ServerOpts { reject_auth: true, ..Default::default() });
        let sess = session(server.info());
        assert!(matches!(sess.connect(), Err(Error::AuthFailed)));
        assert!(!sess.is_connected());

        let reasons = &server.shared.disconnect_reasons;
        assert!(wait_for(|| !reasons.lock().is_empty()));
        assert_eq!(
            reasons.lock()[0],
            DisconnectReason::SSH_DISCONNECT_NO_MORE_AUTH_METHODS_AVAILABLE as u32
        );
    }

    #[test]
    fn host_key_rejected() {
        init_test_log();
        let server = TestServer::start(ServerOpts::default());
        let mut info = server.info();
        info.host_key_check = Some(Arc::new(|_: &HostKeyInfo| false));
        let sess = session(info);
        assert!(matches!(sess.connect(), Err(Error::HostKeyRejected)));
        assert!(sess.session_id().is_none());
    }

    #[test]
    fn host_key_observer() {
        init_test_log();
        let server = TestServer::start(ServerOpts::default());
        let sess = session(server.info());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        sess.on_host_key(Arc::new(move |k: &HostKeyInfo| s.lock().push(k.clone())));
        sess.connect().unwrap();
        sess.rekey().unwrap();
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
        assert_eq!(seen[0], sess.host_key().unwrap());
    }

    #[test]
    fn wait_timeout() {
        init_test_log();
        let server = TestServer::start(ServerOpts::default());
        let sess = session(server.info());
        sess.connect().unwrap();

        let sig = Signal::new();
        let e = sess.wait_on(&sig, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(e, Error::Timeout));
        sig.set();
        sess.wait_on(&sig, Duration::from_millis(50)).unwrap();
    }

    #[test]
    fn wait_during_disconnect() {
        init_test_log();
        let server =
            TestServer::start(ServerOpts { silent_after_auth: true, ..Default::default() });
        let sess = session(server.info());
        sess.connect().unwrap();

        let h = sess.handle();
        let waiter = thread::spawn(move || {
            let start = Instant::now();
            let r = h.wait_on(&Signal::new(), Duration::from_secs(5));
            (r, start.elapsed())
        });
        thread::sleep(Duration::from_millis(200));
        sess.disconnect();
        assert!(sess.inner.listener_done.is_set());

        let (r, elapsed) = waiter.join().unwrap();
        assert!(matches!(r, Err(Error::NotConnected)), "{r:?}");
        assert!(elapsed < Duration::from_secs(4));

        // a wait started after disconnecting doesn't report success
        let r = sess.handle().wait_on(&Signal::new(), Duration::from_millis(50));
        assert!(matches!(r, Err(Error::NotConnected)), "{r:?}");
    }

    #[test]
    fn timeout_while_disconnecting() {
        init_test_log();
        let server =
            TestServer::start(ServerOpts { silent_after_auth: true, ..Default::default() });
        let sess = session(server.info());
        sess.connect().unwrap();
        let h = sess.handle();

        let r = h.wait_on(&Signal::new(), Duration::from_millis(50));
        assert!(matches!(r, Err(Error::Timeout)), "{r:?}");

        sess.inner.disconnecting.store(true, SeqCst);
        h.wait_on(&Signal::new(), Duration::from_millis(50)).unwrap();
        // a set signal still wins
        let sig = Signal::new();
        sig.set();
        h.wait_on(&sig, Duration::from_millis(50)).unwrap();

        sess.inner.disconnecting.store(false, SeqCst);
        sess.disconnect();
        assert!(sess.inner.listener_done.is_set());
    }

    #[test]
    fn disconnect_with_blocked_sender() {
        init_test_log();
        let server =
            TestServer::start(ServerOpts { silent_after_auth: true, ..Default::default() });
        let mut info = server.info();
        info.rekey_after_bytes = u64::MAX;
        info.rekey_after_packets = u32::MAX;
        let sess = session(info);
        sess.connect().unwrap();

        let sent = Arc::new(AtomicUsize::new(0));
        let sender = {
            let (h, sent) = (sess.handle(), sent.clone());
            thread::spawn(move || {
                let chunk = vec![0x5a; 30_000];
                let p: Packet = ChannelData { num: 0, data: BinString(&chunk) }.into();
                // the server isn't reading, so this blocks once socket buffers fill
                while h.send(&p).is_ok() {
                    sent.fetch_add(1, SeqCst);
                }
            })
        };
        // wait until the sender has stalled
        let last = AtomicUsize::new(usize::MAX);
        assert!(wait_for(|| {
            thread::sleep(Duration::from_millis(100));
            let n = sent.load(SeqCst);
            n > 0 && last.swap(n, SeqCst) == n
        }));

        let start = Instant::now();
        sess.disconnect();
        assert!(start.elapsed() < Duration::from_secs(3), "{:?}", start.elapsed());
        sender.join().unwrap();
        assert_eq!(sess.state(), SessionState::Disconnected);
    }

    #[test]
    fn bounded_connect() {
        init_test_log();
        let server = TestServer::start(ServerOpts {
            kex_delay: Duration::from_millis(150),
            ..Default::default()
        });
        let gate = Arc::new(ConnectGate::new(2));
        let ok = AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..5 {
                s.spawn(|| {
                    let sess = Session::new(server.info(), Arc::new(NoneAuth), gate.clone());
                    if sess.connect().is_ok() {
                        ok.fetch_add(1, SeqCst);
                    }
                });
            }
        });
        assert_eq!(ok.load(SeqCst), 5);
        assert!(server.shared.peak_handshaking.load(SeqCst) <= 2);
        assert_eq!(gate.available(), 2);
    }

    #[test]
    fn concurrent_senders() {
        init_test_log();
        let server = TestServer::start(ServerOpts::default());
        let sess = session(server.info());
        sess.connect().unwrap();

        let start = sess.outbound_sequence();
        thread::scope(|s| {
            for t in 0..4 {
                let h = sess.handle();
                s.spawn(move || {
                    for _ in 0..50 {
                        h.send(&data(t)).unwrap();
                    }
                });
            }
        });
        assert_eq!(sess.outbound_sequence(), start.wrapping_add(200));

        // the server checks each MAC with its own sequence count
        let shared = &server.shared;
        assert!(wait_for(|| shared.received_count(MessageNumber::SSH_MSG_CHANNEL_DATA) == 200));
        assert!(sess.is_connected());
    }

    #[test]
    fn sends_held_during_rekey() {
        init_test_log();
        let server = TestServer::start(ServerOpts {
            kex_delay: Duration::from_millis(100),
            ..Default::default()
        });
        let sess = session(server.info());
        sess.connect().unwrap();
        let sid = sess.session_id();

        let h = sess.handle();
        let sender = thread::spawn(move || {
            for _ in 0..100 {
                h.send(&data(1)).unwrap();
                thread::sleep(Duration::from_millis(2));
            }
        });
        thread::sleep(Duration::from_millis(20));
        sess.rekey().unwrap();
        sender.join().unwrap();

        let shared = &server.shared;
        assert!(wait_for(|| shared.received_count(MessageNumber::SSH_MSG_CHANNEL_DATA) == 100));
        assert_eq!(shared.kex_count.load(SeqCst), 2);
        assert!(shared.during_kex.lock().is_empty());
        assert_eq!(sess.session_id(), sid);
    }

    #[test]
    fn server_rekey() {
        init_test_log();
        let server = TestServer::start(ServerOpts {
            rekey_after_auth: true,
            kex_delay: Duration::from_millis(50),
            ..Default::default()
        });
        let sess = session(server.info());
        sess.connect().unwrap();
        for _ in 0..50 {
            sess.send(&data(2)).unwrap();
        }
        let shared = &server.shared;
        assert!(wait_for(|| shared.kex_count.load(SeqCst) == 2));
        assert!(wait_for(|| shared.received_count(MessageNumber::SSH_MSG_CHANNEL_DATA) == 50));
        assert!(shared.during_kex.lock().is_empty());
        assert!(sess.is_connected());
    }

    #[test]
    fn automatic_rekey() {
        init_test_log();
        let server = TestServer::start(ServerOpts::default());
        let mut info = server.info();
        info.rekey_after_packets = 20;
        let sess = session(info);
        sess.connect().unwrap();
        for _ in 0..30 {
            sess.send(&data(3)).unwrap();
        }
        let shared = &server.shared;
        assert!(wait_for(|| shared.kex_count.load(SeqCst) >= 2));
        assert!(wait_for(|| shared.received_count(MessageNumber::SSH_MSG_CHANNEL_DATA) == 30));
        assert!(shared.during_kex.lock().is_empty());
    }

    #[test]
    fn message_not_enabled() {
        init_test_log();
        // channel data before authentication
        let server =
            TestServer::start(ServerOpts { early: vec![payload(data(0))], ..Default::default() });
        let sess = session(server.info());
        let e = sess.connect().unwrap_err();
        assert!(matches!(e, Error::MessageNotAllowed { number: 94 }));

        let reasons = &server.shared.disconnect_reasons;
        assert!(wait_for(|| !reasons.lock().is_empty()));
        assert_eq!(reasons.lock()[0], DisconnectReason::SSH_DISCONNECT_PROTOCOL_ERROR as u32);
    }

    fn early_global_request() -> Vec<u8> {
        payload(
            GlobalRequest { name: "keepalive@openssh.com", want_reply: true, data: Rest(&[]) }
                .into(),
        )
    }

    #[test]
    fn early_global_request_allowed() {
        init_test_log();
        let server =
            TestServer::start(ServerOpts { early: vec![early_global_request()], ..Default::default() });
        let sess = session(server.info());
        sess.connect().unwrap();
        // refused since nothing handles global requests
        let shared = &server.shared;
        assert!(wait_for(|| shared.received_count(MessageNumber::SSH_MSG_REQUEST_FAILURE) == 1));
    }

    #[test]
    fn early_global_request_refused() {
        init_test_log();
        let server =
            TestServer::start(ServerOpts { early: vec![early_global_request()], ..Default::default() });
        let mut info = server.info();
        info.early_global_request = false;
        let sess = session(info);
        assert!(matches!(sess.connect(), Err(Error::MessageNotAllowed { number: 80 })));
    }

    #[test]
    fn registered_messages() {
        init_test_log();
        let server = TestServer::start(ServerOpts {
            after_auth: vec![
                payload(ChannelEof { num: 7 }.into()),
                payload(data(7)),
            ],
            ..Default::default()
        });
        let sess = session(server.info());
        let got = Arc::new(Mutex::new(Vec::new()));
        let g = got.clone();
        sess.on_message(
            MessageNumber::SSH_MSG_CHANNEL_DATA,
            Arc::new(move |s: &SessionHandle, p: &Packet| -> Result<()> {
                if let Packet::ChannelData(d) = p {
                    g.lock().push(d.data.0.to_vec());
                    // replies from the receive thread don't block
                    s.send(&ChannelClose { num: d.num }.into())?;
                }
                Ok(())
            }),
        );
        let g = got.clone();
        sess.on_message(
            MessageNumber::SSH_MSG_CHANNEL_EOF,
            Arc::new(move |_: &SessionHandle, _: &Packet| -> Result<()> {
                g.lock().push(b"eof".to_vec());
                Ok(())
            }),
        );
        // only data is registered, eof is dropped
        sess.register_message(MessageNumber::SSH_MSG_CHANNEL_DATA);
        sess.connect().unwrap();

        assert!(wait_for(|| got.lock().len() == 1));
        assert_eq!(got.lock()[0], b"some channel data");
        let shared = &server.shared;
        assert!(wait_for(|| shared.received_count(MessageNumber::SSH_MSG_CHANNEL_CLOSE) == 1));

        sess.unregister_message(MessageNumber::SSH_MSG_CHANNEL_DATA);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(got.lock().len(), 1);
    }

    #[test]
    fn peer_disconnect() {
        init_test_log();
        let bye = Disconnect { reason: 11, desc: "bye".into(), lang: "".into() };
        let server =
            TestServer::start(ServerOpts { after_auth: vec![payload(bye.into())], ..Default::default() });
        let sess = session(server.info());

        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = errors.clone();
        sess.on_error(Arc::new(move |err: &Error| e.lock().push(err.clone())));
        let gone = Arc::new(AtomicUsize::new(0));
        let g = gone.clone();
        sess.on_disconnect(Arc::new(move || {
            g.fetch_add(1, SeqCst);
        }));

        // the disconnect can race with connect completing
        let _ = sess.connect();
        assert!(wait_for(|| sess.inner.listener_done.is_set()));
        assert!(wait_for(|| gone.load(SeqCst) == 1));
        assert!(!sess.is_connected());

        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], Error::PeerDisconnect { reason: 11, ref desc } if desc == "bye"));
        assert!(matches!(sess.error(), Some(Error::PeerDisconnect { .. })));
        assert!(sess.wait_on(&Signal::new(), Duration::from_secs(1)).is_err());
    }

    #[test]
    fn delayed_compression() {
        init_test_log();
        let mut opts = ServerOpts {
            after_auth: vec![payload(data(9))],
            ..Default::default()
        };
        opts.conf.compression = vec![&crate::compress::ZLIB_OPENSSH];
        let server = TestServer::start(opts);
        let mut info = server.info();
        info.compression = vec![&crate::compress::ZLIB_OPENSSH];
        let sess = session(info);

        let got = Arc::new(AtomicUsize::new(0));
        let g = got.clone();
        sess.on_message(
            MessageNumber::SSH_MSG_CHANNEL_DATA,
            Arc::new(move |_: &SessionHandle, _: &Packet| -> Result<()> {
                g.fetch_add(1, SeqCst);
                Ok(())
            }),
        );
        sess.register_message(MessageNumber::SSH_MSG_CHANNEL_DATA);
        sess.connect().unwrap();
        assert_eq!(sess.algorithms().unwrap().compression_c2s, SSH_NAME_ZLIB_OPENSSH);

        for _ in 0..10 {
            sess.send(&data(9)).unwrap();
        }
        sess.send_ignore().unwrap();
        let shared = &server.shared;
        assert!(wait_for(|| shared.received_count(MessageNumber::SSH_MSG_CHANNEL_DATA) == 10));
        assert!(wait_for(|| got.load(SeqCst) == 1));
        assert!(sess.is_connected());
    }

    #[test]
    fn unhandled_channel_open() {
        init_test_log();
        let open = ChannelOpen {
            num: 3,
            initial_window: 1000,
            max_packet: 1000,
            ty: ChannelOpenType::Session,
        };
        let server =
            TestServer::start(ServerOpts { after_auth: vec![payload(open.into())], ..Default::default() });
        let sess = session(server.info());
        sess.connect().unwrap();
        let shared = &server.shared;
        assert!(wait_for(
            || shared.received_count(MessageNumber::SSH_MSG_CHANNEL_OPEN_FAILURE) == 1
        ));
    }

    #[test]
    fn forwarded_channel() {
        let sess = session(ConnectionInfo::new("localhost", 22, "me"));
        let remote = RemoteChannel { num: 40, window: 100, max_packet: 100 };
        let c = sess.create_forwarded_tcpip_channel(remote);
        assert_eq!(c.kind, ChanKind::ForwardedTcpip(remote));
        assert_eq!(c.initial_window, crate::config::LOCAL_WINDOW_SIZE);
        assert_eq!(sess.create_channel_session().num.0, c.num.0 + 1);
    }

    #[test]
    fn not_connected() {
        let sess = session(ConnectionInfo::new("localhost", 22, "me"));
        assert!(matches!(sess.send(&data(0)), Err(Error::NotConnected)));
        assert!(matches!(sess.rekey(), Err(Error::NotConnected)));
        // nothing to tear down
        sess.disconnect();
        assert_eq!(sess.state(), SessionState::Disconnected);
    }
}
