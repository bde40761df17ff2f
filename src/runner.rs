//! The receive loop.
//!
//! One thread per connection reads packets, lets [`Conn`](crate::conn::Conn)
//! handle transport messages, and runs consumer observers for the rest.
//! Handlers run on this thread in the order packets arrive.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::io::BufReader;
use std::net::TcpStream;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::Arc;
use std::thread;

use crate::session::{Inner, SessionHandle};
use crate::sshwire;
use crate::traffic::{InKeys, TrafIn};

/// Starts the receive thread for a connection whose version exchange
/// has completed. `reader` may already hold buffered packet data.
pub(crate) fn spawn(inner: Arc<Inner>, reader: BufReader<TcpStream>) -> Result<()> {
    let runner = Runner {
        sess: SessionHandle { inner: inner.clone() },
        inner: inner.clone(),
        reader,
        traf: TrafIn::new(),
    };
    let t = thread::Builder::new().name("dusk-recv".into()).spawn(move || runner.run())?;
    inner.store_recv_thread(t);
    Ok(())
}

struct Runner {
    inner: Arc<Inner>,
    /// Passed to message observers
    sess: SessionHandle,
    reader: BufReader<TcpStream>,
    traf: TrafIn,
}

impl Runner {
    fn run(mut self) {
        *self.inner.recv_thread_id.lock() = Some(thread::current().id());
        debug!("Receive loop started");
        if let Err(e) = self.receive() {
            self.inner.raise_error(e);
        }
        self.finish();
    }

    fn receive(&mut self) -> Result<()> {
        loop {
            let disconnecting = || self.inner.disconnecting.load(SeqCst);
            let payload = match self.traf.read_packet(&mut self.reader) {
                Ok(Some(p)) => p,
                Ok(None) => {
                    if disconnecting() {
                        return Ok(());
                    }
                    return Err(Error::ConnectionLost { msg: "closed by peer" });
                }
                Err(e) => {
                    if disconnecting() {
                        debug!("Read ended while disconnecting: {e}");
                        return Ok(());
                    }
                    return Err(e);
                }
            };

            let (keys, authenticated) = handle_packet(&self.inner, &self.sess, payload)?;
            if let Some(keys) = keys {
                trace!("New inbound keys");
                self.traf.rekey(keys);
            }
            if authenticated {
                // delayed compression applies from the next packet
                self.traf.set_authenticated();
            }
        }
    }

    fn finish(self) {
        let inner = &self.inner;
        inner.close_transport();
        inner.listener_exited.store(true, SeqCst);
        inner.listener_done.set();
        inner.waiters.wake_all();
        inner.set_state(crate::conn::SessionState::Disconnected);
        debug!("Receive loop exited");
        inner.observers.disconnected();
    }
}

/// Handles one packet. Returns any new inbound keys and whether
/// the session just became authenticated.
fn handle_packet(
    inner: &Inner,
    sess: &SessionHandle,
    payload: &[u8],
) -> Result<(Option<InKeys>, bool)> {
    let tag = *payload.first().ok_or(Error::WrongPacketLength)?;

    let p;
    let (d, deliver) = {
        let mut c = inner.conn.lock();
        let num = c.registry.check(tag)?;
        p = sshwire::packet_from_bytes(payload)?;
        trace!("Received {p:?}");

        let deliver = c.registry.is_active(num) && inner.observers.handles(num);
        let d = c.dispatch(&p, payload, &inner.info, &inner.out, deliver)?;

        if d.kex_started {
            debug!("Server started key exchange");
            inner.kex_done.reset();
        }
        if d.kex_done {
            inner.out.end_kex()?;
            inner.kex_done.set();
            debug!("Key exchange complete");
        }
        if d.authenticated {
            inner.out.set_authenticated();
        }
        // signals are set under the conn lock, consumers reset them under it too
        if d.service_accepted {
            inner.service_accepted.set();
        }
        if d.auth_reply {
            inner.auth_reply.set();
        }
        (d, deliver)
    };

    if let Some(hk) = &d.host_key {
        inner.observers.host_key(hk);
    }
    if deliver {
        inner.observers.message(sess, &p)?;
    } else if p.category() == crate::packets::Category::Conn {
        trace!("Dropped {}, no consumer", p.message_num());
    }
    Ok((d.new_keys, d.authenticated))
}
