//! Observers notified by the receive loop.
//!
//! Callbacks run synchronously on the receive thread, in registration
//! order. They must not block waiting for another message to arrive,
//! since nothing else is received until they return.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::packets::{MessageNumber, Packet};
use crate::session::SessionHandle;
use crate::sign::HostKeyInfo;

/// Handles a received message. An error is fatal to the session.
pub type MessageHandler = Arc<dyn Fn(&SessionHandle, &Packet) -> Result<()> + Send + Sync>;
/// Notified once with the error that failed a session
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;
/// Notified when the receive loop has exited
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;
/// Notified with the server's host key after each key exchange
pub type HostKeyHandler = Arc<dyn Fn(&HostKeyInfo) + Send + Sync>;

/// Identifies a registered observer for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct ObserverList<K, F: ?Sized> {
    list: Mutex<Vec<(ObserverId, K, Arc<F>)>>,
}

impl<K: Copy + PartialEq, F: ?Sized> ObserverList<K, F> {
    fn new() -> Self {
        ObserverList { list: Mutex::new(Vec::new()) }
    }

    fn add(&self, id: ObserverId, key: K, f: Arc<F>) {
        self.list.lock().push((id, key, f));
    }

    fn remove(&self, id: ObserverId) -> bool {
        let mut l = self.list.lock();
        let before = l.len();
        l.retain(|(i, _, _)| *i != id);
        l.len() != before
    }

    /// Callbacks for `key`, copied so they run without the lock held
    fn matching(&self, key: K) -> Vec<Arc<F>> {
        self.list.lock().iter().filter(|(_, k, _)| *k == key).map(|(_, _, f)| f.clone()).collect()
    }
}

pub(crate) struct Observers {
    next: AtomicU64,
    messages: ObserverList<MessageNumber, dyn Fn(&SessionHandle, &Packet) -> Result<()> + Send + Sync>,
    errors: ObserverList<(), dyn Fn(&Error) + Send + Sync>,
    disconnected: ObserverList<(), dyn Fn() + Send + Sync>,
    host_key: ObserverList<(), dyn Fn(&HostKeyInfo) + Send + Sync>,
}

impl Observers {
    pub fn new() -> Self {
        Observers {
            next: AtomicU64::new(1),
            messages: ObserverList::new(),
            errors: ObserverList::new(),
            disconnected: ObserverList::new(),
            host_key: ObserverList::new(),
        }
    }

    fn next_id(&self) -> ObserverId {
        ObserverId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    pub fn add_message(&self, num: MessageNumber, f: MessageHandler) -> ObserverId {
        let id = self.next_id();
        self.messages.add(id, num, f);
        id
    }

    pub fn add_error(&self, f: ErrorHandler) -> ObserverId {
        let id = self.next_id();
        self.errors.add(id, (), f);
        id
    }

    pub fn add_disconnected(&self, f: DisconnectHandler) -> ObserverId {
        let id = self.next_id();
        self.disconnected.add(id, (), f);
        id
    }

    pub fn add_host_key(&self, f: HostKeyHandler) -> ObserverId {
        let id = self.next_id();
        self.host_key.add(id, (), f);
        id
    }

    pub fn remove(&self, id: ObserverId) -> bool {
        self.messages.remove(id)
            || self.errors.remove(id)
            || self.disconnected.remove(id)
            || self.host_key.remove(id)
    }

    /// Whether any consumer handles `num`
    pub fn handles(&self, num: MessageNumber) -> bool {
        !self.messages.matching(num).is_empty()
    }

    /// Runs message handlers for `p`, stopping at the first error
    pub fn message(&self, sess: &SessionHandle, p: &Packet) -> Result<()> {
        for f in self.messages.matching(p.message_num()) {
            f(sess, p)?;
        }
        Ok(())
    }

    pub fn error(&self, e: &Error) {
        for f in self.errors.matching(()) {
            f(e)
        }
    }

    pub fn disconnected(&self) {
        for f in self.disconnected.matching(()) {
            f()
        }
    }

    pub fn host_key(&self, k: &HostKeyInfo) {
        for f in self.host_key.matching(()) {
            f(k)
        }
    }
}
