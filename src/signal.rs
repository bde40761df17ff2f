//! Cross-thread signalling.
//!
//! [`Signal`] is a flag that threads block on. Waits made through a
//! session are also woken when the session fails or its receive loop
//! exits, see [`SessionHandle::wait_on`](crate::SessionHandle::wait_on).
//! [`ConnectGate`] bounds how many connection handshakes run at once.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::config::DEFAULT_CONNECT_CONCURRENCY;

struct SignalInner {
    set: Mutex<bool>,
    cond: Condvar,
    auto_reset: bool,
}

/// A flag that can be waited for.
///
/// Clones refer to the same flag.
#[derive(Clone)]
pub struct Signal(Arc<SignalInner>);

/// Why a wait returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Set,
    Interrupted,
    TimedOut,
}

impl Signal {
    /// A signal that stays set until [`reset()`](Self::reset)
    pub fn new() -> Self {
        Self::with_reset(false)
    }

    /// A signal that clears when a waiter observes it
    pub fn auto_reset() -> Self {
        Self::with_reset(true)
    }

    fn with_reset(auto_reset: bool) -> Self {
        Signal(Arc::new(SignalInner { set: Mutex::new(false), cond: Condvar::new(), auto_reset }))
    }

    pub fn set(&self) {
        *self.0.set.lock() = true;
        self.0.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.0.set.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.0.set.lock()
    }

    /// Wakes waiters so they re-check their interrupt condition
    pub(crate) fn poke(&self) {
        let _g = self.0.set.lock();
        self.0.cond.notify_all();
    }

    /// Blocks until set, `interrupted()` returns true, or `deadline` passes.
    ///
    /// `interrupted` is evaluated under the signal's lock, so it must not
    /// take locks that are held while calling [`poke()`](Self::poke).
    pub(crate) fn wait_until(&self, deadline: Instant, interrupted: impl Fn() -> bool) -> Wake {
        let mut set = self.0.set.lock();
        loop {
            if interrupted() {
                return Wake::Interrupted;
            }
            if *set {
                if self.0.auto_reset {
                    *set = false;
                }
                return Wake::Set;
            }
            if self.0.cond.wait_until(&mut set, deadline).timed_out() {
                // one last look
                if *set || interrupted() {
                    continue;
                }
                return Wake::TimedOut;
            }
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Signal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Signal({})", if self.is_set() { "set" } else { "unset" })
    }
}

/// Signals currently being waited on, so they can all be woken
/// when the session fails.
#[derive(Default)]
pub(crate) struct Waiters {
    list: Mutex<Vec<(u64, Signal)>>,
    next: AtomicU64,
}

impl Waiters {
    /// Registers `sig` until the returned guard drops
    pub fn register(&self, sig: &Signal) -> WaiterGuard<'_> {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.list.lock().push((id, sig.clone()));
        WaiterGuard { waiters: self, id }
    }

    pub fn wake_all(&self) {
        let sigs: Vec<Signal> = self.list.lock().iter().map(|(_, s)| s.clone()).collect();
        for s in sigs {
            s.poke();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.list.lock().len()
    }
}

pub(crate) struct WaiterGuard<'a> {
    waiters: &'a Waiters,
    id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.waiters.list.lock().retain(|(id, _)| *id != self.id);
    }
}

/// Limits concurrent connection handshakes.
///
/// Shared between sessions with an `Arc`. A session holds a permit from
/// TCP connect until authentication finishes.
pub struct ConnectGate {
    in_use: Mutex<usize>,
    cond: Condvar,
    limit: usize,
}

impl ConnectGate {
    pub fn new(limit: usize) -> Self {
        ConnectGate { in_use: Mutex::new(0), cond: Condvar::new(), limit: limit.max(1) }
    }

    /// Blocks until a permit is free
    pub fn acquire(&self) -> GatePermit<'_> {
        let mut n = self.in_use.lock();
        while *n >= self.limit {
            self.cond.wait(&mut n);
        }
        *n += 1;
        GatePermit { gate: self }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.limit - *self.in_use.lock()
    }
}

impl Default for ConnectGate {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_CONCURRENCY)
    }
}

impl core::fmt::Debug for ConnectGate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ConnectGate({}/{})", *self.in_use.lock(), self.limit)
    }
}

/// Released on drop
pub struct GatePermit<'a> {
    gate: &'a ConnectGate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        *self.gate.in_use.lock() -= 1;
        self.gate.cond.notify_one();
    }
}
