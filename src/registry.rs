//! Message acceptance by protocol phase.
//!
//! A message is *enabled* when the current phase allows the peer to send
//! it, and *active* when a consumer has subscribed to it. Receiving a
//! message that isn't enabled is a protocol violation.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use crate::packets::{Category, MessageNumber};

/// Connection phases, in the order they are reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Before the version exchange completes, no binary packets
    Version,
    /// Key exchange and service request
    Transport,
    /// User authentication
    Authenticating,
    /// Authenticated, connection protocol messages allowed
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Open(Phase),
    /// Peer's KEXINIT has arrived, only transport and kex messages until
    /// its NEWKEYS.
    Kex { resume: Phase },
}

pub(crate) struct MessageRegistry {
    gate: Gate,
    early_global_request: bool,
    active: [bool; 256],
}

impl MessageRegistry {
    pub fn new(early_global_request: bool) -> Self {
        MessageRegistry { gate: Gate::Open(Phase::Version), early_global_request, active: [false; 256] }
    }

    /// Returns to the initial phase, keeping consumer subscriptions
    pub fn reset(&mut self) {
        self.gate = Gate::Open(Phase::Version);
    }

    pub fn phase(&self) -> Phase {
        match self.gate {
            Gate::Open(p) => p,
            Gate::Kex { resume } => resume,
        }
    }

    pub fn set_phase(&mut self, phase: Phase) {
        match &mut self.gate {
            Gate::Open(p) => *p = phase,
            // applies once the exchange completes
            Gate::Kex { resume } => *resume = phase,
        }
        trace!("registry phase {:?}", self.gate);
    }

    pub fn freeze_for_kex(&mut self) {
        if let Gate::Open(p) = self.gate {
            self.gate = Gate::Kex { resume: p };
        }
    }

    pub fn unfreeze(&mut self) {
        if let Gate::Kex { resume } = self.gate {
            self.gate = Gate::Open(resume);
        }
    }

    /// Whether the peer may send `num` now
    pub fn enabled(&self, num: MessageNumber) -> bool {
        let cat = num.category();
        match self.gate {
            Gate::Open(Phase::Version) => false,
            Gate::Kex { .. } => cat.kex_allowed(),
            Gate::Open(Phase::Transport) => {
                matches!(cat, Category::Transport | Category::Kex | Category::Service)
            }
            Gate::Open(Phase::Authenticating) => match cat {
                Category::Transport | Category::Kex | Category::Service | Category::Auth => true,
                Category::Conn => {
                    self.early_global_request && num == MessageNumber::SSH_MSG_GLOBAL_REQUEST
                }
            },
            Gate::Open(Phase::Connected) => true,
        }
    }

    /// Looks up a received message number, failing if it is unknown or
    /// not acceptable in the current phase.
    pub fn check(&self, num: u8) -> Result<MessageNumber> {
        let m = MessageNumber::try_from(num)?;
        if !self.enabled(m) {
            debug!("{m} not allowed in {:?}", self.gate);
            return Err(Error::MessageNotAllowed { number: num });
        }
        Ok(m)
    }

    pub fn activate(&mut self, num: MessageNumber) {
        self.active[num as usize] = true;
    }

    pub fn deactivate(&mut self, num: MessageNumber) {
        self.active[num as usize] = false;
    }

    /// Whether consumers receive `num`
    pub fn is_active(&self, num: MessageNumber) -> bool {
        self.active[num as usize]
    }
}
