//! User authentication boundary.
//!
//! Authentication methods live outside the engine. An [`Authenticator`]
//! sends `SSH_MSG_USERAUTH_REQUEST` messages through the session and
//! reads the server's answers with
//! [`SessionHandle::userauth_reply`](crate::SessionHandle::userauth_reply).

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use crate::packets::UserauthFailure;
use crate::session::SessionHandle;

/// Performs user authentication during [`Session::connect`](crate::Session::connect).
///
/// Called on the connecting thread once `ssh-userauth` has been accepted.
/// Returns once the server has sent `SSH_MSG_USERAUTH_SUCCESS`, or with
/// an error such as [`Error::AuthFailed`].
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, session: &SessionHandle, username: &str) -> Result<()>;
}

/// The server's answer to a `SSH_MSG_USERAUTH_REQUEST`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthReply {
    Success,
    Failure {
        /// Methods that can continue
        methods: Vec<String>,
        partial: bool,
    },
}

impl AuthReply {
    pub(crate) fn failure(p: &UserauthFailure) -> Self {
        let methods = p.methods.names().into_iter().map(String::from).collect();
        AuthReply::Failure { methods, partial: p.partial }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AuthReply::Success)
    }
}
