#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

pub fn fill_random(buf: &mut [u8]) -> Result<(), Error> {
    getrandom::getrandom(buf).map_err(|_| Error::msg("RNG failed"))
}

/// A fresh 16 byte `SSH_MSG_KEXINIT` cookie
pub(crate) fn kex_cookie() -> Result<[u8; 16]> {
    let mut c = [0u8; 16];
    fill_random(&mut c)?;
    Ok(c)
}
