//! Version exchange, [RFC4253](https://tools.ietf.org/html/rfc4253) section 4.2

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use std::io::{BufRead, Write};

const SSH_PREFIX: &[u8] = b"SSH-";

/// Protocol versions we can talk to. `1.99` is a server that also speaks
/// SSH1, it is treated as `2.0`.
const SUPPORTED_PROTOCOLS: [&str; 2] = ["2.0", "1.99"];

// RFC4253 4.2 says max length 255 incl CR LF.
const MAX_REMOTE_VERSION_LEN: usize = 253;
const MAX_LINES: usize = 50;

pub const CR: u8 = 0x0d;
pub const LF: u8 = 0x0a;

/// Parses and stores the remote SSH version string
pub struct RemoteVersion {
    storage: Vec<u8>,
    /// Parse state
    st: VersPars,
    num_lines: usize,
}

/// Version parsing state.
/// We need to match
/// `SSH-protoversion-softwareversion SP comments CR LF`
/// at the start of a line. The server may first send other lines
/// which are discarded.
#[derive(Debug)]
enum VersPars {
    /// Reading start of a line, before receiving a full SSH- prefix
    Start,
    /// Have a line that didn't start with SSH-, discarding until LF
    Discarding,
    /// Currently reading a SSH- string, waiting for ending CR
    FillSSH,
    /// Have ending CR after a version, Waiting for ending LF
    HaveCR,
    /// Completed string.
    Done,
}

/// The identification line sent by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVersion {
    /// Full line without the trailing CR LF
    pub line: String,
    pub protocol: String,
    pub software: String,
}

impl RemoteVersion {
    pub fn new() -> Self {
        RemoteVersion { storage: Vec::new(), st: VersPars::Start, num_lines: 0 }
    }

    /// Returns the parsed version line if complete
    pub fn version(&self) -> Option<&[u8]> {
        match self.st {
            VersPars::Done => Some(&self.storage),
            _ => None,
        }
    }

    /// Reads the initial SSH stream to find the version string and returns
    /// the number of bytes consumed.
    /// Behaviour is undefined if called later after an error.
    pub fn consume(&mut self, buf: &[u8]) -> Result<usize> {
        // consume input byte by byte, feeding through the states
        let mut taken = 0;
        for &b in buf {
            if matches!(self.st, VersPars::Done) {
                break;
            }
            taken += 1;

            match self.st {
                VersPars::Start => {
                    self.storage.push(b);
                    let pos = self.storage.len();
                    if self.storage == SSH_PREFIX {
                        self.st = VersPars::FillSSH
                    } else if SSH_PREFIX[..pos] != self.storage[..] {
                        self.storage.clear();
                        self.st = VersPars::Discarding;
                        if b == LF {
                            self.line_done()?;
                        }
                    }
                }

                VersPars::Discarding => {
                    if b == LF {
                        self.line_done()?;
                    }
                }

                VersPars::FillSSH => match b {
                    CR => self.st = VersPars::HaveCR,
                    // some servers omit the CR
                    LF => self.st = VersPars::Done,
                    _ => {
                        if self.storage.len() >= MAX_REMOTE_VERSION_LEN {
                            return Err(Error::NoRoom);
                        }
                        self.storage.push(b);
                    }
                },

                VersPars::HaveCR => {
                    match b {
                        LF => self.st = VersPars::Done,
                        _ => return Err(Error::msg("bad remote version")),
                    };
                }

                VersPars::Done => (),
            }
        }
        // Ran out of input
        Ok(taken)
    }

    fn line_done(&mut self) -> Result<()> {
        self.st = VersPars::Start;
        self.num_lines += 1;
        if self.num_lines > MAX_LINES {
            return Err(Error::NotSSH);
        }
        Ok(())
    }

    /// Splits a completed line and checks the protocol version.
    pub fn server_version(&self) -> Result<ServerVersion> {
        let line = self.version().ok_or(Error::NotSSH)?;
        if !line.is_ascii() {
            return Err(Error::msg("bad remote version"));
        }
        let line = core::str::from_utf8(line)?;
        let rest = line.strip_prefix("SSH-").ok_or(Error::NotSSH)?;
        let (protocol, software) = rest.split_once('-').ok_or(Error::NotSSH)?;
        if !SUPPORTED_PROTOCOLS.contains(&protocol) {
            return Err(Error::VersionNotSupported { version: protocol.into() });
        }
        let software = software.split(' ').next().unwrap_or("");
        Ok(ServerVersion {
            line: line.into(),
            protocol: protocol.into(),
            software: software.into(),
        })
    }
}

impl Default for RemoteVersion {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes our identification line, `ours` excludes CR LF.
pub fn send_version(w: &mut impl Write, ours: &str) -> Result<()> {
    w.write_all(ours.as_bytes())?;
    w.write_all(&[CR, LF])?;
    w.flush()?;
    Ok(())
}

/// Reads from `r` until a version line is complete. Bytes following
/// the line are left buffered in `r`.
pub fn read_version(r: &mut impl BufRead) -> Result<ServerVersion> {
    let mut rv = RemoteVersion::new();
    loop {
        let buf = r.fill_buf()?;
        if buf.is_empty() {
            return Err(Error::ConnectionLost { msg: "closed during version exchange" });
        }
        let taken = rv.consume(buf)?;
        r.consume(taken);
        if rv.version().is_some() {
            break;
        }
    }
    let v = rv.server_version()?;
    debug!("Server version {:?}", v.line);
    Ok(v)
}
