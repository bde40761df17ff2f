#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use anyhow::{bail, Context, Result};
use argh::FromArgs;

use std::sync::Arc;
use std::time::Duration;

use zeroize::Zeroizing;

use dusk::packets::{MethodPassword, UserauthRequest};
use dusk::sshnames::{SSH_AUTHMETHOD_PASSWORD, SSH_SERVICE_CONNECTION};
use dusk::sshwire::{to_vec, Rest};
use dusk::*;

#[derive(argh::FromArgs, Debug)]
/** Dusk SSH transport demo.
Connects, authenticates with a password and prints what was negotiated.
 */
struct Args {
    #[argh(switch, short = 'v')]
    /// verbose debug logging
    debug: bool,

    #[argh(switch)]
    /// more verbose
    trace: bool,

    #[argh(option, short = 'l')]
    /// username
    username: Option<String>,

    #[argh(positional)]
    /// host
    host: String,

    #[argh(option, short = 'p', default = "22")]
    /// port
    port: u16,

    #[argh(switch)]
    /// run a second key exchange before disconnecting
    rekey: bool,

    #[argh(option, default = "10")]
    /// timeout for each step, in seconds
    timeout: u64,
}

/// Prompts for a password on the terminal
struct PasswordAuth {
    prompt: String,
}

impl Authenticator for PasswordAuth {
    fn authenticate(&self, session: &SessionHandle, username: &str) -> dusk::Result<()> {
        for _ in 0..3 {
            let pw = match rpassword::prompt_password(&self.prompt) {
                Ok(pw) => Zeroizing::new(pw),
                Err(e) => {
                    warn!("Reading password failed: {e}");
                    return Err(Error::AuthFailed);
                }
            };
            let method = to_vec(&MethodPassword { change: false, password: pw.as_str().into() })?;
            let method = Zeroizing::new(method);
            session.send(
                &UserauthRequest {
                    username: username.into(),
                    service: SSH_SERVICE_CONNECTION,
                    method: SSH_AUTHMETHOD_PASSWORD,
                    rest: Rest(method.as_slice()),
                }
                .into(),
            )?;

            match session.userauth_reply(session.connection_info().timeout)? {
                AuthReply::Success => return Ok(()),
                AuthReply::Failure { methods, .. } => {
                    if !methods.iter().any(|m| m == SSH_AUTHMETHOD_PASSWORD) {
                        warn!("Server doesn't accept passwords, it allows {methods:?}");
                        break;
                    }
                    println!("Permission denied, please try again.");
                }
            }
        }
        Err(Error::AuthFailed)
    }
}

fn parse_args() -> Result<Args> {
    let mut args: Args = argh::from_env();

    if args.username.is_none() {
        // user@host syntax. rsplit for usernames with @ in them
        if let Some((user, host)) = args.host.rsplit_once('@') {
            args.username = Some(user.into());
            args.host = host.into();
        }
    }
    if args.username.is_none() {
        bail!("No username given, use -l or user@host");
    }
    Ok(args)
}

fn setup_log(args: &Args) {
    let level = if args.trace {
        log::LevelFilter::Trace
    } else if args.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Warn)
        .filter_module("dusk", level)
        .filter_module("dusk_demo_std", level)
        .parse_default_env()
        .init();
}

fn run(args: Args) -> Result<()> {
    let username = args.username.clone().unwrap_or_default();

    let mut info = ConnectionInfo::new(&args.host, args.port, &username);
    info.timeout = Duration::from_secs(args.timeout);
    info.connect_timeout = Duration::from_secs(args.timeout);
    info.retry_attempts = 2;

    let auth = Arc::new(PasswordAuth { prompt: format!("{username}@{}'s password: ", args.host) });
    let gate = Arc::new(ConnectGate::default());
    let sess = Session::new(info, auth, gate);

    sess.on_host_key(Arc::new(|k: &HostKeyInfo| {
        info!("Server host key {k:?}");
    }));
    sess.on_error(Arc::new(|e: &Error| {
        error!("Session failed: {e}");
    }));
    sess.on_disconnect(Arc::new(|| {
        debug!("Receive loop finished");
    }));

    sess.connect().with_context(|| format!("connecting to {}:{}", args.host, args.port))?;

    if let Some(v) = sess.server_version() {
        println!("Server: {}", v.line);
    }
    println!("Client: {}", sess.client_version());
    if let Some(k) = sess.host_key() {
        println!("Host key: {} {}", k.algorithm, k.fingerprint());
    }
    if let Some(a) = sess.algorithms() {
        println!("{a}");
    }

    if args.rekey {
        let seq = sess.outbound_sequence();
        sess.rekey().context("rekeying")?;
        println!("Rekeyed, outbound sequence {seq} -> {}", sess.outbound_sequence());
    }

    sess.send_ignore()?;
    sess.disconnect();
    println!("Disconnected");
    Ok(())
}

fn main() {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1)
        }
    };
    setup_log(&args);
    trace!("args {args:?}");

    if let Err(e) = run(args) {
        error!("Exit with error: {e:#}");
        std::process::exit(1)
    }
}
