//! Connect command: open a session and exchange messages

use std::path::PathBuf;
use std::time::Duration;

use rmicro_core::session::registry;
use rmicro_core::{IoOutcome, Session, SessionRegistry};

/// What the session runs over
#[derive(Debug, Clone)]
pub enum Target {
    /// A transport specification (`name:key=value,...`)
    Transport(String),
    /// A host binary to flash and run
    Binary {
        /// Path to the binary
        path: PathBuf,
        /// Arguments for the binary
        args: Vec<String>,
        /// Debugger to run the binary under
        debugger: Option<String>,
    },
}

/// Open a session, send each message and print each reply
pub fn cmd_connect(
    target: &Target,
    name: &str,
    messages: &[String],
    reply_timeout: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let replies = run(target, name, messages, reply_timeout, registry::global())?;
    for (sent, reply) in messages.iter().zip(&replies) {
        match reply {
            Some(reply) => println!("{} -> {}", sent, String::from_utf8_lossy(reply)),
            None => println!("{} -> (no reply)", sent),
        }
    }
    Ok(())
}

fn open(target: &Target, name: &str, registry: &SessionRegistry) -> rmicro_core::Result<Session> {
    match target {
        Target::Transport(spec) => rmicro_connect::open_session(name, spec, registry),
        #[cfg(feature = "emulator")]
        Target::Binary {
            path,
            args,
            debugger,
        } => rmicro_connect::open_host_session(
            name,
            rmicro_core::session::MicroBinary::new(path),
            args,
            debugger.as_deref(),
            registry,
        ),
        #[cfg(not(feature = "emulator"))]
        Target::Binary { .. } => Err(rmicro_core::Error::Config(
            "host binaries require the emulator feature".into(),
        )),
    }
}

fn reply_duration(secs: f64) -> Result<Duration, Box<dyn std::error::Error>> {
    if !secs.is_finite() || !(0.0..=86400.0).contains(&secs) {
        return Err(format!("Invalid reply timeout: {}", secs).into());
    }
    Ok(Duration::from_secs_f64(secs))
}

fn run(
    target: &Target,
    name: &str,
    messages: &[String],
    reply_timeout: f64,
    registry: &SessionRegistry,
) -> Result<Vec<Option<Vec<u8>>>, Box<dyn std::error::Error>> {
    let timeout = reply_duration(reply_timeout)?;
    let mut session = open(target, name, registry)?;

    let session_id = session.enter()?.session_id();
    let system_library = session.system_library()?;
    println!(
        "Session {} established (id {:#06x}, system library {})",
        session.name(),
        session_id,
        system_library.name
    );

    let mut replies = Vec::with_capacity(messages.len());
    let result = (|| -> rmicro_core::Result<()> {
        let mut channel = session.channel()?;
        for message in messages {
            if channel.send_message(message.as_bytes(), timeout)?.is_timed_out() {
                log::warn!("Timed out sending {:?}", message);
                replies.push(None);
                continue;
            }
            replies.push(match channel.receive_message(timeout)? {
                IoOutcome::Delivered(body) => Some(body),
                IoOutcome::TimedOut => None,
            });
        }
        Ok(())
    })();

    let closed = session.exit();
    result?;
    closed?;
    Ok(replies)
}
