//! Transport over the stdin/stdout pipes of a child process
//!
//! A host-built device binary talks the session protocol on its standard
//! streams. Child stdout is drained by a reader thread into a channel, so
//! reads can be bounded with [`Receiver::recv_timeout`]. On unix the child's
//! stdin is non-blocking and writes poll until their deadline, so a device
//! that stops reading cannot stall the host.
//!
//! With a [`Debugger`] set, the debugger is started instead and runs the
//! binary with its streams on inherited pipes (unix only).

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rmicro_core::error::{Error, Result};
use rmicro_core::transport::{
    BoxedTransport, IoOutcome, Transport, TransportFactory, TransportTimeouts,
};

use crate::debugger::Debugger;

const READ_CHUNK: usize = 4096;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_POLL_INTERVAL: Duration = Duration::from_millis(1);

type Launched = (Child, Box<dyn Write + Send>, Box<dyn Read + Send>);

struct Running {
    child: Child,
    stdin: Box<dyn Write + Send>,
    rx: Receiver<Vec<u8>>,
    reader: JoinHandle<()>,
}

/// Transport to a child process's standard streams
pub struct SubprocessTransport {
    program: PathBuf,
    args: Vec<OsString>,
    debugger: Option<Debugger>,
    running: Option<Running>,
    pending: Vec<u8>,
}

impl SubprocessTransport {
    /// Transport that will run `program` when opened
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            debugger: None,
            running: None,
            pending: Vec::new(),
        }
    }

    /// Append command-line arguments for the child
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the program under `debugger`
    pub fn debugger(mut self, debugger: Option<Debugger>) -> Self {
        self.debugger = debugger;
        self
    }

    /// Program run by this transport
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Pid of the running child
    pub fn pid(&self) -> Option<u32> {
        self.running.as_ref().map(|r| r.child.id())
    }

    fn running(&mut self) -> Result<&mut Running> {
        self.running
            .as_mut()
            .ok_or_else(|| Error::Transport("subprocess is not running".into()))
    }

    fn launch_piped(&self) -> Result<Launched> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                Error::Transport(format!("failed to start {}: {}", self.program.display(), e))
            })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Transport("subprocess pipes unavailable".into()));
            }
        };
        if let Err(e) = set_nonblocking(&stdin) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Transport(format!("cannot configure subprocess input: {}", e)));
        }
        Ok((child, Box::new(stdin), Box::new(stdout)))
    }

    #[cfg(unix)]
    fn launch_debugged(&self, debugger: Debugger) -> Result<Launched> {
        use std::fs::File;

        let failed = |e: io::Error| {
            Error::Transport(format!("failed to start {}: {}", debugger.program(), e))
        };
        let input = InheritedPipe::new(Direction::ToChild).map_err(failed)?;
        let output = InheritedPipe::new(Direction::FromChild).map_err(failed)?;
        let launch = debugger.launch_args(
            &self.program,
            &self.args,
            &input.child_path(),
            &output.child_path(),
        );
        // The debugger keeps the terminal on its own standard streams
        let mut child = Command::new(debugger.program())
            .args(&launch)
            .spawn()
            .map_err(failed)?;

        let stdin = File::from(input.parent);
        let stdout = File::from(output.parent);
        if let Err(e) = set_nonblocking(&stdin) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Transport(format!("cannot configure subprocess input: {}", e)));
        }
        Ok((child, Box::new(stdin), Box::new(stdout)))
    }

    #[cfg(not(unix))]
    fn launch_debugged(&self, debugger: Debugger) -> Result<Launched> {
        Err(Error::Transport(format!(
            "running under {} requires a unix host",
            debugger
        )))
    }
}

#[cfg(unix)]
enum Direction {
    ToChild,
    FromChild,
}

/// Pipe whose child end survives exec and whose parent end does not
#[cfg(unix)]
struct InheritedPipe {
    parent: std::os::fd::OwnedFd,
    child: std::os::fd::OwnedFd,
}

#[cfg(unix)]
impl InheritedPipe {
    fn new(direction: Direction) -> io::Result<Self> {
        use nix::fcntl::{fcntl, FcntlArg, FdFlag};
        use std::os::unix::io::AsRawFd;

        let (read, write) = nix::unistd::pipe()?;
        let (parent, child) = match direction {
            Direction::ToChild => (write, read),
            Direction::FromChild => (read, write),
        };
        fcntl(parent.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
        fcntl(child.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::empty()))?;
        Ok(Self { parent, child })
    }

    fn child_path(&self) -> PathBuf {
        use std::os::unix::io::AsRawFd;

        PathBuf::from(format!("/dev/fd/{}", self.child.as_raw_fd()))
    }
}

#[cfg(unix)]
fn set_nonblocking(stdin: &impl std::os::unix::io::AsRawFd) -> io::Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};

    let fd = stdin.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_nonblocking<T>(_stdin: &T) -> io::Result<()> {
    Ok(())
}

fn spawn_reader(mut stdout: impl Read + Send + 'static) -> (Receiver<Vec<u8>>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match stdout.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("Subprocess: stdout read failed: {}", e);
                    break;
                }
            }
        }
    });
    (rx, handle)
}

impl Transport for SubprocessTransport {
    fn open(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(Error::Transport("subprocess is already running".into()));
        }
        let (child, stdin, stdout) = match self.debugger {
            Some(debugger) => {
                log::info!(
                    "Subprocess: starting {} under {}",
                    self.program.display(),
                    debugger
                );
                self.launch_debugged(debugger)?
            }
            None => {
                log::debug!("Subprocess: starting {}", self.program.display());
                self.launch_piped()?
            }
        };
        let (rx, reader) = spawn_reader(stdout);
        self.pending.clear();
        self.running = Some(Running {
            child,
            stdin,
            rx,
            reader,
        });
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(Running {
            mut child,
            stdin,
            rx,
            reader,
        }) = self.running.take()
        else {
            return Ok(());
        };
        // EOF on stdin lets a well-behaved device exit on its own
        drop(stdin);
        drop(rx);
        if child.try_wait()?.is_none() {
            if let Err(e) = child.kill() {
                log::debug!("Subprocess: kill failed: {}", e);
            }
        }
        let status = child.wait()?;
        log::debug!("Subprocess: {} exited with {}", self.program.display(), status);
        if reader.join().is_err() {
            log::warn!("Subprocess: reader thread panicked");
        }
        Ok(())
    }

    fn read(&mut self, max: usize, timeout: Option<Duration>) -> Result<IoOutcome<Vec<u8>>> {
        if self.pending.is_empty() {
            let running = self.running()?;
            match running.rx.recv_timeout(timeout.unwrap_or(DEFAULT_TIMEOUT)) {
                Ok(chunk) => self.pending = chunk,
                Err(RecvTimeoutError::Timeout) => return Ok(IoOutcome::TimedOut),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Transport("subprocess closed its output".into()))
                }
            }
        } else {
            self.running()?;
        }

        let n = max.min(self.pending.len());
        let rest = self.pending.split_off(n);
        Ok(IoOutcome::Delivered(std::mem::replace(&mut self.pending, rest)))
    }

    fn write(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<IoOutcome<usize>> {
        let running = self.running()?;
        if data.is_empty() {
            return Ok(IoOutcome::Delivered(0));
        }
        let deadline = Instant::now().checked_add(timeout.unwrap_or(DEFAULT_TIMEOUT));

        let mut written = 0;
        while written < data.len() {
            match running.stdin.write(&data[written..]) {
                Ok(0) => return Err(Error::Transport("subprocess closed its input".into())),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        break;
                    }
                    thread::sleep(WRITE_POLL_INTERVAL);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    return Err(Error::Transport("subprocess closed its input".into()))
                }
                Err(e) => return Err(e.into()),
            }
        }

        if written == 0 {
            log::trace!("Subprocess: write timed out, child is not reading");
            Ok(IoOutcome::TimedOut)
        } else {
            Ok(IoOutcome::Delivered(written))
        }
    }

    fn timeouts(&self) -> TransportTimeouts {
        TransportTimeouts::for_flow_control(true)
    }
}

impl Drop for SubprocessTransport {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Subprocess: failed to stop {}: {}", self.program.display(), e);
        }
    }
}

/// Creates a fresh [`SubprocessTransport`] for every connection
#[derive(Debug, Clone)]
pub struct SubprocessFactory {
    program: PathBuf,
    args: Vec<OsString>,
    debugger: Option<Debugger>,
}

impl SubprocessFactory {
    /// Factory running `program` with `args`
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
            debugger: None,
        }
    }

    /// Run every created transport's program under `debugger`
    pub fn debugger(mut self, debugger: Option<Debugger>) -> Self {
        self.debugger = debugger;
        self
    }
}

impl TransportFactory for SubprocessFactory {
    fn create(&mut self) -> Result<BoxedTransport> {
        Ok(Box::new(
            SubprocessTransport::new(self.program.clone())
                .args(self.args.clone())
                .debugger(self.debugger),
        ))
    }

    fn describe(&self) -> String {
        match self.debugger {
            Some(debugger) => format!("subprocess {} under {}", self.program.display(), debugger),
            None => format!("subprocess {}", self.program.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_exactly(transport: &mut SubprocessTransport, len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        while out.len() < len {
            match transport
                .read(len - out.len(), Some(Duration::from_secs(5)))
                .unwrap()
            {
                IoOutcome::Delivered(bytes) => out.extend(bytes),
                IoOutcome::TimedOut => panic!("timed out after {} bytes", out.len()),
            }
        }
        out
    }

    #[test]
    fn test_cat_echoes_bytes() {
        let mut transport = SubprocessTransport::new("cat");
        transport.open().unwrap();
        assert!(transport.pid().is_some());
        let data = [0xFFu8, 0xFD, 0x00, 0x42, b'\n'];
        assert_eq!(
            transport.write(&data, None).unwrap(),
            IoOutcome::Delivered(data.len())
        );
        assert_eq!(read_exactly(&mut transport, data.len()), data);
        transport.close().unwrap();
        assert!(transport.pid().is_none());
    }

    #[test]
    fn test_read_respects_max() {
        let mut transport = SubprocessTransport::new("cat");
        transport.open().unwrap();
        transport.write(b"abcdef", None).unwrap();
        let first = read_exactly(&mut transport, 2);
        let rest = read_exactly(&mut transport, 4);
        assert_eq!(first, b"ab");
        assert_eq!(rest, b"cdef");
    }

    #[test]
    fn test_read_times_out() {
        let mut transport = SubprocessTransport::new("cat");
        transport.open().unwrap();
        assert!(transport
            .read(16, Some(Duration::from_millis(20)))
            .unwrap()
            .is_timed_out());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_to_stalled_child_is_bounded() {
        let mut transport = SubprocessTransport::new("sleep").args(["3"]);
        transport.open().unwrap();
        let data = vec![0x42u8; 4 * 1024 * 1024];

        let started = std::time::Instant::now();
        let outcome = transport
            .write(&data, Some(Duration::from_millis(100)))
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!matches!(outcome, IoOutcome::Delivered(n) if n == data.len()));

        // The pipe is full now, so a second write delivers nothing
        assert!(transport
            .write(&data, Some(Duration::from_millis(20)))
            .unwrap()
            .is_timed_out());
        transport.close().unwrap();
    }

    #[test]
    fn test_exited_child_is_an_error() {
        let mut transport = SubprocessTransport::new("true");
        transport.open().unwrap();
        assert!(transport.read(16, Some(Duration::from_secs(5))).is_err());
    }

    #[test]
    fn test_missing_program() {
        let mut transport = SubprocessTransport::new("/nonexistent/rmicro-device");
        assert!(matches!(transport.open(), Err(Error::Transport(_))));
        assert!(transport.write(b"x", None).is_err());
        transport.close().unwrap();
    }

    #[test]
    fn test_factory_describe() {
        let factory = SubprocessFactory::new("/tmp/dev", vec![]);
        assert_eq!(factory.describe(), "subprocess /tmp/dev");
        let factory = factory.debugger(Some(Debugger::Gdb));
        assert_eq!(factory.describe(), "subprocess /tmp/dev under gdb");
    }

    #[cfg(unix)]
    #[test]
    fn test_inherited_pipe_flags() {
        use nix::fcntl::{fcntl, FcntlArg, FdFlag};
        use std::os::unix::io::AsRawFd;

        let pipe = InheritedPipe::new(Direction::ToChild).unwrap();
        let parent = FdFlag::from_bits_truncate(
            fcntl(pipe.parent.as_raw_fd(), FcntlArg::F_GETFD).unwrap(),
        );
        let child = FdFlag::from_bits_truncate(
            fcntl(pipe.child.as_raw_fd(), FcntlArg::F_GETFD).unwrap(),
        );
        assert!(parent.contains(FdFlag::FD_CLOEXEC));
        assert!(!child.contains(FdFlag::FD_CLOEXEC));
        assert_eq!(
            pipe.child_path(),
            PathBuf::from(format!("/dev/fd/{}", pipe.child.as_raw_fd()))
        );
    }
}
