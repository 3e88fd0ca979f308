use nix::fcntl::OFlag;
use nix::pty::openpty;
use nix::unistd::pipe2;
use parking_lot::Mutex;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, ExitStatus};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Environment variable advertising the inherited feed descriptor.
pub const FEED_FD_ENV: &str = "LOGCTRL_FEED_FD";
/// The feed is always installed as the first descriptor after stdio.
pub const FEED_FD: RawFd = 3;

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("unable to allocate pseudo-terminal: {0}")]
    Allocate(#[source] nix::Error),
    #[error("unable to create feed pipe: {0}")]
    Pipe(#[source] nix::Error),
    #[error("unable to configure descriptor: {0}")]
    Configure(#[source] io::Error),
    #[error("unable to launch {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to resize pseudo-terminal: {0}")]
    Resize(#[source] io::Error),
    #[error("pseudo-terminal io failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone, Debug)]
pub struct Command {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(OsString, OsString)>,
}

impl Command {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// The running executable with the arguments it was started with.
    pub fn current_exe() -> io::Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program).args(std::env::args_os().skip(1)))
    }

    pub fn arg(mut self, value: impl Into<OsString>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[derive(Clone, Debug)]
pub struct SpawnConfig {
    pub command: Command,
    pub cols: u16,
    pub rows: u16,
}

impl SpawnConfig {
    pub fn new(command: Command, cols: u16, rows: u16) -> Self {
        Self {
            command,
            cols,
            rows,
        }
    }
}

/// Anonymous pipe carrying the log feed to the wrapped child. Both ends are
/// close-on-exec; only the read end is re-installed in the child as fd 3.
pub struct FeedPipe {
    pub read: OwnedFd,
    pub write: File,
}

impl FeedPipe {
    pub fn new() -> Result<Self, PtyError> {
        let (read, write) = pipe2(OFlag::O_CLOEXEC).map_err(PtyError::Pipe)?;
        Ok(Self {
            read,
            write: File::from(write),
        })
    }
}

/// Child process running on the slave side of a pseudo-terminal.
pub struct PtyProcess {
    master: File,
    child: Mutex<Option<Child>>,
    pid: u32,
}

impl PtyProcess {
    /// Launches `config.command` attached to a new pseudo-terminal with
    /// `feed` installed as fd [`FEED_FD`] and advertised through
    /// [`FEED_FD_ENV`].
    pub fn spawn(config: SpawnConfig, feed: OwnedFd) -> Result<(Self, PtyReader, PtyWriter), PtyError> {
        let size = winsize(config.cols, config.rows);
        let pty = openpty(&size, None).map_err(PtyError::Allocate)?;
        set_cloexec(pty.master.as_raw_fd())?;
        set_cloexec(pty.slave.as_raw_fd())?;

        let child = spawn_child(&config.command, &pty.slave, &feed)?;
        let pid = child.id();
        // the child holds its own copies now
        drop(pty.slave);
        drop(feed);

        let master = File::from(pty.master);
        let reader = master.try_clone()?;
        let writer = master.try_clone()?;
        debug!(
            target = "host::pty",
            pid,
            cols = config.cols,
            rows = config.rows,
            program = %config.command.program.display(),
            "child attached to pseudo-terminal"
        );

        let process = Self {
            master,
            child: Mutex::new(Some(child)),
            pid,
        };
        Ok((process, PtyReader::new(reader), PtyWriter::new(writer)))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        let size = winsize(cols, rows);
        // SAFETY: the master descriptor is owned by `self` and `size` outlives the call.
        let rc = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ as _, &size) };
        if rc == -1 {
            return Err(PtyError::Resize(io::Error::last_os_error()));
        }
        trace!(target = "host::pty", cols, rows, "pseudo-terminal resized");
        Ok(())
    }

    /// Dimensions currently applied to the pseudo-terminal as `(cols, rows)`.
    pub fn size(&self) -> Result<(u16, u16), PtyError> {
        let mut size = winsize(0, 0);
        // SAFETY: the master descriptor is owned by `self`; the kernel fills `size`.
        let rc = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCGWINSZ as _, &mut size) };
        if rc == -1 {
            return Err(PtyError::Io(io::Error::last_os_error()));
        }
        Ok((size.ws_col, size.ws_row))
    }

    pub fn try_wait(&self) -> Result<Option<ExitStatus>, PtyError> {
        let mut guard = self.child.lock();
        match guard.as_mut() {
            Some(child) => Ok(child.try_wait()?),
            None => Ok(None),
        }
    }

    /// Blocks until the child exits.
    pub fn wait(&self) -> Result<Option<ExitStatus>, PtyError> {
        let mut guard = self.child.lock();
        match guard.take() {
            Some(mut child) => Ok(Some(child.wait()?)),
            None => Ok(None),
        }
    }

    /// Kills the child if it is still running and reaps it.
    pub fn shutdown(&self) {
        let mut guard = self.child.lock();
        if let Some(mut child) = guard.take() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(target = "host::pty", pid = self.pid, %status, "child already exited");
                }
                _ => {
                    if let Err(err) = child.kill() {
                        warn!(target = "host::pty", pid = self.pid, error = %err, "failed to kill child");
                    }
                    let _ = child.wait();
                }
            }
        }
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Read half of the pseudo-terminal master.
///
/// Linux reports `EIO` on the master once the last slave handle is closed;
/// that is surfaced as end-of-stream.
pub struct PtyReader {
    reader: File,
}

impl PtyReader {
    fn new(reader: File) -> Self {
        Self { reader }
    }
}

impl Read for PtyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.reader.read(buf) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.raw_os_error() == Some(libc::EIO) => return Ok(0),
                other => return other,
            }
        }
    }
}

/// Write half of the pseudo-terminal master, shareable across pumps.
#[derive(Clone)]
pub struct PtyWriter {
    writer: Arc<Mutex<File>>,
}

impl PtyWriter {
    fn new(writer: File) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    /// Writes all of `bytes` and flushes while holding the shared lock.
    pub fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut guard = self.writer.lock();
        guard.write_all(bytes)?;
        guard.flush()
    }
}

fn winsize(cols: u16, rows: u16) -> libc::winsize {
    libc::winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

fn set_cloexec(fd: RawFd) -> Result<(), PtyError> {
    // SAFETY: plain fcntl flag manipulation on a descriptor we own.
    let rc = unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags == -1 {
            -1
        } else {
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC)
        }
    };
    if rc == -1 {
        return Err(PtyError::Configure(io::Error::last_os_error()));
    }
    Ok(())
}

fn spawn_child(command: &Command, slave: &OwnedFd, feed: &OwnedFd) -> Result<Child, PtyError> {
    let slave_fd = slave.as_raw_fd();
    let feed_fd = feed.as_raw_fd();

    let mut cmd = std::process::Command::new(&command.program);
    cmd.args(&command.args);
    for (key, value) in &command.env {
        cmd.env(key, value);
    }
    cmd.env(FEED_FD_ENV, FEED_FD.to_string());

    // SAFETY: runs in the forked child before exec; only async-signal-safe
    // calls (setsid, ioctl, dup2, fcntl) on descriptors captured by value.
    unsafe {
        cmd.pre_exec(move || {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            if libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
            for target in 0..=2 {
                if libc::dup2(slave_fd, target) == -1 {
                    return Err(io::Error::last_os_error());
                }
            }
            if feed_fd == FEED_FD {
                // dup2 onto itself keeps close-on-exec; clear it explicitly
                let flags = libc::fcntl(FEED_FD, libc::F_GETFD);
                if flags == -1 || libc::fcntl(FEED_FD, libc::F_SETFD, flags & !libc::FD_CLOEXEC) == -1 {
                    return Err(io::Error::last_os_error());
                }
            } else if libc::dup2(feed_fd, FEED_FD) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    cmd.spawn().map_err(|source| PtyError::Spawn {
        program: command.program.clone(),
        source,
    })
}
