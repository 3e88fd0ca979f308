use nix::sys::termios::{self, SetArg, Termios};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

pub const TTY_PATH: &str = "/dev/tty";

#[derive(Debug, Error)]
pub enum TtyError {
    #[error("unable to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to read terminal attributes: {0}")]
    GetAttr(#[source] nix::Error),
    #[error("unable to apply terminal attributes: {0}")]
    SetAttr(#[source] nix::Error),
    #[error("unable to clone terminal handle: {0}")]
    Clone(#[source] io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtyMode {
    Raw,
    Restored,
}

/// Raw-mode ownership of the controlling terminal.
///
/// The attributes captured at acquisition are re-applied exactly once, either
/// through [`TerminalSession::restore`] or on drop. Re-asserting raw mode and
/// restoring are serialised, so a restore is never undone by a late
/// re-assert.
pub struct TerminalSession {
    device: File,
    state: Mutex<LineState>,
}

/// `Termios` is not `Sync`, so both attribute sets live under the lock.
struct LineState {
    mode: TtyMode,
    saved: Termios,
    raw: Termios,
}

impl TerminalSession {
    /// Opens `/dev/tty` and switches it to raw mode.
    pub fn acquire() -> Result<Self, TtyError> {
        Self::acquire_path(Path::new(TTY_PATH))
    }

    pub fn acquire_path(path: &Path) -> Result<Self, TtyError> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| TtyError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_device(device)
    }

    pub fn from_device(device: File) -> Result<Self, TtyError> {
        let saved = termios::tcgetattr(&device).map_err(TtyError::GetAttr)?;
        let mut raw = saved.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(&device, SetArg::TCSANOW, &raw).map_err(TtyError::SetAttr)?;
        debug!(target = "session::tty", "terminal switched to raw mode");
        Ok(Self {
            device,
            state: Mutex::new(LineState {
                mode: TtyMode::Raw,
                saved,
                raw,
            }),
        })
    }

    /// Independent read handle on the terminal for keyboard forwarding.
    pub fn keyboard(&self) -> Result<File, TtyError> {
        self.device.try_clone().map_err(TtyError::Clone)
    }

    pub fn mode(&self) -> TtyMode {
        self.state.lock().mode
    }

    /// Re-applies raw attributes after something else reset the line
    /// discipline. Returns `false` when the session was already restored.
    pub fn reassert_raw(&self) -> Result<bool, TtyError> {
        let state = self.state.lock();
        if state.mode == TtyMode::Restored {
            trace!(target = "session::tty", "raw re-assert skipped; session restored");
            return Ok(false);
        }
        termios::tcsetattr(&self.device, SetArg::TCSANOW, &state.raw).map_err(TtyError::SetAttr)?;
        trace!(target = "session::tty", "raw mode re-asserted");
        Ok(true)
    }

    /// Puts the terminal back the way it was found. Idempotent.
    pub fn restore(&self) -> Result<(), TtyError> {
        let mut state = self.state.lock();
        if state.mode == TtyMode::Restored {
            return Ok(());
        }
        termios::tcsetattr(&self.device, SetArg::TCSANOW, &state.saved)
            .map_err(TtyError::SetAttr)?;
        state.mode = TtyMode::Restored;
        debug!(target = "session::tty", "terminal attributes restored");
        Ok(())
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}
