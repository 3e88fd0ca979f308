use crate::server::pty::{Command, FEED_FD_ENV};
use crate::session::tty::TTY_PATH;
use crate::terminal::error::HostError;
use clap::ValueEnum;
use std::env;
use std::ffi::OsStr;
use std::os::fd::RawFd;
use std::path::PathBuf;

/// Which half of the wrapper this process is.
///
/// The parent owns the real terminal and hosts the pseudo-terminal; the
/// child was re-executed inside it and renders the log view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchRole {
    Parent,
    Child { feed_fd: RawFd },
}

impl LaunchRole {
    pub fn resolve() -> Result<Self, HostError> {
        Self::from_value(env::var_os(FEED_FD_ENV).as_deref())
    }

    pub fn from_value(value: Option<&OsStr>) -> Result<Self, HostError> {
        let Some(raw) = value else {
            return Ok(LaunchRole::Parent);
        };
        if raw.is_empty() {
            return Ok(LaunchRole::Parent);
        }
        let invalid = || HostError::InvalidFeedDescriptor {
            var: FEED_FD_ENV,
            value: raw.to_string_lossy().into_owned(),
        };
        let text = raw.to_str().ok_or_else(invalid)?;
        let feed_fd: RawFd = text.trim().parse().map_err(|_| invalid())?;
        if feed_fd < 0 {
            return Err(invalid());
        }
        Ok(LaunchRole::Child { feed_fd })
    }

    pub fn is_child(self) -> bool {
        matches!(self, LaunchRole::Child { .. })
    }
}

/// What to do when the pseudo-terminal rejects a new window size.
#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum ResizeFailure {
    /// Log the failure and keep the session running.
    #[default]
    Warn,
    /// Shut the session down.
    Fatal,
}

#[derive(Clone, Debug)]
pub struct HostConfig {
    pub command: Command,
    pub tty_path: PathBuf,
    pub resize_failure: ResizeFailure,
}

impl HostConfig {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            tty_path: PathBuf::from(TTY_PATH),
            resize_failure: ResizeFailure::default(),
        }
    }

    pub fn with_resize_failure(mut self, policy: ResizeFailure) -> Self {
        self.resize_failure = policy;
        self
    }

    pub fn with_tty_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tty_path = path.into();
        self
    }
}
