use crate::server::lifecycle::TransitionError;
use crate::server::pty::PtyError;
use crate::session::TtyError;
use crate::stream::StreamError;
use crate::telemetry::logging::InitError;
use std::io;
use std::os::fd::RawFd;
use thiserror::Error;

/// Fatal failures, each prefixed with the step that failed.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("pipe: {0}")]
    Pipe(#[source] PtyError),
    #[error("terminal device: {0}")]
    TerminalDevice(#[source] TtyError),
    #[error("raw mode: {0}")]
    RawMode(#[source] TtyError),
    #[error("pty allocation: {0}")]
    PtyAllocation(#[source] PtyError),
    #[error("spawn: {0}")]
    Spawn(#[source] PtyError),
    #[error("resize: {0}")]
    Resize(#[source] PtyError),
    #[error("feed descriptor: invalid {var} value {value:?}")]
    InvalidFeedDescriptor { var: &'static str, value: String },
    #[error("feed descriptor: fd {fd} is not open: {source}")]
    FeedDescriptor {
        fd: RawFd,
        #[source]
        source: io::Error,
    },
    #[error("stream: {0}")]
    Stream(#[from] StreamError),
    #[error("logging: {0}")]
    Logging(#[from] InitError),
    #[error("signals: {0}")]
    Signals(#[source] io::Error),
    #[error("lifecycle: {0}")]
    Lifecycle(#[from] TransitionError),
    #[error("viewer: {0:#}")]
    Viewer(anyhow::Error),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl From<TtyError> for HostError {
    fn from(err: TtyError) -> Self {
        match err {
            TtyError::Open { .. } | TtyError::Clone(_) => HostError::TerminalDevice(err),
            TtyError::GetAttr(_) | TtyError::SetAttr(_) => HostError::RawMode(err),
        }
    }
}

impl From<PtyError> for HostError {
    fn from(err: PtyError) -> Self {
        match err {
            PtyError::Pipe(_) => HostError::Pipe(err),
            PtyError::Allocate(_) | PtyError::Configure(_) => HostError::PtyAllocation(err),
            PtyError::Spawn { .. } => HostError::Spawn(err),
            PtyError::Resize(_) => HostError::Resize(err),
            PtyError::Io(source) => HostError::Io(source),
        }
    }
}
