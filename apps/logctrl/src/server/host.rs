use crate::server::lifecycle::{HostState, Lifecycle};
use crate::server::pty::{FeedPipe, PtyError, PtyProcess, PtyReader, PtyWriter, SpawnConfig};
use crate::server::pumps::{pump_screen, spawn_feed_pump, spawn_keyboard_pump};
use crate::session::TerminalSession;
use crate::terminal::config::{HostConfig, ResizeFailure};
use crate::terminal::error::HostError;
use crossterm::terminal::size as terminal_size;
use nix::sys::signal::{Signal as UnixSignal, killpg};
use nix::unistd::getpgrp;
use std::fs::File;
use std::io::{self, Read, Write};
use std::sync::Arc;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Producer input and screen output for the parent. Real runs use the
/// process's own stdin and stdout.
pub struct HostIo {
    pub producer: Box<dyn Read + Send>,
    pub output: Box<dyn Write + Send>,
}

impl HostIo {
    pub fn new<R, W>(producer: R, output: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self {
            producer: Box::new(producer),
            output: Box::new(output),
        }
    }

    pub fn stdio() -> Self {
        Self::new(io::stdin(), io::stdout())
    }
}

/// Terminates everything sharing the wrapper's process group, including
/// the producer on the left of the pipe.
pub trait GroupSignal: Send + Sync {
    fn terminate_group(&self) -> io::Result<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessGroup;

impl GroupSignal for ProcessGroup {
    fn terminate_group(&self) -> io::Result<()> {
        killpg(getpgrp(), UnixSignal::SIGTERM).map_err(io::Error::from)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownReason {
    ChildExited,
    OutputClosed,
    Interrupted,
    Terminated,
    HungUp,
}

struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
    window: Signal,
}

impl ShutdownSignals {
    fn install() -> Result<Self, HostError> {
        let listen = |kind| signal(kind).map_err(HostError::Signals);
        Ok(Self {
            interrupt: listen(SignalKind::interrupt())?,
            terminate: listen(SignalKind::terminate())?,
            hangup: listen(SignalKind::hangup())?,
            window: listen(SignalKind::window_change())?,
        })
    }
}

struct Attached {
    session: Arc<TerminalSession>,
    process: Arc<PtyProcess>,
    reader: PtyReader,
    writer: PtyWriter,
    feed: File,
    keyboard: File,
    signals: ShutdownSignals,
}

pub async fn run(config: HostConfig, io: HostIo) -> Result<ShutdownReason, HostError> {
    Host::new(config, ProcessGroup).run(io).await
}

pub struct Host<G: GroupSignal> {
    config: HostConfig,
    group: G,
    lifecycle: Lifecycle,
}

impl<G: GroupSignal> Host<G> {
    pub fn new(config: HostConfig, group: G) -> Self {
        Self {
            config,
            group,
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn state(&self) -> HostState {
        self.lifecycle.state()
    }

    /// Runs the wrapper until the child exits or a shutdown signal arrives.
    ///
    /// Setup failures return immediately; the terminal is restored and the
    /// child reaped as their owners drop. Once pumping has started every
    /// exit path goes through the same teardown.
    pub async fn run(mut self, io: HostIo) -> Result<ShutdownReason, HostError> {
        self.lifecycle.advance(HostState::StreamingSetup)?;
        let attached = match self.setup() {
            Ok(attached) => attached,
            Err(err) => {
                self.lifecycle.advance(HostState::ShuttingDown)?;
                return Err(err);
            }
        };

        let session = attached.session.clone();
        let process = attached.process.clone();
        self.lifecycle.advance(HostState::PumpingActive)?;
        let outcome = self.pump(attached, io).await;

        self.lifecycle.advance(HostState::ShuttingDown)?;
        self.shutdown(&session, &process);
        self.lifecycle.advance(HostState::Terminated)?;

        match &outcome {
            Ok(reason) => info!(target = "host", ?reason, "session finished"),
            Err(err) => warn!(target = "host", error = %err, "session aborted"),
        }
        outcome
    }

    fn setup(&self) -> Result<Attached, HostError> {
        let signals = ShutdownSignals::install()?;
        let pipe = FeedPipe::new()?;
        let session = TerminalSession::acquire_path(&self.config.tty_path)?;
        let keyboard = session.keyboard()?;

        let (cols, rows) = detect_terminal_size();
        let spawn = SpawnConfig::new(self.config.command.clone(), cols, rows);
        let (process, reader, writer) = PtyProcess::spawn(spawn, pipe.read)?;
        debug!(target = "host", pid = process.pid(), cols, rows, "child spawned");

        Ok(Attached {
            session: Arc::new(session),
            process: Arc::new(process),
            reader,
            writer,
            feed: pipe.write,
            keyboard,
            signals,
        })
    }

    async fn pump(&self, attached: Attached, io: HostIo) -> Result<ShutdownReason, HostError> {
        let Attached {
            session,
            process,
            reader,
            writer,
            feed,
            keyboard,
            signals,
        } = attached;
        let ShutdownSignals {
            mut interrupt,
            mut terminate,
            mut hangup,
            window,
        } = signals;

        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
        spawn_feed_pump(io.producer, feed, session, fatal_tx.clone())?;
        spawn_keyboard_pump(keyboard, writer)?;
        let resize = spawn_resize_listener(window, process, self.config.resize_failure, fatal_tx);

        let output = io.output;
        let mut screen = tokio::task::spawn_blocking(move || pump_screen(reader, output));

        let outcome = tokio::select! {
            result = &mut screen => match result {
                Ok(Ok(bytes)) => {
                    debug!(target = "host::pump", bytes, "pseudo-terminal reached end of stream");
                    Ok(ShutdownReason::ChildExited)
                }
                Ok(Err(err)) => {
                    warn!(target = "host::pump", error = %err, "screen output failed");
                    Ok(ShutdownReason::OutputClosed)
                }
                Err(err) => Err(HostError::Io(io::Error::other(err))),
            },
            _ = interrupt.recv() => Ok(ShutdownReason::Interrupted),
            _ = terminate.recv() => Ok(ShutdownReason::Terminated),
            _ = hangup.recv() => Ok(ShutdownReason::HungUp),
            Some(err) = fatal_rx.recv() => Err(err),
        };

        resize.abort();
        outcome
    }

    fn shutdown(&self, session: &TerminalSession, process: &PtyProcess) {
        if let Err(err) = session.restore() {
            warn!(target = "host", error = %err, "failed to restore terminal");
        }
        process.shutdown();
        match self.group.terminate_group() {
            Ok(()) => debug!(target = "host", "process group signalled"),
            Err(err) => warn!(target = "host", error = %err, "failed to signal process group"),
        }
    }
}

fn spawn_resize_listener(
    mut window: Signal,
    process: Arc<PtyProcess>,
    policy: ResizeFailure,
    fatal: UnboundedSender<HostError>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while window.recv().await.is_some() {
            let (cols, rows) = detect_terminal_size();
            let applied = process.resize(cols, rows);
            if let Err(err) = resize_outcome(applied, cols, rows, policy) {
                let _ = fatal.send(err);
                break;
            }
        }
    })
}

fn resize_outcome(
    applied: Result<(), PtyError>,
    cols: u16,
    rows: u16,
    policy: ResizeFailure,
) -> Result<(), HostError> {
    match (applied, policy) {
        (Ok(()), _) => {
            debug!(target = "host::resize", cols, rows, "window size applied");
            Ok(())
        }
        (Err(err), ResizeFailure::Warn) => {
            warn!(target = "host::resize", cols, rows, error = %err, "failed to apply PTY resize");
            Ok(())
        }
        (Err(err), ResizeFailure::Fatal) => Err(HostError::from(err)),
    }
}

/// Size of the real terminal as `(cols, rows)`.
pub fn detect_terminal_size() -> (u16, u16) {
    if let Ok((cols, rows)) = terminal_size() {
        if cols > 0 && rows > 0 {
            return (cols, rows);
        }
    }

    let cols = std::env::var("COLUMNS")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(80);
    let rows = std::env::var("LINES")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(24);
    (cols, rows)
}
