use crate::server::pty::PtyWriter;
use crate::session::TerminalSession;
use crate::telemetry::logging::hexdump;
use crate::terminal::error::HostError;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{Level, debug, trace, warn};

const KEYBOARD_CHUNK: usize = 1024;
const SCREEN_CHUNK: usize = 8192;

/// Copies the producer into the feed pipe until the producer ends.
///
/// The pipe is consumed so the write end closes on return, which is what
/// lets the child observe end-of-stream.
pub fn pump_feed<R: Read, W: Write>(mut producer: R, mut pipe: W) -> io::Result<u64> {
    let copied = io::copy(&mut producer, &mut pipe)?;
    pipe.flush()?;
    Ok(copied)
}

/// Copies pseudo-terminal output to the screen, flushing every chunk.
pub fn pump_screen<R: Read, W: Write>(mut reader: R, mut output: W) -> io::Result<u64> {
    let mut buffer = [0u8; SCREEN_CHUNK];
    let mut total = 0u64;
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                output.write_all(&buffer[..n])?;
                output.flush()?;
                total += n as u64;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(total)
}

/// Forwards keystrokes to the pseudo-terminal until either side closes.
pub fn pump_keyboard<R: Read>(mut keyboard: R, writer: &PtyWriter) -> u64 {
    let mut buffer = [0u8; KEYBOARD_CHUNK];
    let mut total = 0u64;
    loop {
        match keyboard.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                let bytes = &buffer[..n];
                if let Err(err) = writer.send(bytes) {
                    debug!(target = "host::keyboard", error = %err, "pty closed for input");
                    break;
                }
                total += n as u64;
                if tracing::enabled!(Level::TRACE) {
                    trace!(
                        target = "host::keyboard",
                        bytes = n,
                        dump = %hexdump(bytes),
                        "keyboard forwarded to pty"
                    );
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(target = "host::keyboard", error = %err, "keyboard input error");
                break;
            }
        }
    }
    total
}

/// Runs [`pump_feed`] on its own thread. Once the producer is drained the
/// terminal is put back into raw mode, since producers that share the
/// terminal commonly reset it on exit; failing to do so is fatal.
pub fn spawn_feed_pump<R, W>(
    producer: R,
    pipe: W,
    session: Arc<TerminalSession>,
    fatal: UnboundedSender<HostError>,
) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    thread::Builder::new()
        .name("logctrl-feed".into())
        .spawn(move || {
            match pump_feed(producer, pipe) {
                Ok(bytes) => debug!(target = "host::feed", bytes, "producer finished"),
                Err(err) => warn!(target = "host::feed", error = %err, "feed pump stopped"),
            }
            match session.reassert_raw() {
                Ok(true) => trace!(target = "host::feed", "raw mode re-asserted"),
                Ok(false) => trace!(target = "host::feed", "terminal already restored"),
                Err(err) => {
                    let _ = fatal.send(HostError::from(err));
                }
            }
        })
}

pub fn spawn_keyboard_pump<R>(keyboard: R, writer: PtyWriter) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name("logctrl-keyboard".into())
        .spawn(move || {
            let bytes = pump_keyboard(keyboard, &writer);
            trace!(target = "host::keyboard", bytes, "keyboard pump exited");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::Cursor;

    /// Reader that fails with `Interrupted` once before yielding its data.
    struct Flaky {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(io::ErrorKind::Interrupted.into());
            }
            self.inner.read(buf)
        }
    }

    #[derive(Clone, Default)]
    struct Sink {
        bytes: Arc<Mutex<Vec<u8>>>,
        flushes: Arc<Mutex<usize>>,
    }

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.bytes.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            *self.flushes.lock() += 1;
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn feed_pump_copies_everything() {
        let sink = Sink::default();
        let copied = pump_feed(Cursor::new(b"start\nwarn: low disk\nstop\n".to_vec()), sink.clone()).unwrap();
        assert_eq!(copied, 26);
        assert_eq!(sink.bytes.lock().as_slice(), b"start\nwarn: low disk\nstop\n");
    }

    #[test]
    fn feed_pump_reports_closed_pipe() {
        let err = pump_feed(Cursor::new(b"lost".to_vec()), Broken).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn screen_pump_retries_interrupts_and_flushes() {
        let sink = Sink::default();
        let reader = Flaky {
            interrupted: false,
            inner: Cursor::new(b"\x1b[2Jprompt> ".to_vec()),
        };
        let total = pump_screen(reader, sink.clone()).unwrap();
        assert_eq!(total, 12);
        assert_eq!(sink.bytes.lock().as_slice(), b"\x1b[2Jprompt> ");
        assert!(*sink.flushes.lock() >= 1);
    }

    #[test]
    fn screen_pump_surfaces_output_errors() {
        let err = pump_screen(Cursor::new(b"frame".to_vec()), Broken).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn empty_screen_is_end_of_stream() {
        let sink = Sink::default();
        assert_eq!(pump_screen(io::empty(), sink.clone()).unwrap(), 0);
        assert!(sink.bytes.lock().is_empty());
    }
}
