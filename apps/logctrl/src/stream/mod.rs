//! Tee of the inbound log feed.
//!
//! One replication thread reads the feed exactly once and fans every chunk out
//! to three consumers:
//!
//! - the durable log file, which keeps the complete history of the run
//! - the live [`RingBuffer`], bounded to what the viewer currently shows
//! - an optional [`LineCursor`] for line-at-a-time pulls
//!
//! The durable file is what lets the viewer keep a small resident window while
//! still being able to reconstruct everything via [`LogStream::read_all`].
//!
//! [`LogStream::close`] releases the feed and every open handle on the
//! durable file. The file itself stays on disk after the run.

mod cursor;
mod feed;
mod lines;
pub mod notify;

pub use cursor::LineCursor;
pub use notify::{Notifier, Updates, Wake};

use crate::buffer::RingBuffer;
use crossbeam_channel::{Receiver, Sender, unbounded};
use feed::FeedCloser;
use lines::LineSplitter;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, trace, warn};

pub const LOG_FILE_PREFIX: &str = "logctrl_";
pub const LOG_FILE_SUFFIX: &str = ".log";

const CHUNK: usize = 8192;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("unable to create log file: {source}")]
    CreateLogFile {
        #[source]
        source: io::Error,
    },
    #[error("unable to read log file {path:?}: {source}")]
    ReadLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("stream already started")]
    AlreadyStarted,
    #[error("unable to prepare feed: {0}")]
    Feed(#[source] io::Error),
    #[error("unable to start replication thread: {0}")]
    Spawn(#[source] io::Error),
}

#[derive(Clone, Debug)]
pub struct StreamOptions {
    /// Directory for the durable log file; the OS temp dir when `None`.
    pub log_dir: Option<PathBuf>,
    /// Initial capacity of the live buffer.
    pub buffer_lines: usize,
    /// Queue every line for [`LogStream::cursor`] from construction on.
    /// Lines are held until the cursor is taken, so turn this off when
    /// nothing pulls.
    pub line_cursor: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            log_dir: None,
            buffer_lines: 1,
            line_cursor: true,
        }
    }
}

struct Shared {
    live: Mutex<RingBuffer>,
    cursor: Mutex<Option<Sender<String>>>,
    notifier: Mutex<Option<Notifier>>,
    closed: AtomicBool,
    finished: AtomicBool,
    lines: AtomicU64,
}

impl Shared {
    fn deliver(&self, line: String) {
        self.lines.fetch_add(1, Ordering::Relaxed);
        self.live.lock().push(line.clone());
        {
            let mut cursor = self.cursor.lock();
            let detached = cursor.as_ref().is_some_and(|tx| tx.send(line).is_err());
            if detached {
                // cursor dropped by its owner
                *cursor = None;
            }
        }
        if let Some(notifier) = self.notifier.lock().as_ref() {
            notifier.signal();
        }
    }

    fn end_of_stream(&self) {
        self.finished.store(true, Ordering::Release);
        self.cursor.lock().take();
        self.notifier.lock().take();
    }
}

pub struct LogStream {
    feed: Option<Box<dyn Read + Send>>,
    closer: Option<FeedCloser>,
    log_file: File,
    log_path: PathBuf,
    shared: Arc<Shared>,
    cursor: Option<Receiver<String>>,
    worker: Option<JoinHandle<io::Result<u64>>>,
}

impl LogStream {
    /// Creates the durable log file and an idle stream over `feed`.
    /// Nothing is read until [`LogStream::start`].
    ///
    /// A blocked read on an arbitrary reader cannot be interrupted, so
    /// [`LogStream::close`] only detaches its replication thread. Prefer
    /// [`LogStream::from_fd`] for pipes and other descriptors.
    pub fn new<R>(feed: R, options: &StreamOptions) -> Result<Self, StreamError>
    where
        R: Read + Send + 'static,
    {
        Self::with_feed(Box::new(feed), None, options)
    }

    /// Like [`LogStream::new`], but `close` also wakes a replication thread
    /// blocked on the descriptor and closes it.
    pub fn from_fd(feed: OwnedFd, options: &StreamOptions) -> Result<Self, StreamError> {
        let (feed, closer) = feed::interruptible(feed).map_err(StreamError::Feed)?;
        Self::with_feed(Box::new(feed), Some(closer), options)
    }

    fn with_feed(
        feed: Box<dyn Read + Send>,
        closer: Option<FeedCloser>,
        options: &StreamOptions,
    ) -> Result<Self, StreamError> {
        let (log_file, log_path) = create_log_file(options.log_dir.as_deref())?;
        debug!(target = "stream", path = %log_path.display(), "durable log file created");
        let (tx, rx) = if options.line_cursor {
            let (tx, rx) = unbounded();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        Ok(Self {
            feed: Some(feed),
            closer,
            log_file,
            log_path,
            shared: Arc::new(Shared {
                live: Mutex::new(RingBuffer::new(options.buffer_lines)),
                cursor: Mutex::new(tx),
                notifier: Mutex::new(None),
                closed: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                lines: AtomicU64::new(0),
            }),
            cursor: rx,
            worker: None,
        })
    }

    /// Starts the replication thread. `notifier` is signalled after each
    /// produced line (signals coalesce, see [`notify`]).
    pub fn start(&mut self, notifier: Notifier) -> Result<(), StreamError> {
        let feed = self.feed.take().ok_or(StreamError::AlreadyStarted)?;
        let log = self.log_file.try_clone().map_err(StreamError::Spawn)?;
        *self.shared.notifier.lock() = Some(notifier);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("logctrl-replicate".into())
            .spawn(move || {
                let result = replicate(feed, log, &shared);
                shared.end_of_stream();
                match &result {
                    Ok(bytes) => debug!(target = "stream::replicate", bytes, "feed exhausted"),
                    Err(err) => warn!(target = "stream::replicate", error = %err, "replication stopped"),
                }
                result
            })
            .map_err(StreamError::Spawn)?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Resizes the live buffer, keeping its most recent lines.
    pub fn set_buffer_size(&self, lines: usize) {
        self.shared.live.lock().resize(lines);
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.live.lock().capacity()
    }

    /// Live buffer contents, oldest first, joined with `\n`.
    pub fn snapshot(&self) -> String {
        self.shared.live.lock().render("\n")
    }

    pub fn snapshot_lines(&self) -> Vec<String> {
        self.shared.live.lock().to_vec()
    }

    /// Full history of the run as stored in the durable log file.
    pub fn read_all(&self) -> Result<String, StreamError> {
        let bytes = fs::read(&self.log_path).map_err(|source| StreamError::ReadLog {
            path: self.log_path.clone(),
            source,
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Hands out the pull cursor, which yields every line produced since
    /// the stream was created. There is only one: later calls, and streams
    /// built without [`StreamOptions::line_cursor`], return `None`.
    pub fn cursor(&mut self) -> Option<LineCursor> {
        self.cursor.take().map(LineCursor::new)
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Number of lines produced so far.
    pub fn line_count(&self) -> u64 {
        self.shared.lines.load(Ordering::Relaxed)
    }

    /// `true` once the feed reached end-of-stream.
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    /// Waits for the replication thread after the feed reached EOF and
    /// returns the number of bytes it persisted.
    pub fn join(&mut self) -> io::Result<u64> {
        match self.worker.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| io::Error::other("replication thread panicked"))?,
            None => Ok(0),
        }
    }

    /// Stops replication and releases the feed and both handles on the
    /// durable file. The file stays on disk, as does an undrained cursor's
    /// backlog until the cursor is dropped.
    ///
    /// For streams built with [`LogStream::new`] a replication thread still
    /// blocked in a read is detached instead of joined; it drops the feed
    /// and its file handle once that read returns.
    pub fn close(mut self) {
        let interruptible = self.closer.is_some();
        self.release();
        if let Some(handle) = self.worker.take() {
            if interruptible || handle.is_finished() {
                if handle.join().is_err() {
                    warn!(target = "stream", "replication thread panicked");
                }
            } else {
                debug!(target = "stream", "replication thread detached while blocked on feed");
            }
        }
        trace!(target = "stream", path = %self.log_path.display(), "stream closed");
    }

    fn release(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.closer.take();
        self.feed.take();
        self.shared.notifier.lock().take();
        self.shared.cursor.lock().take();
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.release();
    }
}

fn create_log_file(dir: Option<&Path>) -> Result<(File, PathBuf), StreamError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(LOG_FILE_PREFIX).suffix(LOG_FILE_SUFFIX);
    let named = match dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .map_err(|source| StreamError::CreateLogFile { source })?;
    named
        .keep()
        .map_err(|err| StreamError::CreateLogFile { source: err.error })
}

fn replicate(mut feed: Box<dyn Read + Send>, mut log: File, shared: &Shared) -> io::Result<u64> {
    let mut splitter = LineSplitter::default();
    let mut chunk = vec![0u8; CHUNK];
    let mut total = 0u64;
    loop {
        if shared.closed.load(Ordering::Acquire) {
            trace!(target = "stream::replicate", "stream closed; stopping");
            break;
        }
        let n = match feed.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        log.write_all(&chunk[..n])?;
        total += n as u64;
        for line in splitter.push(&chunk[..n]) {
            shared.deliver(line);
        }
    }
    if let Some(line) = splitter.finish() {
        shared.deliver(line);
    }
    log.flush()?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    fn options(dir: &Path, buffer_lines: usize) -> StreamOptions {
        StreamOptions {
            log_dir: Some(dir.to_path_buf()),
            buffer_lines,
            line_cursor: true,
        }
    }

    fn run_to_end(stream: &mut LogStream) {
        let (notifier, _updates) = notify::channel();
        stream.start(notifier).unwrap();
        stream.join().unwrap();
    }

    #[test_timeout::timeout]
    fn log_file_uses_fixed_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let stream = LogStream::new(Cursor::new(Vec::new()), &options(dir.path(), 4)).unwrap();
        let name = stream.log_path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(LOG_FILE_PREFIX), "unexpected name {name}");
        assert!(name.ends_with(LOG_FILE_SUFFIX), "unexpected name {name}");
        assert!(stream.log_path().starts_with(dir.path()));
    }

    #[test_timeout::timeout]
    fn live_view_diverges_from_full_history() {
        let dir = tempfile::tempdir().unwrap();
        let input: String = (1..=10).map(|i| format!("line {i}\n")).collect();
        let mut stream =
            LogStream::new(Cursor::new(input.clone().into_bytes()), &options(dir.path(), 3)).unwrap();
        run_to_end(&mut stream);

        assert_eq!(stream.snapshot(), "line 8\nline 9\nline 10");
        assert_eq!(stream.read_all().unwrap(), input);
        assert_eq!(stream.line_count(), 10);
        assert!(stream.is_finished());
    }

    #[test_timeout::timeout]
    fn durable_file_is_byte_exact() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = Vec::new();
        for i in 0..2_000u32 {
            input.extend_from_slice(format!("{i:05} payload \r\n").as_bytes());
        }
        input.extend_from_slice(b"\xff\xfe no newline at end");
        let mut stream = LogStream::new(Cursor::new(input.clone()), &options(dir.path(), 2)).unwrap();
        run_to_end(&mut stream);

        assert_eq!(fs::read(stream.log_path()).unwrap(), input);
        assert_eq!(stream.line_count(), 2_001);
        assert_eq!(
            stream.snapshot_lines(),
            vec!["01999 payload ".to_string(), "\u{fffd}\u{fffd} no newline at end".to_string()]
        );
    }

    #[test_timeout::timeout]
    fn buffer_size_applies_to_retained_lines() {
        let dir = tempfile::tempdir().unwrap();
        let input = b"start\nwarn: low disk\nstop\n".to_vec();
        let mut stream = LogStream::new(Cursor::new(input), &options(dir.path(), 8)).unwrap();
        run_to_end(&mut stream);

        assert_eq!(stream.snapshot(), "start\nwarn: low disk\nstop");
        stream.set_buffer_size(2);
        assert_eq!(stream.buffer_size(), 2);
        assert_eq!(stream.snapshot(), "warn: low disk\nstop");
    }

    #[test_timeout::timeout]
    fn start_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut stream = LogStream::new(Cursor::new(Vec::new()), &options(dir.path(), 1)).unwrap();
        let (notifier, _updates) = notify::channel();
        stream.start(notifier.clone()).unwrap();
        assert!(matches!(stream.start(notifier), Err(StreamError::AlreadyStarted)));
    }

    #[test_timeout::timeout]
    fn cursor_yields_every_line_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        let (reader, mut writer) = pipe();
        let mut stream = LogStream::new(reader, &options(dir.path(), 1)).unwrap();
        let cursor = stream.cursor().unwrap();
        assert!(stream.cursor().is_none());
        let (notifier, updates) = notify::channel();
        stream.start(notifier).unwrap();

        writer.write_all(b"a\nb\n").unwrap();
        assert_eq!(cursor.next_line().as_deref(), Some("a"));
        assert_eq!(cursor.next_line().as_deref(), Some("b"));
        assert!(updates.wait());

        writer.write_all(b"c").unwrap();
        drop(writer);
        assert_eq!(cursor.next_line().as_deref(), Some("c"));
        assert_eq!(cursor.next_line(), None);
        assert_eq!(stream.snapshot(), "c");
        assert_eq!(updates.wait_timeout(Duration::from_secs(5)), Wake::Updated);
        assert_eq!(updates.wait_timeout(Duration::from_secs(5)), Wake::Closed);
    }

    #[test_timeout::timeout]
    fn slow_consumers_do_not_stall_replication() {
        let dir = tempfile::tempdir().unwrap();
        let input: String = (0..500).map(|i| format!("{i}\n")).collect();
        let mut stream =
            LogStream::new(Cursor::new(input.clone().into_bytes()), &options(dir.path(), 5)).unwrap();
        // neither the cursor nor the updates are drained while replicating
        let cursor = stream.cursor().unwrap();
        let (notifier, updates) = notify::channel();
        stream.start(notifier).unwrap();
        assert_eq!(stream.join().unwrap(), input.len() as u64);

        assert_eq!(stream.read_all().unwrap(), input);
        assert_eq!(cursor.take(500).count(), 500);
        assert_eq!(updates.poll(), Wake::Updated);
    }

    #[test_timeout::timeout]
    fn cursor_taken_late_still_sees_earlier_lines() {
        let dir = tempfile::tempdir().unwrap();
        let (reader, mut writer) = pipe();
        let mut stream = LogStream::new(reader, &options(dir.path(), 1)).unwrap();
        let (notifier, updates) = notify::channel();
        stream.start(notifier).unwrap();

        writer.write_all(b"start\nwarn: low disk\n").unwrap();
        while stream.line_count() < 2 {
            assert!(updates.wait());
        }

        let cursor = stream.cursor().unwrap();
        writer.write_all(b"stop\n").unwrap();
        drop(writer);
        let lines: Vec<String> = cursor.collect();
        assert_eq!(lines, ["start", "warn: low disk", "stop"]);
    }

    #[test_timeout::timeout]
    fn streams_without_a_cursor_hand_none_out() {
        let dir = tempfile::tempdir().unwrap();
        let options = StreamOptions {
            line_cursor: false,
            ..options(dir.path(), 2)
        };
        let mut stream = LogStream::new(Cursor::new(b"a\nb\n".to_vec()), &options).unwrap();
        assert!(stream.cursor().is_none());
        run_to_end(&mut stream);
        assert_eq!(stream.snapshot(), "a\nb");
    }

    #[test_timeout::timeout]
    fn close_releases_feed_and_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let (reader, mut writer) = pipe();
        let mut stream = LogStream::from_fd(reader.into(), &options(dir.path(), 4)).unwrap();
        let (notifier, updates) = notify::channel();
        stream.start(notifier).unwrap();

        writer.write_all(b"start\n").unwrap();
        assert!(updates.wait());
        let path = fs::canonicalize(stream.log_path()).unwrap();
        // the producer is still attached, so only close can end replication
        stream.close();

        let err = writer.write_all(b"late\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(updates.wait_timeout(Duration::from_secs(5)), Wake::Closed);
        assert_eq!(fs::read(&path).unwrap(), b"start\n");
        assert!(
            !open_descriptors().any(|target| target == path),
            "durable log still open"
        );
    }

    fn open_descriptors() -> impl Iterator<Item = PathBuf> {
        fs::read_dir("/proc/self/fd")
            .unwrap()
            .filter_map(|entry| fs::read_link(entry.ok()?.path()).ok())
    }

    fn pipe() -> (File, File) {
        let (read, write) = nix::unistd::pipe().unwrap();
        (File::from(read), File::from(write))
    }
}
