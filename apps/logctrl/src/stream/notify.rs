//! "New data available" signalling between the replication thread and the
//! presentation layer.
//!
//! The channel holds at most one pending signal. Signals sent while one is
//! already pending are merged into it, so a receiver must treat every wake-up
//! as "re-read the snapshot" and never as "exactly one new line". Once the
//! sending side is gone (feed exhausted or stream closed) receivers observe
//! [`Wake::Closed`].

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded};
use std::time::Duration;

pub fn channel() -> (Notifier, Updates) {
    let (tx, rx) = bounded(1);
    (Notifier { tx }, Updates { rx })
}

#[derive(Clone, Debug)]
pub struct Notifier {
    tx: Sender<()>,
}

impl Notifier {
    /// Never blocks. Returns `false` once every receiver is gone.
    pub fn signal(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Disconnected(())) => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wake {
    Updated,
    TimedOut,
    Closed,
}

#[derive(Debug)]
pub struct Updates {
    rx: Receiver<()>,
}

impl Updates {
    /// Blocks until new data is available. `false` means the stream ended.
    pub fn wait(&self) -> bool {
        self.rx.recv().is_ok()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Wake {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => Wake::Updated,
            Err(RecvTimeoutError::Timeout) => Wake::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Wake::Closed,
        }
    }

    pub fn poll(&self) -> Wake {
        match self.rx.try_recv() {
            Ok(()) => Wake::Updated,
            Err(TryRecvError::Empty) => Wake::TimedOut,
            Err(TryRecvError::Disconnected) => Wake::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_signals_coalesce() {
        let (notifier, updates) = channel();
        assert!(notifier.signal());
        assert!(notifier.signal());
        assert!(notifier.signal());
        assert_eq!(updates.poll(), Wake::Updated);
        assert_eq!(updates.poll(), Wake::TimedOut);
    }

    #[test]
    fn dropping_notifier_closes_updates() {
        let (notifier, updates) = channel();
        notifier.signal();
        drop(notifier);
        assert_eq!(updates.poll(), Wake::Updated);
        assert_eq!(updates.wait_timeout(Duration::from_millis(10)), Wake::Closed);
        assert!(!updates.wait());
    }

    #[test]
    fn signal_reports_missing_receiver() {
        let (notifier, updates) = channel();
        drop(updates);
        assert!(!notifier.signal());
    }
}
