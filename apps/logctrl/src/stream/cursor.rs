use crossbeam_channel::Receiver;
use std::time::Duration;

/// Pull-based, line-at-a-time view of the feed.
///
/// A cursor yields every line produced after it was created, in arrival
/// order, independent of the live buffer's retention window.
#[derive(Debug)]
pub struct LineCursor {
    rx: Receiver<String>,
}

impl LineCursor {
    pub(crate) fn new(rx: Receiver<String>) -> Self {
        Self { rx }
    }

    /// Blocks for the next line; `None` once the feed ended and every line
    /// was consumed.
    pub fn next_line(&self) -> Option<String> {
        self.rx.recv().ok()
    }

    pub fn try_next_line(&self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    pub fn next_line_timeout(&self, timeout: Duration) -> Option<String> {
        self.rx.recv_timeout(timeout).ok()
    }
}

impl Iterator for LineCursor {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line()
    }
}
