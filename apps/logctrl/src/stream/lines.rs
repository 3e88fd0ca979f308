/// Splits a byte stream into newline-terminated lines across chunk
/// boundaries.
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|byte| *byte == b'\n') {
            self.pending.extend_from_slice(&rest[..pos]);
            lines.push(take_line(&mut self.pending));
            rest = &rest[pos + 1..];
        }
        self.pending.extend_from_slice(rest);
        lines
    }

    /// Flushes an unterminated final line, if any.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(take_line(&mut self.pending))
        }
    }
}

fn take_line(pending: &mut Vec<u8>) -> String {
    if pending.last() == Some(&b'\r') {
        pending.pop();
    }
    let line = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_lines_split_across_chunks() {
        let mut splitter = LineSplitter::default();
        assert!(splitter.push(b"sta").is_empty());
        assert_eq!(splitter.push(b"rt\nwarn: low"), vec!["start"]);
        assert_eq!(splitter.push(b" disk\nstop\n"), vec!["warn: low disk", "stop"]);
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn strips_carriage_returns_and_keeps_empty_lines() {
        let mut splitter = LineSplitter::default();
        assert_eq!(splitter.push(b"a\r\n\nb\r\n"), vec!["a", "", "b"]);
    }

    #[test]
    fn finish_emits_unterminated_tail() {
        let mut splitter = LineSplitter::default();
        assert_eq!(splitter.push(b"one\ntwo"), vec!["one"]);
        assert_eq!(splitter.finish().as_deref(), Some("two"));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut splitter = LineSplitter::default();
        let lines = splitter.push(b"bad \xff byte\n");
        assert_eq!(lines, vec!["bad \u{fffd} byte"]);
    }
}
