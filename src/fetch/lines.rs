//! Partial-line assembly for streamed output.

/// Growable buffer that turns arbitrary byte chunks into complete lines.
///
/// Emitted lines exclude the terminator (`\n` or `\r\n`).
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and emit every line it completes.
    pub fn push(&mut self, chunk: &[u8], mut emit: impl FnMut(&[u8])) {
        self.partial.extend_from_slice(chunk);
        let mut start = 0;
        while let Some(offset) = self.partial[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            emit(trim_cr(&self.partial[start..end]));
            start = end + 1;
        }
        self.partial.drain(..start);
    }

    /// Emit the unterminated remainder, if any, and reset.
    pub fn finish(&mut self, mut emit: impl FnMut(&[u8])) {
        if !self.partial.is_empty() {
            emit(trim_cr(&self.partial));
            self.partial.clear();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(chunks: &[&[u8]]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut buf = LineBuffer::new();
        for chunk in chunks {
            buf.push(chunk, |l| lines.push(String::from_utf8_lossy(l).into_owned()));
        }
        buf.finish(|l| lines.push(String::from_utf8_lossy(l).into_owned()));
        lines
    }

    #[test]
    fn joins_lines_split_across_chunks() {
        let lines = collect(&[b"Update st", b"ate (0x5) downloading\nSucc", b"ess!\n"]);
        assert_eq!(lines, vec!["Update state (0x5) downloading", "Success!"]);
    }

    #[test]
    fn flushes_unterminated_remainder() {
        let lines = collect(&[b"first\nsecond without newline"]);
        assert_eq!(lines, vec!["first", "second without newline"]);
    }

    #[test]
    fn strips_carriage_returns_and_keeps_blank_lines() {
        let lines = collect(&[b"a\r\n\r\nb\n"]);
        assert_eq!(lines, vec!["a", "", "b"]);
    }

    #[test]
    fn finish_resets_buffer() {
        let mut buf = LineBuffer::new();
        buf.push(b"tail", |_| {});
        assert!(!buf.is_empty());
        let mut count = 0;
        buf.finish(|_| count += 1);
        buf.finish(|_| count += 1);
        assert_eq!(count, 1);
        assert!(buf.is_empty());
    }
}
