// SPDX-License-Identifier: Apache-2.0

/// Incremental decoder turning arbitrary byte chunks into newline-terminated
/// lines.
///
/// Bytes after the last `\n` are held until a later chunk completes the line.
/// A `\r` directly before the `\n` is stripped. There is no line length limit,
/// memory grows with the longest unterminated line.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
    // Start of the first line not yet returned.
    start: usize,
    // Bytes of `buf` before this index are known not to contain a newline.
    scanned: usize,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns every line completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.push(bytes);
        let mut lines = Vec::new();
        while let Some(line) = self.next_line() {
            lines.push(line);
        }
        lines
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.compact();
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next complete line, or `None` once only an unterminated
    /// remainder (or nothing) is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf[self.scanned..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|p| p + self.scanned);

        let Some(pos) = pos else {
            self.scanned = self.buf.len();
            self.compact();
            return None;
        };

        let mut end = pos;
        if end > self.start && self.buf[end - 1] == b'\r' {
            end -= 1;
        }
        let line = String::from_utf8_lossy(&self.buf[self.start..end]).into_owned();
        self.start = pos + 1;
        self.scanned = self.start;
        Some(line)
    }

    /// Drops any partial line, used when the file was truncated or replaced.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.start = 0;
        self.scanned = 0;
    }

    /// Number of bytes held for an unterminated line.
    pub fn buffered_len(&self) -> usize {
        self.buf.len() - self.start
    }

    // Moves the unreturned tail to the front of `buf`, once per chunk.
    fn compact(&mut self) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }
    }
}
