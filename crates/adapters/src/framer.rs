// SPDX-License-Identifier: MIT

//! Splits arbitrary byte chunks into complete `\n`-terminated lines.

/// Buffers bytes until a newline arrives, carrying incomplete UTF-8
/// sequences (and half a `\r\n`) across chunk boundaries.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every complete line it finished.
    /// Trailing `\r` is stripped from each line; the post-final-`\n`
    /// tail stays buffered.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop(); // the \n
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Emit the unterminated tail as one final line, if any.
    pub fn flush(&mut self) -> Vec<String> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let mut line = std::mem::take(&mut self.pending);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        vec![String::from_utf8_lossy(&line).into_owned()]
    }
}

#[cfg(test)]
#[path = "framer_tests.rs"]
mod tests;
