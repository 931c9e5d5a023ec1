//! Hex+ASCII dump reader
//!
//! Binary values are printed 16 bytes per line, hex column first and the
//! printable rendering last:
//!
//! ```text
//!         4F 70 65 6E  20 4D 6F 62  69 6C 65 20  41 6C 6C 69  Open Mobile Alli
//!         61 6E 63 65                                         ance
//! ```
//!
//! Reading takes the last `min(remaining, 16)` characters of each line until
//! the announced byte count is used up.

/// Bytes rendered per dump line
pub const BYTES_PER_LINE: usize = 16;

/// Accumulates the ASCII column of a dump of known length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpReader {
    remaining: usize,
    value: String,
}

impl DumpReader {
    pub fn new(len: usize) -> Self {
        Self {
            remaining: len,
            value: String::with_capacity(len),
        }
    }

    /// Bytes still to be read
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }

    /// Consume one dump line (without its line terminator)
    ///
    /// Returns the complete value once the last byte has been read.
    pub fn feed(&mut self, line: &str) -> Option<String> {
        if self.is_done() {
            return Some(self.value.clone());
        }
        let take = self.remaining.min(BYTES_PER_LINE);
        let chars: Vec<char> = line.chars().collect();
        let start = chars.len().saturating_sub(take);
        self.value.extend(chars[start..].iter());
        // A short line still uses up its share, so a truncated dump cannot loop
        self.remaining -= take;
        if self.is_done() {
            Some(std::mem::take(&mut self.value))
        } else {
            None
        }
    }
}

/// Strip the terminal's line terminator (`\r\n`, `\r\r\n` or `\n`)
pub fn strip_line_end(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}
