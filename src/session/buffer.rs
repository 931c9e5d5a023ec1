//! Incrementally decoded output buffer
//!
//! Bytes arrive from the PTY in arbitrary chunks. The buffer decodes them
//! into text (holding back an incomplete UTF-8 sequence until the rest
//! arrives) and hands out matches in order. Text up to and including a match
//! is drained, so the same occurrence is never matched twice.

/// How process output bytes are turned into text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// UTF-8, invalid sequences replaced with U+FFFD
    #[default]
    Utf8,
    /// ISO-8859-1, one char per byte
    Latin1,
}

/// Unconsumed process output
#[derive(Debug, Default)]
pub struct OutputBuffer {
    encoding: Encoding,
    /// Trailing bytes of an incomplete UTF-8 sequence
    pending: Vec<u8>,
    text: String,
}

impl OutputBuffer {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            pending: Vec::new(),
            text: String::new(),
        }
    }

    /// Append raw bytes read from the process
    pub fn push(&mut self, bytes: &[u8]) {
        match self.encoding {
            Encoding::Latin1 => self.text.extend(bytes.iter().map(|&b| b as char)),
            Encoding::Utf8 => {
                self.pending.extend_from_slice(bytes);
                self.decode_pending();
            }
        }
    }

    fn decode_pending(&mut self) {
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    self.pending.clear();
                    return;
                }
                Err(e) => {
                    let valid_end = start + e.valid_up_to();
                    // valid_up_to guarantees this slice is UTF-8
                    if let Ok(valid) = std::str::from_utf8(&self.pending[start..valid_end]) {
                        self.text.push_str(valid);
                    }
                    match e.error_len() {
                        Some(len) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        None => {
                            // Incomplete sequence at the end; wait for more bytes
                            self.pending.drain(..valid_end);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Flush an incomplete trailing sequence (end of stream)
    pub fn finish(&mut self) {
        if !self.pending.is_empty() {
            self.text.push_str(&String::from_utf8_lossy(&self.pending));
            self.pending.clear();
        }
    }

    /// If `needle` is buffered, drain through its first occurrence and
    /// return the text that preceded it
    pub fn take_through(&mut self, needle: &str) -> Option<String> {
        let idx = self.text.find(needle)?;
        let before = self.text[..idx].to_string();
        self.text.drain(..idx + needle.len());
        Some(before)
    }

    /// The unconsumed text
    pub fn as_str(&self) -> &str {
        &self.text
    }
}
