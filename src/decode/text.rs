//! Plain-text decoder (`text/plain`)
//!
//! Text values are printed as a hex+ASCII dump after the size line:
//!
//! ```text
//!     20 bytes received of type text/plain:
//!     4F 70 65 6E  20 4D 6F 62  69 6C 65 20  41 6C 6C 69  Open Mobile Alli
//!     61 6E 63 65                                         ance
//! ```

use super::dump::{strip_line_end, DumpReader};
use super::ContentFormat;
use crate::common::{Error, Result};

const SIZE_SUFFIX: &str = " bytes received of type ";

/// Decode the first plain-text payload in a capture
pub fn decode(text: &str) -> Result<String> {
    let marker = ContentFormat::Text.marker();
    let at = text
        .find(marker)
        .ok_or_else(|| Error::MalformedPayload(format!("no '{}' payload in capture", marker)))?;

    let len = announced_len(&text[..at]).ok_or_else(|| {
        Error::MalformedPayload("text/plain payload without a byte count".to_string())
    })?;
    if len == 0 {
        return Ok(String::new());
    }

    let mut reader = DumpReader::new(len);
    // The first segment is the remainder of the marker line
    for line in text[at + marker.len()..].split('\n').skip(1) {
        let line = strip_line_end(line);
        if line.trim().is_empty() {
            continue;
        }
        if let Some(value) = reader.feed(line) {
            return Ok(value);
        }
    }

    Err(Error::MalformedPayload(format!(
        "text/plain payload truncated, {} bytes missing",
        reader.remaining()
    )))
}

/// Byte count from the `N bytes received of type ` prefix ending `head`
fn announced_len(head: &str) -> Option<usize> {
    let prefix = head.strip_suffix(SIZE_SUFFIX)?;
    let digits_start = prefix
        .char_indices()
        .rev()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    prefix[digits_start..].parse().ok()
}
