//! TLV hex-dump decoder
//!
//! The binaries print TLV payloads as nested brace blocks:
//!
//! ```text
//!     {
//!         ID: 0 type: Resource Value
//!         {
//!             data (20 bytes):
//!             4F 70 65 6E  20 4D 6F 62  69 6C 65 20  41 6C 6C 69  Open Mobile Alli
//!             61 6E 63 65                                         ance
//!         }
//!     }
//! ```
//!
//! [`TlvScanner`] walks those lines as an explicit state machine. Only
//! resources at nesting depth 1 are candidates, so the instances of a
//! multiple-instance resource (depth 3) never shadow a top-level ID.

use super::dump::{strip_line_end, DumpReader};
use super::ContentFormat;
use crate::common::{Error, Result};

/// Scanner state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlvState {
    /// Tracking brace depth, looking for the target's `ID:` line
    Seeking { depth: i32 },
    /// Target found; waiting for its `data (<k> bytes):` line
    CapturingLength,
    /// Collecting the ASCII column of the value's dump
    Reading(DumpReader),
    /// Value complete
    Done(String),
}

/// Line-driven scanner extracting one resource value from a TLV dump
#[derive(Debug, Clone)]
pub struct TlvScanner {
    target: u16,
    state: TlvState,
}

impl TlvScanner {
    pub fn new(target: u16) -> Self {
        Self {
            target,
            state: TlvState::Seeking { depth: 0 },
        }
    }

    pub fn state(&self) -> &TlvState {
        &self.state
    }

    /// Feed one line (terminator already stripped)
    ///
    /// Returns the decoded value when this line completes it.
    pub fn step(&mut self, line: &str) -> Result<Option<String>> {
        let next = match std::mem::replace(&mut self.state, TlvState::Seeking { depth: 0 }) {
            TlvState::Seeking { depth } => {
                if is_brace_line(line) {
                    let depth = if line.contains('{') { depth + 1 } else { depth - 1 };
                    TlvState::Seeking { depth }
                } else if depth == 1 && parse_id_line(line) == Some(self.target) {
                    TlvState::CapturingLength
                } else {
                    TlvState::Seeking { depth }
                }
            }
            TlvState::CapturingLength => {
                if is_brace_line(line) {
                    TlvState::CapturingLength
                } else if let Some(len) = parse_data_line(line) {
                    if len == 0 {
                        TlvState::Done(String::new())
                    } else {
                        TlvState::Reading(DumpReader::new(len))
                    }
                } else {
                    return Err(Error::MalformedPayload(format!(
                        "TLV resource {} has no single value (found {:?})",
                        self.target,
                        line.trim()
                    )));
                }
            }
            TlvState::Reading(mut reader) => match reader.feed(line) {
                Some(value) => TlvState::Done(value),
                None => TlvState::Reading(reader),
            },
            TlvState::Done(value) => TlvState::Done(value),
        };

        self.state = next;
        Ok(match &self.state {
            TlvState::Done(value) => Some(value.clone()),
            _ => None,
        })
    }
}

/// A line holding a brace and no word characters
fn is_brace_line(line: &str) -> bool {
    (line.contains('{') || line.contains('}'))
        && !line.chars().any(|c| c.is_alphanumeric() || c == '_')
}

/// `ID: <id> type: ...` → id
fn parse_id_line(line: &str) -> Option<u16> {
    let rest = line.trim_start().strip_prefix("ID: ")?;
    let (id, tail) = rest.split_once(' ')?;
    if !tail.starts_with("type:") {
        return None;
    }
    id.parse().ok()
}

/// `data (<k> bytes):` → k
fn parse_data_line(line: &str) -> Option<usize> {
    line.trim()
        .strip_prefix("data (")?
        .strip_suffix("bytes):")?
        .trim()
        .parse()
        .ok()
}

/// Decode resource `id` from the first TLV payload in a capture
///
/// `Ok(None)` means the payload was there but never reached the resource;
/// callers treat that as a failed expectation.
pub fn decode(text: &str, id: u16) -> Result<Option<String>> {
    let marker = ContentFormat::Tlv.marker();
    let start = text
        .find(marker)
        .ok_or_else(|| Error::MalformedPayload(format!("no '{}' payload in capture", marker)))?;

    let mut scanner = TlvScanner::new(id);
    for line in text[start + marker.len()..].split('\n') {
        if let Some(value) = scanner.step(strip_line_end(line))? {
            return Ok(Some(value));
        }
    }

    match scanner.state() {
        TlvState::Seeking { .. } => Ok(None),
        TlvState::CapturingLength => Err(Error::MalformedPayload(format!(
            "TLV resource {} ended before its data line",
            id
        ))),
        TlvState::Reading(reader) => Err(Error::MalformedPayload(format!(
            "TLV resource {} truncated, {} bytes missing",
            id,
            reader.remaining()
        ))),
        TlvState::Done(value) => Ok(Some(value.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Read of /3/0 as printed by the server (after the terminal's CR insertion)
    const DEVICE_READ: &str = concat!(
        "20 bytes received from [::1]:56830\r\r\n",
        "\r\r\nClient #0 /3/0 : COAP_205_CONTENT\r\r\n",
        "    non block transfer\r\n\r\r\n",
        "    101 bytes received of type application/vnd.oma.lwm2m+tlv:\r\r\n",
        "    {\r\r\n",
        "        ID: 0 type: Resource Value\r\n",
        "        {\r\n",
        "            data (20 bytes):\r\r\n",
        "            4F 70 65 6E  20 4D 6F 62  69 6C 65 20  41 6C 6C 69  Open Mobile Alli\r\n",
        "            61 6E 63 65                                         ance\r\n",
        "        }\r\r\n",
        "    }\r\r\n",
        "    {\r\r\n",
        "        ID: 6 type: Multiple Instances\r\n",
        "        {\r\n",
        "        {\r\r\n",
        "            ID: 0 type: Resource Value\r\n",
        "            {\r\n",
        "                data (1 bytes):\r\r\n",
        "                31  1\r\n",
        "                data as Integer: 1\r\r\n",
        "            }\r\r\n",
        "        }\r\r\n",
        "        {\r\r\n",
        "            ID: 1 type: Resource Value\r\n",
        "            {\r\n",
        "                data (1 bytes):\r\r\n",
        "                35  5\r\n",
        "            }\r\r\n",
        "        }\r\r\n",
        "        }\r\r\n",
        "    }\r\r\n",
        "    {\r\r\n",
        "        ID: 1 type: Resource Value\r\n",
        "        {\r\n",
        "            data (22 bytes):\r\r\n",
        "            4C 69 67 68  74 77 65 69  67 68 74 20  4D 32 4D 20  Lightweight M2M \r\n",
        "            43 6C 69 65  6E 74                                  Client\r\n",
        "        }\r\r\n",
        "    }\r\r\n",
        "    {\r\r\n",
        "        ID: 16 type: Resource Value\r\n",
        "        {\r\n",
        "            data (1 bytes):\r\r\n",
        "            55  U\r\n",
        "        }\r\r\n",
        "    }\r\r\n",
        "\r\r\n> "
    );

    #[test]
    fn test_device_manufacturer_and_binding() {
        assert_eq!(
            decode(DEVICE_READ, 0).unwrap().as_deref(),
            Some("Open Mobile Alliance")
        );
        assert_eq!(decode(DEVICE_READ, 16).unwrap().as_deref(), Some("U"));
    }

    #[test]
    fn test_nested_instance_ids_do_not_shadow_top_level() {
        // ID 1 exists at depth 3 (instance of resource 6) before the top-level ID 1
        assert_eq!(
            decode(DEVICE_READ, 1).unwrap().as_deref(),
            Some("Lightweight M2M Client")
        );
    }

    #[test]
    fn test_decode_is_idempotent() {
        let first = decode(DEVICE_READ, 0).unwrap();
        let second = decode(DEVICE_READ, 0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unknown_id_is_none() {
        assert_eq!(decode(DEVICE_READ, 13).unwrap(), None);
    }

    #[test]
    fn test_multiple_instances_is_malformed() {
        assert!(matches!(
            decode(DEVICE_READ, 6),
            Err(Error::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_missing_marker_is_malformed() {
        assert!(matches!(
            decode("no payload", 0),
            Err(Error::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_truncated_dump_is_malformed() {
        let cut = DEVICE_READ
            .find("            61 6E 63 65")
            .expect("fixture contains continuation line");
        assert!(matches!(
            decode(&DEVICE_READ[..cut], 0),
            Err(Error::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_scan_starts_at_tlv_marker() {
        // A brace block before the marker must not count towards the depth
        let text = format!("    {{\r\r\nnoise\r\r\n{}", DEVICE_READ);
        assert_eq!(decode(&text, 16).unwrap().as_deref(), Some("U"));
    }

    #[test]
    fn test_state_transitions() {
        let mut scanner = TlvScanner::new(16);
        assert_eq!(scanner.step("    {").unwrap(), None);
        assert_eq!(scanner.state(), &TlvState::Seeking { depth: 1 });

        assert_eq!(scanner.step("        ID: 16 type: Resource Value").unwrap(), None);
        assert_eq!(scanner.state(), &TlvState::CapturingLength);

        assert_eq!(scanner.step("        {").unwrap(), None);
        assert_eq!(scanner.state(), &TlvState::CapturingLength);

        assert_eq!(scanner.step("            data (2 bytes):").unwrap(), None);
        assert!(matches!(scanner.state(), TlvState::Reading(_)));

        assert_eq!(
            scanner.step("            34 32  42").unwrap().as_deref(),
            Some("42")
        );
        assert_eq!(scanner.state(), &TlvState::Done("42".to_string()));
    }

    #[test]
    fn test_zero_length_value() {
        let mut scanner = TlvScanner::new(3);
        scanner.step("{").unwrap();
        scanner.step("ID: 3 type: Resource Value").unwrap();
        assert_eq!(scanner.step("data (0 bytes):").unwrap().as_deref(), Some(""));
    }

    #[test]
    fn test_id_line_needs_exact_id() {
        assert_eq!(parse_id_line("        ID: 16 type: Resource Value"), Some(16));
        assert_eq!(parse_id_line("        ID: 1"), None);
        assert_eq!(parse_data_line("    data (20 bytes):"), Some(20));
        assert!(is_brace_line("        }"));
        assert!(!is_brace_line("data as Integer: 1 }"));
    }
}
