//! LwM2M payload decoders
//!
//! The binaries print every payload they receive in a human-readable form.
//! Each submodule turns one of those printouts back into structured values:
//!
//! - [`senml`]: SenML-JSON arrays (`application/senml+json`)
//! - [`lwm2m_json`]: legacy LwM2M-JSON objects (`application/vnd.oma.lwm2m+json`)
//! - [`tlv`]: the nested TLV hex dump (`application/vnd.oma.lwm2m+tlv`)
//! - [`text`]: plain-text values (`text/plain`)
//!
//! The JSON formats share the [`Record`] model and the strict [`find`] lookup.

pub mod dump;
pub mod lwm2m_json;
pub mod senml;
pub mod text;
pub mod tlv;

use serde::Deserialize;
use std::fmt;

use crate::common::{Error, Result};

/// Content format announced by a `N bytes received of type <mime>:` line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    SenmlJson,
    Lwm2mJson,
    Tlv,
    Text,
}

impl ContentFormat {
    /// All formats, in detection priority order
    pub const ALL: [ContentFormat; 4] = [Self::SenmlJson, Self::Lwm2mJson, Self::Tlv, Self::Text];

    /// The marker the binaries print in front of a payload of this format
    pub fn marker(self) -> &'static str {
        match self {
            Self::SenmlJson => "application/senml+json:",
            Self::Lwm2mJson => "application/vnd.oma.lwm2m+json:",
            Self::Tlv => "application/vnd.oma.lwm2m+tlv:",
            Self::Text => "text/plain:",
        }
    }

    /// Detect the format of the first payload in a capture
    pub fn detect(text: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .filter_map(|format| text.find(format.marker()).map(|idx| (idx, *format)))
            .min_by_key(|(idx, _)| *idx)
            .map(|(_, format)| format)
    }

    /// Parse a user-supplied format name
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "senml-json" | "senml_json" | "senml" => Ok(Self::SenmlJson),
            "lwm2m-json" | "lwm2m_json" | "json" => Ok(Self::Lwm2mJson),
            "tlv" => Ok(Self::Tlv),
            "text" | "plain" => Ok(Self::Text),
            _ => Err(Error::Config(format!(
                "Unknown content format '{}'. Supported: senml-json, lwm2m-json, tlv, text",
                s
            ))),
        }
    }
}

impl fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SenmlJson => write!(f, "senml-json"),
            Self::Lwm2mJson => write!(f, "lwm2m-json"),
            Self::Tlv => write!(f, "tlv"),
            Self::Text => write!(f, "text"),
        }
    }
}

/// Kind of value a record field carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    /// `bn`
    BaseName,
    /// `v`
    Number,
    /// `vs` (LwM2M-JSON: `sv`)
    String,
    /// `vb` (LwM2M-JSON: `bv`)
    Boolean,
}

impl Label {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "bn" => Ok(Self::BaseName),
            "v" => Ok(Self::Number),
            "vs" | "sv" => Ok(Self::String),
            "vb" | "bv" => Ok(Self::Boolean),
            _ => Err(Error::Config(format!(
                "Unknown record label '{}'. Supported: bn, v, vs, vb",
                s
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BaseName => "bn",
            Self::Number => "v",
            Self::String => "vs",
            Self::Boolean => "vb",
        }
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Label::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded value
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    Number(serde_json::Number),
    String(String),
    Boolean(bool),
}

impl RecordValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Compare against a JSON value taken from a scenario file
    ///
    /// Numbers compare numerically so `100` matches `100.0`.
    pub fn matches_json(&self, expected: &serde_json::Value) -> bool {
        match (self, expected) {
            (Self::Number(a), serde_json::Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_f64() == b.as_f64(),
            },
            (Self::String(a), serde_json::Value::String(b)) => a == b,
            (Self::Boolean(a), serde_json::Value::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for RecordValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{:?}", s),
            Self::Boolean(b) => write!(f, "{}", b),
        }
    }
}

/// One resource record of a JSON payload
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Path relative to the base name (`n`); empty when absent
    pub name: String,
    /// Base name (`bn`) if this record carries one
    pub base_name: Option<String>,
    /// The record's value, if any
    pub value: Option<RecordValue>,
}

impl Record {
    /// The value stored under `label`
    pub fn get(&self, label: Label) -> Option<RecordValue> {
        match label {
            Label::BaseName => self.base_name.clone().map(RecordValue::String),
            Label::Number => self.value.clone().filter(|v| matches!(v, RecordValue::Number(_))),
            Label::String => self.value.clone().filter(|v| matches!(v, RecordValue::String(_))),
            Label::Boolean => self.value.clone().filter(|v| matches!(v, RecordValue::Boolean(_))),
        }
    }
}

/// Look up `label` on the first record named `urn`
///
/// Absence is an error: a resource the test expects but the payload lacks is
/// a failure, not a default.
pub fn find(records: &[Record], urn: &str, label: Label) -> Result<RecordValue> {
    records
        .iter()
        .find(|record| record.name == urn)
        .and_then(|record| record.get(label))
        .ok_or_else(|| Error::decode_not_found(urn, label.as_str()))
}

/// Base name of a record list (the first `bn` present)
pub fn base_name(records: &[Record]) -> Option<&str> {
    records.iter().find_map(|record| record.base_name.as_deref())
}

/// Return the payload line following the first `marker` in a capture
pub(crate) fn payload_after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let start = text.find(marker)? + marker.len();
    text[start..]
        .split('\n')
        .map(|line| line.trim_matches(|c: char| c.is_whitespace()))
        .find(|line| !line.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<Record> {
        vec![
            Record {
                name: "0/0".to_string(),
                base_name: Some("/1/".to_string()),
                value: Some(RecordValue::Number(123.into())),
            },
            Record {
                name: "0/6".to_string(),
                base_name: None,
                value: Some(RecordValue::Boolean(false)),
            },
        ]
    }

    #[test]
    fn test_find_by_label() {
        let records = records();
        assert_eq!(find(&records, "0/0", Label::Number).unwrap().as_i64(), Some(123));
        assert_eq!(
            find(&records, "0/0", Label::BaseName).unwrap().as_str(),
            Some("/1/")
        );
        assert_eq!(find(&records, "0/6", Label::Boolean).unwrap().as_bool(), Some(false));
    }

    #[test]
    fn test_find_missing_urn_or_label() {
        let records = records();
        assert!(matches!(
            find(&records, "0/9", Label::Number),
            Err(Error::DecodeNotFound { .. })
        ));
        // Present record, wrong kind of value
        assert!(matches!(
            find(&records, "0/6", Label::String),
            Err(Error::DecodeNotFound { .. })
        ));
    }

    #[test]
    fn test_label_aliases() {
        assert_eq!(Label::parse("sv").unwrap(), Label::String);
        assert_eq!(Label::parse("bv").unwrap(), Label::Boolean);
        assert!(Label::parse("t").is_err());
    }

    #[test]
    fn test_detect_picks_first_marker() {
        let text = "2 bytes received of type text/plain:\n ... application/senml+json:";
        assert_eq!(ContentFormat::detect(text), Some(ContentFormat::Text));
        assert_eq!(ContentFormat::detect("no payload here"), None);
    }

    #[test]
    fn test_matches_json_numbers() {
        let value = RecordValue::Number(100.into());
        assert!(value.matches_json(&serde_json::json!(100)));
        assert!(value.matches_json(&serde_json::json!(100.0)));
        assert!(!value.matches_json(&serde_json::json!("100")));
    }

    #[test]
    fn test_payload_after_skips_blank_lines() {
        let text = "of type application/senml+json:\r\r\n    [{\"n\":\"0\"}]\r\r\n";
        assert_eq!(
            payload_after(text, "application/senml+json:"),
            Some("[{\"n\":\"0\"}]")
        );
    }
}
