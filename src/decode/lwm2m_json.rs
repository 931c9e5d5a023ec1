//! LwM2M-JSON decoder (`application/vnd.oma.lwm2m+json`)
//!
//! A single object with a base name and an ordered record list:
//!
//! ```text
//! {"bn":"/3/0/","e":[{"n":"0","sv":"Open Mobile Alliance"},{"n":"9","v":100}]}
//! ```
//!
//! Record names are relative to `bn` without a leading slash. Value labels
//! follow the LwM2M 1.0 spelling (`sv`, `bv`); the SenML spelling is
//! accepted as well.

use serde::Deserialize;

use super::{ContentFormat, Record, RecordValue};
use crate::common::{Error, Result};

#[derive(Debug, Deserialize)]
struct Document {
    bn: Option<String>,
    e: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    n: Option<String>,
    v: Option<serde_json::Number>,
    #[serde(alias = "vs")]
    sv: Option<String>,
    #[serde(alias = "vb")]
    bv: Option<bool>,
}

/// A decoded LwM2M-JSON payload
#[derive(Debug, Clone, PartialEq)]
pub struct Lwm2mJson {
    pub base_name: Option<String>,
    pub records: Vec<Record>,
}

/// Decode an LwM2M-JSON object
pub fn parse(json: &str) -> Result<Lwm2mJson> {
    let doc: Document = serde_json::from_str(json)
        .map_err(|e| Error::MalformedPayload(format!("LwM2M-JSON: {}", e)))?;

    let records = doc
        .e
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let value = match (entry.v, entry.sv, entry.bv) {
                (Some(v), None, None) => Some(RecordValue::Number(v)),
                (None, Some(sv), None) => Some(RecordValue::String(sv)),
                (None, None, Some(bv)) => Some(RecordValue::Boolean(bv)),
                (None, None, None) => None,
                _ => {
                    return Err(Error::MalformedPayload(format!(
                        "LwM2M-JSON entry {} carries more than one value",
                        i
                    )))
                }
            };
            Ok(Record {
                name: entry.n.unwrap_or_default(),
                base_name: None,
                value,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Lwm2mJson {
        base_name: doc.bn,
        records,
    })
}

/// Decode the first LwM2M-JSON payload in a captured transcript
pub fn from_capture(text: &str) -> Result<Lwm2mJson> {
    let marker = ContentFormat::Lwm2mJson.marker();
    let payload = super::payload_after(text, marker)
        .ok_or_else(|| Error::MalformedPayload(format!("no '{}' payload in capture", marker)))?;
    parse(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{find, Label};

    #[test]
    fn test_parse_device_object() {
        let doc = parse(
            r#"{"bn":"/3/0/","e":[{"n":"0","sv":"Open Mobile Alliance"},{"n":"9","v":100},{"n":"16","sv":"U"}]}"#,
        )
        .unwrap();
        assert_eq!(doc.base_name.as_deref(), Some("/3/0/"));
        assert_eq!(
            find(&doc.records, "0", Label::String).unwrap().as_str(),
            Some("Open Mobile Alliance")
        );
        assert_eq!(find(&doc.records, "9", Label::Number).unwrap().as_i64(), Some(100));
    }

    #[test]
    fn test_lookup_is_order_independent() {
        let a = parse(r#"{"bn":"/3/0/","e":[{"n":"9","v":100},{"n":"16","sv":"U"}]}"#).unwrap();
        let b = parse(r#"{"e":[{"n":"16","sv":"U"},{"n":"9","v":100}],"bn":"/3/0/"}"#).unwrap();
        assert_eq!(a.base_name, b.base_name);
        for doc in [&a, &b] {
            assert_eq!(find(&doc.records, "16", Label::String).unwrap().as_str(), Some("U"));
            assert_eq!(find(&doc.records, "9", Label::Number).unwrap().as_i64(), Some(100));
        }
    }

    #[test]
    fn test_senml_spelling_accepted() {
        let doc = parse(r#"{"bn":"/1/0/","e":[{"n":"6","vb":true},{"n":"7","vs":"U"}]}"#).unwrap();
        assert_eq!(find(&doc.records, "6", Label::Boolean).unwrap().as_bool(), Some(true));
        assert_eq!(find(&doc.records, "7", Label::String).unwrap().as_str(), Some("U"));
    }

    #[test]
    fn test_missing_entries_is_malformed() {
        assert!(matches!(
            parse(r#"{"bn":"/3/0/"}"#),
            Err(Error::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_absent_name_is_not_found() {
        let doc = parse(r#"{"bn":"/3/0/","e":[{"n":"0","sv":"x"}]}"#).unwrap();
        assert!(matches!(
            find(&doc.records, "1", Label::String),
            Err(Error::DecodeNotFound { .. })
        ));
    }
}
