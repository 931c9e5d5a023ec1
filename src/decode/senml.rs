//! SenML-JSON decoder
//!
//! Payload example:
//!
//! ```text
//! [{"bn":"/1/","n":"0/0","v":123},{"n":"0/1","v":300},{"n":"0/6","vb":false},{"n":"0/7","vs":"U"}]
//! ```

use serde::Deserialize;

use super::{ContentFormat, Record, RecordValue};
use crate::common::{Error, Result};

/// One SenML record as it appears on the wire
#[derive(Debug, Deserialize)]
struct SenmlRecord {
    bn: Option<String>,
    n: Option<String>,
    v: Option<serde_json::Number>,
    vs: Option<String>,
    vb: Option<bool>,
}

impl SenmlRecord {
    fn into_record(self, index: usize) -> Result<Record> {
        let value = match (self.v, self.vs, self.vb) {
            (Some(v), None, None) => Some(RecordValue::Number(v)),
            (None, Some(vs), None) => Some(RecordValue::String(vs)),
            (None, None, Some(vb)) => Some(RecordValue::Boolean(vb)),
            (None, None, None) => None,
            _ => {
                return Err(Error::MalformedPayload(format!(
                    "SenML record {} carries more than one value",
                    index
                )))
            }
        };
        Ok(Record {
            name: self.n.unwrap_or_default(),
            base_name: self.bn,
            value,
        })
    }
}

/// Decode a SenML-JSON array
pub fn parse(json: &str) -> Result<Vec<Record>> {
    let raw: Vec<SenmlRecord> = serde_json::from_str(json)
        .map_err(|e| Error::MalformedPayload(format!("SenML-JSON: {}", e)))?;
    raw.into_iter()
        .enumerate()
        .map(|(i, record)| record.into_record(i))
        .collect()
}

/// Decode the first SenML-JSON payload in a captured transcript
pub fn from_capture(text: &str) -> Result<Vec<Record>> {
    let marker = ContentFormat::SenmlJson.marker();
    let payload = super::payload_after(text, marker)
        .ok_or_else(|| Error::MalformedPayload(format!("no '{}' payload in capture", marker)))?;
    parse(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{base_name, find, Label};

    const OBJECT_1: &str = r#"[{"bn":"/1/","n":"0/0","v":123},{"n":"0/1","v":300},{"n":"0/2","v":0},{"n":"0/3","v":0},{"n":"0/5","v":0},{"n":"0/6","vb":false},{"n":"0/7","vs":"U"}]"#;

    #[test]
    fn test_lookup_each_label() {
        let records = parse(OBJECT_1).unwrap();
        assert_eq!(records.len(), 7);
        assert_eq!(find(&records, "0/0", Label::Number).unwrap().as_i64(), Some(123));
        assert_eq!(find(&records, "0/0", Label::BaseName).unwrap().as_str(), Some("/1/"));
        assert_eq!(find(&records, "0/1", Label::Number).unwrap().as_i64(), Some(300));
        assert_eq!(find(&records, "0/6", Label::Boolean).unwrap().as_bool(), Some(false));
        assert_eq!(find(&records, "0/7", Label::String).unwrap().as_str(), Some("U"));
        assert_eq!(base_name(&records), Some("/1/"));
    }

    #[test]
    fn test_absent_urn_is_not_found() {
        let records = parse(OBJECT_1).unwrap();
        let err = find(&records, "0/4", Label::Number).unwrap_err();
        assert!(matches!(err, Error::DecodeNotFound { .. }));
    }

    #[test]
    fn test_first_record_wins() {
        let records = parse(r#"[{"n":"0","v":1},{"n":"0","v":2}]"#).unwrap();
        assert_eq!(find(&records, "0", Label::Number).unwrap().as_i64(), Some(1));
    }

    #[test]
    fn test_float_values() {
        let records = parse(r#"[{"bn":"/3303/0/5700","v":21.5}]"#).unwrap();
        assert_eq!(records[0].name, "");
        assert_eq!(find(&records, "", Label::Number).unwrap().as_f64(), Some(21.5));
    }

    #[test]
    fn test_two_values_is_malformed() {
        let err = parse(r#"[{"n":"0","v":1,"vs":"1"}]"#).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
    }

    #[test]
    fn test_not_an_array_is_malformed() {
        assert!(matches!(
            parse(r#"{"bn":"/3/0/"}"#),
            Err(Error::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let err = parse(r#"[{"n":"0","v":1"#).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)), "{}", err);
    }

    #[test]
    fn test_from_capture() {
        let capture = "\r\r\nClient #0 /1 : COAP_205_CONTENT\r\r\n    non block transfer\n\r\r\n    \
                       124 bytes received of type application/senml+json:\r\r\n    \
                       [{\"bn\":\"/1/\",\"n\":\"0/0\",\"v\":123}]\r\r\n";
        let records = from_capture(capture).unwrap();
        assert_eq!(find(&records, "0/0", Label::Number).unwrap().as_i64(), Some(123));
    }
}
