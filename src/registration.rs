//! Registration event parser
//!
//! The server announces registrations and updates with a header line
//! followed by a dump of the client record:
//!
//! ```text
//! New client #0 registered.
//! Client #0:
//!         name: "testlwm2mclient"
//!         version: "1.1"
//!         binding: "UDP"
//!         lifetime: 300 sec
//!         objects: /1 (1.1), /1/0, /2/0, /3/0, /4/0, /5/0,
//! ```
//!
//! Parsing is strict: every field must be present exactly once and match
//! its expected shape, otherwise the block is reported as malformed.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::{Error, Result};

/// What the server reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationKind {
    Registered,
    Updated,
}

impl fmt::Display for RegistrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered => write!(f, "registered"),
            Self::Updated => write!(f, "updated"),
        }
    }
}

/// One entry of the `objects:` clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectLink {
    /// `/1` or `/1/0`
    pub path: String,
    /// Object version, when the server printed one (`/1 (1.1)`)
    pub version: Option<String>,
}

/// A parsed registration or update block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationEvent {
    pub client_id: u32,
    pub event: RegistrationKind,
    pub endpoint: String,
    pub version: String,
    pub binding: String,
    /// Lifetime in seconds
    pub lifetime: u32,
    /// The `objects:` clause as printed, trailing separator removed
    pub objects: String,
    pub object_links: Vec<ObjectLink>,
}

impl RegistrationEvent {
    /// Whether the object list announces `path` (exact match)
    pub fn has_object(&self, path: &str) -> bool {
        self.object_links.iter().any(|link| link.path == path)
    }
}

#[derive(Default)]
struct Fields {
    dump_id: Option<u32>,
    endpoint: Option<String>,
    version: Option<String>,
    binding: Option<String>,
    lifetime: Option<u32>,
}

fn set_once<T>(slot: &mut Option<T>, value: T, field: &str) -> Result<()> {
    if slot.is_some() {
        return Err(Error::MalformedPayload(format!(
            "registration block repeats '{}'",
            field
        )));
    }
    *slot = Some(value);
    Ok(())
}

fn required<T>(slot: Option<T>, field: &str) -> Result<T> {
    slot.ok_or_else(|| Error::MalformedPayload(format!("registration block lacks '{}'", field)))
}

/// Parse the first registration or update block in `text`
pub fn parse(text: &str) -> Result<RegistrationEvent> {
    let mut lines = text.split('\n').map(clean);
    while let Some(line) = lines.next() {
        if let Some((client_id, event)) = parse_header(line) {
            return parse_block(client_id, event, &mut lines);
        }
    }
    Err(Error::MalformedPayload(
        "no registration or update header found".to_string(),
    ))
}

/// Parse every registration and update block in `text`, in order
pub fn parse_all(text: &str) -> Result<Vec<RegistrationEvent>> {
    let mut events = Vec::new();
    let mut lines = text.split('\n').map(clean);
    while let Some(line) = lines.next() {
        if let Some((client_id, event)) = parse_header(line) {
            events.push(parse_block(client_id, event, &mut lines)?);
        }
    }
    Ok(events)
}

fn clean(line: &str) -> &str {
    line.trim_matches(|c: char| c == '\r' || c == '\n')
}

/// `New client #<id> registered.` or `Client #<id> updated.`
fn parse_header(line: &str) -> Option<(u32, RegistrationKind)> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("New client #") {
        let id = rest.strip_suffix(" registered.")?;
        return id.parse().ok().map(|id| (id, RegistrationKind::Registered));
    }
    let id = line.strip_prefix("Client #")?.strip_suffix(" updated.")?;
    id.parse().ok().map(|id| (id, RegistrationKind::Updated))
}

fn parse_block<'a>(
    client_id: u32,
    event: RegistrationKind,
    lines: &mut impl Iterator<Item = &'a str>,
) -> Result<RegistrationEvent> {
    let mut fields = Fields::default();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(id) = line.strip_prefix("Client #").and_then(|r| r.strip_suffix(':')) {
            let id = id.parse().map_err(|_| {
                Error::MalformedPayload(format!("bad client id in '{}'", line))
            })?;
            set_once(&mut fields.dump_id, id, "Client #")?;
        } else if let Some(value) = line.strip_prefix("name:") {
            let name = quoted(value, "name")?;
            if !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') || name.is_empty() {
                return Err(Error::MalformedPayload(format!("bad endpoint name {:?}", name)));
            }
            set_once(&mut fields.endpoint, name.to_string(), "name")?;
        } else if let Some(value) = line.strip_prefix("version:") {
            let version = quoted(value, "version")?;
            if !is_dotted_numeric(version) {
                return Err(Error::MalformedPayload(format!("bad version {:?}", version)));
            }
            set_once(&mut fields.version, version.to_string(), "version")?;
        } else if let Some(value) = line.strip_prefix("binding:") {
            let binding = quoted(value, "binding")?;
            if binding.is_empty() || !binding.chars().all(|c| c.is_ascii_uppercase()) {
                return Err(Error::MalformedPayload(format!("bad binding {:?}", binding)));
            }
            set_once(&mut fields.binding, binding.to_string(), "binding")?;
        } else if let Some(value) = line.strip_prefix("lifetime:") {
            let secs = value
                .trim()
                .strip_suffix("sec")
                .and_then(|n| n.trim().parse().ok())
                .ok_or_else(|| Error::MalformedPayload(format!("bad lifetime '{}'", line)))?;
            set_once(&mut fields.lifetime, secs, "lifetime")?;
        } else if let Some(value) = line.strip_prefix("objects:") {
            // The objects line closes the block
            return finish(client_id, event, fields, value);
        } else if parse_header(line).is_some() {
            break;
        }
        // Other client attributes (msisdn, alternative path) are not tracked
    }

    Err(Error::MalformedPayload(format!(
        "registration block for client #{} lacks 'objects'",
        client_id
    )))
}

fn finish(
    client_id: u32,
    event: RegistrationKind,
    fields: Fields,
    objects: &str,
) -> Result<RegistrationEvent> {
    if let Some(dump_id) = fields.dump_id {
        if dump_id != client_id {
            return Err(Error::MalformedPayload(format!(
                "header names client #{} but record is client #{}",
                client_id, dump_id
            )));
        }
    }

    let objects = objects.trim().trim_end_matches(',').trim_end().to_string();
    let object_links = parse_objects(&objects)?;
    if object_links.is_empty() {
        return Err(Error::MalformedPayload(
            "registration block lacks 'objects'".to_string(),
        ));
    }

    Ok(RegistrationEvent {
        client_id,
        event,
        endpoint: required(fields.endpoint, "name")?,
        version: required(fields.version, "version")?,
        binding: required(fields.binding, "binding")?,
        lifetime: required(fields.lifetime, "lifetime")?,
        objects,
        object_links,
    })
}

/// `"value"` → value
fn quoted<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    value
        .trim()
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .ok_or_else(|| Error::MalformedPayload(format!("'{}' is not quoted", field)))
}

fn is_dotted_numeric(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

/// `/1 (1.1), /1/0, /3/0` → links
fn parse_objects(objects: &str) -> Result<Vec<ObjectLink>> {
    objects
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (path, version) = match entry.split_once(' ') {
                Some((path, rest)) => {
                    let version = rest
                        .trim()
                        .strip_prefix('(')
                        .and_then(|v| v.strip_suffix(')'))
                        .filter(|v| is_dotted_numeric(v))
                        .ok_or_else(|| {
                            Error::MalformedPayload(format!("bad object entry '{}'", entry))
                        })?;
                    (path, Some(version.to_string()))
                }
                None => (entry, None),
            };
            let well_formed = path.starts_with('/')
                && path[1..]
                    .split('/')
                    .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_digit()));
            if !well_formed {
                return Err(Error::MalformedPayload(format!("bad object path '{}'", path)));
            }
            Ok(ObjectLink {
                path: path.to_string(),
                version,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTERED: &str = "\r\r\nNew client #0 registered.\r\r\nClient #0:\r\r\n\tname: \"testlwm2mclient\"\r\r\n\
        \tversion: \"1.1\"\r\r\n\tbinding: \"UDP\"\r\r\n\tlifetime: 300 sec\r\r\n\
        \tobjects: /1 (1.1), /1/0, /2/0, /3/0, /4/0, /5/0, /6/0, /7/0, /31024/10, /31024/11, \r\r\n";

    #[test]
    fn test_parse_registered_block() {
        let event = parse(REGISTERED).unwrap();
        assert_eq!(event.client_id, 0);
        assert_eq!(event.event, RegistrationKind::Registered);
        assert_eq!(event.endpoint, "testlwm2mclient");
        assert_eq!(event.version, "1.1");
        assert_eq!(event.binding, "UDP");
        assert_eq!(event.lifetime, 300);
        assert!(event.objects.contains("/1 (1.1)"));
        assert!(event.objects.contains("/1/0"));
        assert!(!event.objects.ends_with(','));
    }

    #[test]
    fn test_object_links() {
        let event = parse(REGISTERED).unwrap();
        assert_eq!(
            event.object_links[0],
            ObjectLink {
                path: "/1".to_string(),
                version: Some("1.1".to_string())
            }
        );
        assert!(event.has_object("/31024/11"));
        assert!(!event.has_object("/31024"));
        assert_eq!(event.object_links.len(), 10);
    }

    #[test]
    fn test_parse_update() {
        let text = REGISTERED
            .replace("New client #0 registered.", "Client #0 updated.")
            .replace("300 sec", "20 sec");
        let event = parse(&text).unwrap();
        assert_eq!(event.event, RegistrationKind::Updated);
        assert_eq!(event.lifetime, 20);
    }

    #[test]
    fn test_parse_all_in_order() {
        let update = REGISTERED.replace("New client #0 registered.", "Client #0 updated.");
        let text = format!("{}> \r\r\n{}", REGISTERED, update);
        let events = parse_all(&text).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, RegistrationKind::Registered);
        assert_eq!(events[1].event, RegistrationKind::Updated);
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let text = REGISTERED.replace("\tbinding: \"UDP\"\r\r\n", "");
        assert!(matches!(parse(&text), Err(Error::MalformedPayload(_))));
    }

    #[test]
    fn test_empty_objects_is_malformed() {
        let start = REGISTERED.find("\tobjects: ").unwrap();
        let end = start + REGISTERED[start..].find("\r\r\n").unwrap();
        let text = format!("{}\tobjects: {}", &REGISTERED[..start], &REGISTERED[end..]);
        match parse(&text) {
            Err(Error::MalformedPayload(msg)) => assert!(msg.contains("objects"), "{}", msg),
            other => panic!("expected malformed payload, got {:?}", other),
        }

        let text = format!("{}\tobjects: , \r\r\n", &REGISTERED[..start]);
        assert!(matches!(parse(&text), Err(Error::MalformedPayload(_))));
    }

    #[test]
    fn test_duplicate_field_is_malformed() {
        let text = REGISTERED.replace(
            "\tlifetime: 300 sec\r\r\n",
            "\tlifetime: 300 sec\r\r\n\tlifetime: 20 sec\r\r\n",
        );
        assert!(matches!(parse(&text), Err(Error::MalformedPayload(_))));
    }

    #[test]
    fn test_bad_shapes_are_malformed() {
        for (from, to) in [
            ("\"1.1\"", "\"v1.1\""),
            ("\"UDP\"", "\"udp\""),
            ("300 sec", "three sec"),
            ("\"testlwm2mclient\"", "testlwm2mclient"),
            ("/1 (1.1)", "/1 (one)"),
        ] {
            let text = REGISTERED.replace(from, to);
            assert!(
                matches!(parse(&text), Err(Error::MalformedPayload(_))),
                "{} -> {} should be rejected",
                from,
                to
            );
        }
    }

    #[test]
    fn test_mismatched_dump_id_is_malformed() {
        let text = REGISTERED.replace("Client #0:", "Client #1:");
        assert!(matches!(parse(&text), Err(Error::MalformedPayload(_))));
    }

    #[test]
    fn test_no_header() {
        assert!(matches!(parse("STATE_READY\r\n"), Err(Error::MalformedPayload(_))));
        assert!(parse_all("nothing here").unwrap().is_empty());
    }

    #[test]
    fn test_header_grammar() {
        assert_eq!(
            parse_header("New client #12 registered."),
            Some((12, RegistrationKind::Registered))
        );
        assert_eq!(parse_header("Client #3 updated."), Some((3, RegistrationKind::Updated)));
        assert_eq!(parse_header("Client #3 unregistered."), None);
        assert_eq!(parse_header("Client #3:"), None);
    }
}
