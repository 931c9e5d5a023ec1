//! Test scenario configuration types
//!
//! Defines the data structures for deserializing YAML test scenarios.

use serde::Deserialize;
use std::path::PathBuf;

use crate::decode::Label;
use crate::notify::CountBounds;
use crate::registration::RegistrationKind;
use crate::session::{Encoding, Role};

/// A complete test scenario loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct TestScenario {
    /// Name of the test scenario
    pub name: String,
    /// Optional description of what the test verifies
    pub description: Option<String>,
    /// Binaries to start, in order; they are quit in reverse order
    pub sessions: Vec<SessionConfig>,
    /// The sequence of test steps to execute
    pub steps: Vec<TestStep>,
}

/// One binary taking part in the scenario
#[derive(Deserialize, Debug)]
pub struct SessionConfig {
    /// Name steps use to address this session
    pub name: String,
    /// Which binary to run
    pub role: Role,
    /// Executable, relative to the scenario file; overrides the configured binary
    pub program: Option<PathBuf>,
    /// Scenario-specific arguments, appended to the configured ones
    #[serde(default)]
    pub args: Vec<String>,
    /// Expectation timeout; defaults to the configured timeout for the role
    pub timeout_secs: Option<f64>,
    #[serde(default)]
    pub encoding: Encoding,
    /// Text that must appear before the first step runs
    pub ready: Option<String>,
}

/// A single test step in the execution flow
#[derive(Deserialize, Debug)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Send a command line, optionally waiting for a response
    Command {
        session: String,
        command: String,
        /// Literal response that must follow (e.g. "OK")
        expect: Option<String>,
    },
    /// Wait for literal text
    WaitText {
        session: String,
        text: String,
        /// Overrides the session timeout for this wait
        timeout_secs: Option<f64>,
    },
    /// Wait for the next packet printout and check it
    WaitPacket {
        session: String,
        /// Substrings the packet text must contain
        #[serde(default)]
        contains: Vec<String>,
        /// Typed assertions on the decoded payload
        content: Option<ContentAssertion>,
        /// Expected registration or update block
        registration: Option<RegistrationExpectation>,
    },
    /// Sample output for a while and check the window
    WaitTime {
        session: String,
        secs: f64,
        #[serde(default)]
        contains: Vec<String>,
        /// Bounds on literal occurrence counts
        #[serde(default)]
        counts: Vec<CountAssertion>,
        /// Bounds on per-path notification counts
        #[serde(default)]
        notifications: Vec<NotificationAssertion>,
        /// Assertions on the SenML payloads in the window
        payloads: Option<PayloadAssertions>,
    },
}

impl TestStep {
    /// Session the step is addressed to
    pub fn session(&self) -> &str {
        match self {
            Self::Command { session, .. }
            | Self::WaitText { session, .. }
            | Self::WaitPacket { session, .. }
            | Self::WaitTime { session, .. } => session,
        }
    }
}

/// Assertions on a decoded payload, by content format
#[derive(Deserialize, Debug)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ContentAssertion {
    SenmlJson {
        #[serde(default)]
        records: Vec<RecordAssertion>,
        /// Every record name must start with this prefix
        names_start_with: Option<String>,
    },
    Lwm2mJson {
        base_name: Option<String>,
        #[serde(default)]
        records: Vec<RecordAssertion>,
    },
    Tlv {
        resources: Vec<ResourceAssertion>,
    },
    Text {
        value: String,
    },
}

/// Assertion on one record of a JSON payload
#[derive(Deserialize, Debug, Clone)]
pub struct RecordAssertion {
    /// Record name (`n`)
    pub n: String,
    /// Label the value is stored under
    pub label: Label,
    /// Expected value
    pub equals: Option<serde_json::Value>,
    /// Lower bound (exclusive) for numeric values
    pub greater_than: Option<f64>,
}

/// Expected value of one top-level TLV resource
#[derive(Deserialize, Debug)]
pub struct ResourceAssertion {
    pub id: u16,
    pub value: String,
}

/// Expected registration fields; absent fields are not checked
#[derive(Deserialize, Debug, Default)]
pub struct RegistrationExpectation {
    pub client_id: Option<u32>,
    pub event: Option<RegistrationKind>,
    pub endpoint: Option<String>,
    pub version: Option<String>,
    pub binding: Option<String>,
    pub lifetime: Option<u32>,
    /// Substrings the raw object list must contain
    #[serde(default)]
    pub objects_contain: Vec<String>,
}

/// Bounds on how often a literal appears in a window
#[derive(Deserialize, Debug)]
pub struct CountAssertion {
    pub text: String,
    #[serde(flatten)]
    pub bounds: CountBounds,
}

/// Bounds on notifications for one path
#[derive(Deserialize, Debug)]
pub struct NotificationAssertion {
    #[serde(default)]
    pub client: u32,
    pub path: String,
    #[serde(flatten)]
    pub bounds: CountBounds,
}

/// Assertions on the payloads of a window, grouped by base name
#[derive(Deserialize, Debug)]
pub struct PayloadAssertions {
    pub groups: Vec<PayloadGroup>,
    /// Fail on payloads whose base name matches no group
    #[serde(default)]
    pub exclusive: bool,
}

/// Records every payload with base name `bn` must satisfy
#[derive(Deserialize, Debug)]
pub struct PayloadGroup {
    pub bn: String,
    pub records: Vec<RecordAssertion>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scenario() {
        let yaml = r#"
name: read on object
sessions:
  - name: server
    role: server
  - name: client
    role: client
    args: ["-n", "testlwm2mclient"]
    ready: STATE_READY
steps:
  - action: command
    session: server
    command: read 0 /1
    expect: OK
  - action: wait_packet
    session: server
    contains: [COAP_205_CONTENT]
    content:
      format: senml_json
      records:
        - { n: "0/0", label: v, equals: 123 }
        - { n: "0/0", label: bn, equals: "/1/" }
        - { n: "0/13", label: v, greater_than: 0 }
  - action: wait_time
    session: server
    secs: 20
    counts:
      - { text: "Client #0 updated.", min: 2, max: 3 }
    notifications:
      - { path: /3/0/7, min: 1, max: 4 }
    payloads:
      exclusive: true
      groups:
        - bn: /3/0/7/
          records:
            - { n: "0", label: v, equals: 3800 }
"#;
        let scenario: TestScenario = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(scenario.sessions.len(), 2);
        assert_eq!(scenario.sessions[1].role, Role::Client);
        assert_eq!(scenario.sessions[1].ready.as_deref(), Some("STATE_READY"));
        assert_eq!(scenario.steps.len(), 3);
        assert_eq!(scenario.steps[0].session(), "server");

        match &scenario.steps[1] {
            TestStep::WaitPacket {
                content: Some(ContentAssertion::SenmlJson { records, .. }),
                ..
            } => {
                assert_eq!(records[1].label, Label::BaseName);
                assert_eq!(records[2].greater_than, Some(0.0));
            }
            other => panic!("unexpected step {:?}", other),
        }

        match &scenario.steps[2] {
            TestStep::WaitTime {
                counts,
                notifications,
                payloads,
                ..
            } => {
                assert_eq!(counts[0].bounds, CountBounds::between(2, 3));
                assert_eq!(notifications[0].client, 0);
                assert!(payloads.as_ref().unwrap().exclusive);
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_parse_tlv_and_registration() {
        let yaml = r#"
action: wait_packet
session: server
registration:
  event: registered
  lifetime: 300
  objects_contain: ["/1 (1.1)"]
content:
  format: tlv
  resources:
    - { id: 0, value: Open Mobile Alliance }
"#;
        let step: TestStep = serde_yaml::from_str(yaml).unwrap();
        match step {
            TestStep::WaitPacket {
                registration: Some(reg),
                content: Some(ContentAssertion::Tlv { resources }),
                ..
            } => {
                assert_eq!(reg.event, Some(RegistrationKind::Registered));
                assert_eq!(reg.lifetime, Some(300));
                assert_eq!(resources[0].value, "Open Mobile Alliance");
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let yaml = "action: inspect_locals\nsession: server\n";
        assert!(serde_yaml::from_str::<TestStep>(yaml).is_err());
    }
}
