//! Test runner implementation
//!
//! Starts the scenario's sessions, executes its steps in order and checks
//! every assertion against decoded output rather than raw strings wherever
//! a decoder exists.

use std::path::{Path, PathBuf};
use std::time::Duration;

use colored::Colorize;

use crate::common::config::Config;
use crate::common::paths::ensure_dir;
use crate::common::{Error, Result};
use crate::decode::{self, lwm2m_json, senml, text, tlv, Record};
use crate::notify::{self, NotificationSample};
use crate::registration;
use crate::session::{Session, SessionOptions};

use super::config::{
    ContentAssertion, CountAssertion, NotificationAssertion, PayloadAssertions, RecordAssertion,
    RegistrationExpectation, SessionConfig, TestScenario, TestStep,
};

/// Result of a test run
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub steps_run: usize,
    pub steps_total: usize,
    pub error: Option<String>,
    /// Output the failing step's session had not consumed yet
    pub unconsumed: Option<String>,
}

/// Characters of unconsumed output kept in a failure report
const UNCONSUMED_TAIL: usize = 400;

/// Sessions of a running scenario, in start order
struct Sessions(Vec<(String, Session)>);

impl Sessions {
    fn get(&mut self, name: &str) -> Result<&mut Session> {
        self.0
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, session)| session)
            .ok_or_else(|| Error::Config(format!("Unknown session '{}'", name)))
    }

    /// Quit every session, last started first
    async fn quit_all(self, verbose: bool) {
        for (name, session) in self.0.into_iter().rev() {
            match session.quit().await {
                Ok(()) if verbose => println!("  {} stopped {}", "·".dimmed(), name.dimmed()),
                Ok(()) => {}
                Err(e) => println!("  {} stopping {}: {}", "!".yellow(), name, e),
            }
        }
    }
}

/// Load a scenario file
pub fn load_scenario(path: &Path) -> Result<TestScenario> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read test scenario '{}': {}",
            path.display(),
            e
        ))
    })?;

    serde_yaml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse test scenario: {}", e)))
}

/// Run a test scenario from a YAML file
pub async fn run_scenario(path: &Path, config: &Config, verbose: bool) -> Result<TestResult> {
    let scenario = load_scenario(path)?;
    let steps_total = scenario.steps.len();

    println!(
        "\n{} {}",
        "Running Test:".blue().bold(),
        scenario.name.white().bold()
    );

    if let Some(desc) = &scenario.description {
        println!("  {}", desc.dimmed());
    }

    // Resolve relative program paths against the scenario file
    let scenario_dir = path.parent().unwrap_or(Path::new("."));

    println!("\n{}", "Sessions:".cyan());
    let mut sessions = Sessions(Vec::new());
    for session_config in &scenario.sessions {
        match start_session(session_config, scenario_dir, config, verbose).await {
            Ok(session) => sessions.0.push((session_config.name.clone(), session)),
            Err(e) => {
                println!("  {} {}: {}", "✗".red(), session_config.name, e);
                sessions.quit_all(verbose).await;
                return Ok(TestResult {
                    name: scenario.name.clone(),
                    passed: false,
                    steps_run: 0,
                    steps_total,
                    error: Some(e.to_string()),
                    unconsumed: None,
                });
            }
        }
    }

    // Execute test steps
    println!("\n{}", "Steps:".cyan());

    for (i, step) in scenario.steps.iter().enumerate() {
        let step_num = i + 1;

        if let Err(e) = execute_step(&mut sessions, step, step_num, verbose).await {
            println!("  {} Step {}: {}", "✗".red(), step_num, e);
            let unconsumed = sessions
                .get(step.session())
                .ok()
                .map(|session| tail(session.unconsumed(), UNCONSUMED_TAIL).to_string())
                .filter(|text| !text.trim().is_empty());
            if let Some(text) = &unconsumed {
                println!("    {} {}", "unconsumed:".dimmed(), text.escape_debug());
            }
            sessions.quit_all(verbose).await;

            return Ok(TestResult {
                name: scenario.name.clone(),
                passed: false,
                steps_run: step_num,
                steps_total,
                error: Some(e.to_string()),
                unconsumed,
            });
        }
    }

    sessions.quit_all(verbose).await;

    println!(
        "\n{} {}\n",
        "✓".green().bold(),
        "Test Passed".green().bold()
    );

    Ok(TestResult {
        name: scenario.name,
        passed: true,
        steps_run: steps_total,
        steps_total,
        error: None,
        unconsumed: None,
    })
}

/// The last `max_chars` characters of `text`
fn tail(text: &str, max_chars: usize) -> &str {
    match text.char_indices().rev().nth(max_chars) {
        Some((i, c)) => &text[i + c.len_utf8()..],
        None => text,
    }
}

/// Build the options for one scenario session
fn session_options(
    session: &SessionConfig,
    scenario_dir: &Path,
    config: &Config,
) -> Result<SessionOptions> {
    let (program, mut args) = match &session.program {
        Some(program) if program.is_relative() => (scenario_dir.join(program), Vec::new()),
        Some(program) => (program.clone(), Vec::new()),
        None => {
            let binary = config.binary(session.role)?;
            (binary.path, binary.args)
        }
    };
    args.extend(session.args.iter().cloned());

    let timeout = match session.timeout_secs {
        Some(secs) => secs_to_duration(secs)?,
        None => config.timeouts.for_role(session.role),
    };

    let mut options = SessionOptions::new(session.role, program)
        .args(args)
        .timeout(timeout)
        .encoding(session.encoding);
    options.quit_timeout = config.timeouts.quit();

    if let Some(dir) = config.transcript_dir() {
        ensure_dir(&dir)?;
        options = options.transcript(dir.join(session.role.transcript_name()));
    }

    Ok(options)
}

async fn start_session(
    session_config: &SessionConfig,
    scenario_dir: &Path,
    config: &Config,
    verbose: bool,
) -> Result<Session> {
    let options = session_options(session_config, scenario_dir, config)?;
    let program: PathBuf = options.program.clone();
    let mut session = Session::start(options)?;

    if let Some(ready) = &session_config.ready {
        if !session.wait_for_text(ready).await? {
            let _ = session.quit().await;
            return Err(Error::TestAssertion(format!(
                "Session '{}' never printed {:?}",
                session_config.name, ready
            )));
        }
    }

    println!(
        "  {} {} ({})",
        "✓".green(),
        session_config.name,
        session_config.role.to_string().dimmed()
    );
    if verbose {
        println!("    Program: {}", program.display().to_string().dimmed());
    }

    Ok(session)
}

fn secs_to_duration(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::Config(format!("Invalid duration: {} seconds", secs)))
}

/// Execute a single test step
async fn execute_step(
    sessions: &mut Sessions,
    step: &TestStep,
    step_num: usize,
    verbose: bool,
) -> Result<()> {
    let session = sessions.get(step.session())?;
    match step {
        TestStep::Command {
            command, expect, ..
        } => execute_command_step(session, command, expect.as_deref(), step_num).await,
        TestStep::WaitText {
            text, timeout_secs, ..
        } => execute_wait_text_step(session, text, *timeout_secs, step_num).await,
        TestStep::WaitPacket {
            contains,
            content,
            registration,
            ..
        } => {
            execute_wait_packet_step(
                session,
                contains,
                content.as_ref(),
                registration.as_ref(),
                step_num,
                verbose,
            )
            .await
        }
        TestStep::WaitTime {
            secs,
            contains,
            counts,
            notifications,
            payloads,
            ..
        } => {
            let sample = notify::sample(session, secs_to_duration(*secs)?).await?;
            check_contains(&sample.text, contains)?;
            check_window(&sample, counts, notifications, payloads.as_ref())?;
            println!(
                "  {} Step {}: wait {}s ({} checks)",
                "✓".green(),
                step_num,
                secs,
                contains.len() + counts.len() + notifications.len()
            );
            Ok(())
        }
    }
}

/// Execute a command step
async fn execute_command_step(
    session: &mut Session,
    command: &str,
    expect: Option<&str>,
    step_num: usize,
) -> Result<()> {
    match expect {
        Some(response) => {
            if !session.command_response(command, response).await? {
                return Err(Error::TestAssertion(format!(
                    "Command '{}' not answered with {:?}",
                    command, response
                )));
            }
        }
        None => session.send(command)?,
    }

    println!(
        "  {} Step {}: {}",
        "✓".green(),
        step_num,
        command.dimmed()
    );

    Ok(())
}

/// Execute a wait text step
async fn execute_wait_text_step(
    session: &mut Session,
    text: &str,
    timeout_secs: Option<f64>,
    step_num: usize,
) -> Result<()> {
    let found = match timeout_secs {
        Some(secs) => match session.expect_within(text, secs_to_duration(secs)?).await {
            Ok(_) => true,
            Err(e) if e.is_missed_expectation() => false,
            Err(e) => return Err(e),
        },
        None => session.wait_for_text(text).await?,
    };

    if !found {
        return Err(Error::TestAssertion(format!("Text {:?} not seen", text)));
    }

    println!(
        "  {} Step {}: saw {}",
        "✓".green(),
        step_num,
        format!("{:?}", text).dimmed()
    );

    Ok(())
}

/// Execute a wait packet step
async fn execute_wait_packet_step(
    session: &mut Session,
    contains: &[String],
    content: Option<&ContentAssertion>,
    registration: Option<&RegistrationExpectation>,
    step_num: usize,
    verbose: bool,
) -> Result<()> {
    let packet = session.wait_for_packet().await?;
    if verbose {
        println!("{}", packet.dimmed());
    }

    check_contains(&packet, contains)?;
    if let Some(content) = content {
        check_content(&packet, content)?;
    }
    if let Some(expected) = registration {
        check_registration(&packet, expected)?;
    }

    println!("  {} Step {}: packet", "✓".green(), step_num);

    Ok(())
}

fn check_contains(text: &str, expected: &[String]) -> Result<()> {
    for substr in expected {
        if !text.contains(substr.as_str()) {
            return Err(Error::TestAssertion(format!(
                "Output does not contain {:?}",
                substr
            )));
        }
    }
    Ok(())
}

fn check_record(records: &[Record], assertion: &RecordAssertion) -> Result<()> {
    let value = decode::find(records, &assertion.n, assertion.label)?;

    if let Some(expected) = &assertion.equals {
        if !value.matches_json(expected) {
            return Err(Error::TestAssertion(format!(
                "Record '{}' ({}): expected {}, got {}",
                assertion.n, assertion.label, expected, value
            )));
        }
    }

    if let Some(bound) = assertion.greater_than {
        match value.as_f64() {
            Some(actual) if actual > bound => {}
            _ => {
                return Err(Error::TestAssertion(format!(
                    "Record '{}' ({}): expected > {}, got {}",
                    assertion.n, assertion.label, bound, value
                )))
            }
        }
    }

    Ok(())
}

fn check_records(records: &[Record], assertions: &[RecordAssertion]) -> Result<()> {
    assertions
        .iter()
        .try_for_each(|assertion| check_record(records, assertion))
}

/// Decode the packet's payload and check it
fn check_content(packet: &str, content: &ContentAssertion) -> Result<()> {
    match content {
        ContentAssertion::SenmlJson {
            records: assertions,
            names_start_with,
        } => {
            let records = senml::from_capture(packet)?;
            if let Some(prefix) = names_start_with {
                if let Some(record) = records.iter().find(|r| !r.name.starts_with(prefix.as_str())) {
                    return Err(Error::TestAssertion(format!(
                        "Record '{}' does not start with '{}'",
                        record.name, prefix
                    )));
                }
            }
            check_records(&records, assertions)
        }
        ContentAssertion::Lwm2mJson {
            base_name,
            records: assertions,
        } => {
            let doc = lwm2m_json::from_capture(packet)?;
            if let Some(expected) = base_name {
                if doc.base_name.as_deref() != Some(expected.as_str()) {
                    return Err(Error::TestAssertion(format!(
                        "Base name: expected '{}', got {:?}",
                        expected, doc.base_name
                    )));
                }
            }
            check_records(&doc.records, assertions)
        }
        ContentAssertion::Tlv { resources } => {
            for resource in resources {
                match tlv::decode(packet, resource.id)? {
                    Some(value) if value == resource.value => {}
                    Some(value) => {
                        return Err(Error::TestAssertion(format!(
                            "TLV resource {}: expected {:?}, got {:?}",
                            resource.id, resource.value, value
                        )))
                    }
                    None => {
                        return Err(Error::TestAssertion(format!(
                            "TLV resource {} not in payload",
                            resource.id
                        )))
                    }
                }
            }
            Ok(())
        }
        ContentAssertion::Text { value } => {
            let actual = text::decode(packet)?;
            if &actual != value {
                return Err(Error::TestAssertion(format!(
                    "Text payload: expected {:?}, got {:?}",
                    value, actual
                )));
            }
            Ok(())
        }
    }
}

fn check_registration(packet: &str, expected: &RegistrationExpectation) -> Result<()> {
    let event = registration::parse(packet)?;

    fn mismatch<T: std::fmt::Debug>(field: &str, expected: &T, actual: &T) -> Error {
        Error::TestAssertion(format!(
            "Registration {}: expected {:?}, got {:?}",
            field, expected, actual
        ))
    }

    if let Some(id) = expected.client_id {
        if id != event.client_id {
            return Err(mismatch("client id", &id, &event.client_id));
        }
    }
    if let Some(kind) = expected.event {
        if kind != event.event {
            return Err(mismatch("event", &kind, &event.event));
        }
    }
    if let Some(endpoint) = &expected.endpoint {
        if endpoint != &event.endpoint {
            return Err(mismatch("endpoint", endpoint, &event.endpoint));
        }
    }
    if let Some(version) = &expected.version {
        if version != &event.version {
            return Err(mismatch("version", version, &event.version));
        }
    }
    if let Some(binding) = &expected.binding {
        if binding != &event.binding {
            return Err(mismatch("binding", binding, &event.binding));
        }
    }
    if let Some(lifetime) = expected.lifetime {
        if lifetime != event.lifetime {
            return Err(mismatch("lifetime", &lifetime, &event.lifetime));
        }
    }
    for object in &expected.objects_contain {
        if !event.objects.contains(object.as_str()) {
            return Err(Error::TestAssertion(format!(
                "Registration objects {:?} lack {:?}",
                event.objects, object
            )));
        }
    }

    Ok(())
}

fn check_window(
    sample: &NotificationSample,
    counts: &[CountAssertion],
    notifications: &[NotificationAssertion],
    payloads: Option<&PayloadAssertions>,
) -> Result<()> {
    for assertion in counts {
        let count = sample.count(&assertion.text);
        if !assertion.bounds.contains(count) {
            return Err(Error::TestAssertion(format!(
                "Expected {} occurrences of {:?}, got {}",
                assertion.bounds, assertion.text, count
            )));
        }
    }

    for assertion in notifications {
        sample.check_notify_count(assertion.client, &assertion.path, assertion.bounds)?;
    }

    if let Some(payloads) = payloads {
        for (bn, group) in sample.payloads_by_base_name()? {
            match payloads.groups.iter().find(|g| g.bn == bn) {
                Some(expected) => {
                    for records in &group {
                        check_records(records, &expected.records)?;
                    }
                }
                None if payloads.exclusive => {
                    return Err(Error::TestAssertion(format!(
                        "Unexpected payload with base name {:?}",
                        bn
                    )))
                }
                None => {}
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Label;
    use crate::notify::CountBounds;

    const OBJECT_1: &str = "\r\r\nClient #0 /1 : COAP_205_CONTENT\r\r\n    non block transfer\n\r\r\n    \
        124 bytes received of type application/senml+json:\r\r\n    \
        [{\"bn\":\"/1/\",\"n\":\"0/0\",\"v\":123},{\"n\":\"0/1\",\"v\":300},{\"n\":\"0/6\",\"vb\":false},{\"n\":\"0/7\",\"vs\":\"U\"}]\r\n";

    fn record(n: &str, label: Label, equals: serde_json::Value) -> RecordAssertion {
        RecordAssertion {
            n: n.to_string(),
            label,
            equals: Some(equals),
            greater_than: None,
        }
    }

    #[test]
    fn test_tail_keeps_last_chars() {
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("héllo", 4), "éllo");
        assert_eq!(tail("abc", 0), "");
    }

    #[test]
    fn test_senml_content_assertions() {
        let content = ContentAssertion::SenmlJson {
            records: vec![
                record("0/0", Label::Number, serde_json::json!(123)),
                record("0/0", Label::BaseName, serde_json::json!("/1/")),
                record("0/6", Label::Boolean, serde_json::json!(false)),
                record("0/7", Label::String, serde_json::json!("U")),
            ],
            names_start_with: Some("0/".to_string()),
        };
        check_content(OBJECT_1, &content).unwrap();
    }

    #[test]
    fn test_senml_value_mismatch_fails() {
        let content = ContentAssertion::SenmlJson {
            records: vec![record("0/1", Label::Number, serde_json::json!(20))],
            names_start_with: None,
        };
        assert!(matches!(
            check_content(OBJECT_1, &content),
            Err(Error::TestAssertion(_))
        ));
    }

    #[test]
    fn test_greater_than() {
        let records = senml::parse(r#"[{"n":"0/13","v":1700000000}]"#).unwrap();
        let mut assertion = RecordAssertion {
            n: "0/13".to_string(),
            label: Label::Number,
            equals: None,
            greater_than: Some(0.0),
        };
        check_record(&records, &assertion).unwrap();
        assertion.greater_than = Some(2e9);
        assert!(check_record(&records, &assertion).is_err());
    }

    #[test]
    fn test_registration_expectation() {
        let packet = "\r\r\nNew client #0 registered.\r\r\nClient #0:\r\r\n\tname: \"testlwm2mclient\"\r\r\n\
            \tversion: \"1.1\"\r\r\n\tbinding: \"UDP\"\r\r\n\tlifetime: 300 sec\r\r\n\
            \tobjects: /1 (1.1), /1/0, /3/0, \r\r\n";
        let expected = RegistrationExpectation {
            client_id: Some(0),
            event: Some(registration::RegistrationKind::Registered),
            endpoint: Some("testlwm2mclient".to_string()),
            lifetime: Some(300),
            objects_contain: vec!["/1 (1.1)".to_string(), "/1/0".to_string()],
            ..Default::default()
        };
        check_registration(packet, &expected).unwrap();

        let wrong = RegistrationExpectation {
            lifetime: Some(20),
            ..Default::default()
        };
        assert!(matches!(
            check_registration(packet, &wrong),
            Err(Error::TestAssertion(_))
        ));
    }

    #[test]
    fn test_window_counts() {
        let text = "Client #0 updated.\r\nClient #0 updated.\r\n\
                    \r\nNotify from client #0 /3/0/8 number 1\r\n";
        let sample = NotificationSample::new(text, Duration::from_secs(20));
        let counts = vec![CountAssertion {
            text: "Client #0 updated.".to_string(),
            bounds: CountBounds::between(2, 3),
        }];
        let notifications = vec![
            NotificationAssertion {
                client: 0,
                path: "/3/0/8".to_string(),
                bounds: CountBounds::at_least(1),
            },
            NotificationAssertion {
                client: 0,
                path: "/3/0/7".to_string(),
                bounds: CountBounds::exactly(0),
            },
        ];
        check_window(&sample, &counts, &notifications, None).unwrap();
    }

    #[test]
    fn test_exclusive_payload_groups() {
        let text = "    [{\"bn\":\"/3/0/9/\",\"n\":\"0\",\"v\":100}]\r\n";
        let sample = NotificationSample::new(text, Duration::from_secs(1));
        let payloads = PayloadAssertions {
            groups: vec![],
            exclusive: true,
        };
        assert!(check_window(&sample, &[], &[], Some(&payloads)).is_err());

        let lenient = PayloadAssertions {
            groups: vec![],
            exclusive: false,
        };
        check_window(&sample, &[], &[], Some(&lenient)).unwrap();
    }

    #[test]
    fn test_session_options_resolve_relative_program() {
        let session: SessionConfig = serde_yaml::from_str(
            "name: server\nrole: server\nprogram: bin/lwm2mserver\nargs: [\"-4\"]\ntimeout_secs: 0.5\n",
        )
        .unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.transcripts.dir = Some(tmp.path().join("transcripts"));

        let options = session_options(&session, Path::new("/scenarios"), &config).unwrap();
        assert_eq!(options.program, PathBuf::from("/scenarios/bin/lwm2mserver"));
        assert_eq!(options.args, vec!["-4"]);
        assert_eq!(options.timeout, Duration::from_millis(500));
        assert_eq!(
            options.transcript,
            Some(tmp.path().join("transcripts").join("lwm2mserver_log.txt"))
        );
    }

    #[test]
    fn test_load_scenario_errors() {
        assert!(matches!(
            load_scenario(Path::new("/nonexistent/scenario.yaml")),
            Err(Error::Config(_))
        ));
    }
}
