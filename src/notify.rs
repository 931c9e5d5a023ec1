//! Notification window
//!
//! Observe notifications arrive whenever the client decides to send them, so
//! they are validated over a time window instead of one by one: sample the
//! server's output for a while, then count the per-path notify markers and
//! decode the SenML payloads found in the sample.

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use crate::common::{Error, Result};
use crate::decode::{self, senml, Record};
use crate::session::Session;

/// A SenML array on one line
static SENML_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\{.*\}\]").expect("valid regex pattern"));

/// Inclusive bounds on an occurrence count
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct CountBounds {
    #[serde(default)]
    pub min: Option<usize>,
    #[serde(default)]
    pub max: Option<usize>,
}

impl CountBounds {
    pub fn between(min: usize, max: usize) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn at_least(min: usize) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    pub fn exactly(n: usize) -> Self {
        Self::between(n, n)
    }

    pub fn contains(&self, count: usize) -> bool {
        self.min.map_or(true, |min| count >= min) && self.max.map_or(true, |max| count <= max)
    }
}

impl fmt::Display for CountBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (Some(min), Some(max)) if min == max => write!(f, "exactly {}", min),
            (Some(min), Some(max)) => write!(f, "{}..={}", min, max),
            (Some(min), None) => write!(f, ">= {}", min),
            (None, Some(max)) => write!(f, "<= {}", max),
            (None, None) => write!(f, "any"),
        }
    }
}

/// Output captured during one window
#[derive(Debug, Clone)]
pub struct NotificationSample {
    pub text: String,
    pub duration: Duration,
}

impl NotificationSample {
    pub fn new(text: impl Into<String>, duration: Duration) -> Self {
        Self {
            text: text.into(),
            duration,
        }
    }

    /// Non-overlapping occurrences of `marker`
    pub fn count(&self, marker: &str) -> usize {
        if marker.is_empty() {
            return 0;
        }
        self.text.matches(marker).count()
    }

    /// Marker announcing a notification for `path` from `client`
    ///
    /// The trailing space keeps `/3/0/7` from also counting `/3/0/70`.
    pub fn notify_marker(client: u32, path: &str) -> String {
        format!("Notify from client #{} {} ", client, path)
    }

    /// Notifications received for `path` from `client`
    pub fn notify_count(&self, client: u32, path: &str) -> usize {
        self.count(&Self::notify_marker(client, path))
    }

    /// Check a notification count against bounds
    pub fn check_notify_count(&self, client: u32, path: &str, bounds: CountBounds) -> Result<usize> {
        let count = self.notify_count(client, path);
        if bounds.contains(count) {
            Ok(count)
        } else {
            Err(Error::TestAssertion(format!(
                "expected {} notifications for {} from client #{}, got {} in {:?}",
                bounds, path, client, count, self.duration
            )))
        }
    }

    /// Every one-line SenML array in the window
    pub fn payload_blocks(&self) -> Vec<&str> {
        SENML_BLOCK
            .find_iter(&self.text)
            .map(|m| m.as_str())
            .collect()
    }

    /// Decode every SenML payload in the window
    pub fn payloads(&self) -> Result<Vec<Vec<Record>>> {
        self.payload_blocks()
            .into_iter()
            .map(senml::parse)
            .collect()
    }

    /// Decoded payloads grouped by base name
    ///
    /// Payloads without a base name are grouped under the empty string.
    pub fn payloads_by_base_name(&self) -> Result<BTreeMap<String, Vec<Vec<Record>>>> {
        let mut groups: BTreeMap<String, Vec<Vec<Record>>> = BTreeMap::new();
        for records in self.payloads()? {
            let bn = decode::base_name(&records).unwrap_or_default().to_string();
            groups.entry(bn).or_default().push(records);
        }
        Ok(groups)
    }
}

/// Sample everything `session` prints during `duration`
pub async fn sample(session: &mut Session, duration: Duration) -> Result<NotificationSample> {
    let text = session.wait_for_time(duration).await?;
    tracing::debug!(
        "[{}] window of {:?} captured {} bytes",
        session.role(),
        duration,
        text.len()
    );
    Ok(NotificationSample::new(text, duration))
}
