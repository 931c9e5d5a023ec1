//! CLI command handling
//!
//! Dispatches CLI commands and formats output.

use std::path::Path;
use std::time::Duration;

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::decode::{self, lwm2m_json, senml, text, tlv, ContentFormat, Record};
use crate::notify::NotificationSample;
use crate::registration::{self, RegistrationEvent};
use crate::testing;

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run { scenarios, verbose } => {
            let mut failed = Vec::new();
            for path in &scenarios {
                let result = testing::run_scenario(path, config, verbose).await?;
                if !result.passed {
                    println!(
                        "{} {} ({}/{} steps): {}",
                        "✗".red().bold(),
                        result.name.red().bold(),
                        result.steps_run,
                        result.steps_total,
                        result.error.unwrap_or_default()
                    );
                    failed.push(result.name);
                }
            }

            println!(
                "{} passed, {} failed",
                scenarios.len() - failed.len(),
                failed.len()
            );
            if failed.is_empty() {
                Ok(())
            } else {
                Err(Error::TestAssertion(format!(
                    "{} scenario(s) failed: {}",
                    failed.len(),
                    failed.join(", ")
                )))
            }
        }

        Commands::Decode {
            transcript,
            format,
            id,
        } => {
            let capture = read_transcript(&transcript)?;
            let format = match format.as_str() {
                "auto" => ContentFormat::detect(&capture).ok_or_else(|| {
                    Error::MalformedPayload("no content-type marker in transcript".to_string())
                })?,
                other => ContentFormat::parse(other)?,
            };

            match format {
                ContentFormat::SenmlJson => {
                    let records = senml::from_capture(&capture)?;
                    println!("SenML-JSON, base name {:?}", decode::base_name(&records));
                    print_records(&records);
                }
                ContentFormat::Lwm2mJson => {
                    let doc = lwm2m_json::from_capture(&capture)?;
                    println!("LwM2M-JSON, base name {:?}", doc.base_name);
                    print_records(&doc.records);
                }
                ContentFormat::Tlv => {
                    let id = id.ok_or_else(|| {
                        Error::Config("--id is required to decode a TLV payload".to_string())
                    })?;
                    match tlv::decode(&capture, id)? {
                        Some(value) => println!("{}: {:?}", id, value),
                        None => {
                            return Err(Error::decode_not_found(&id.to_string(), "tlv"));
                        }
                    }
                }
                ContentFormat::Text => {
                    println!("{:?}", text::decode(&capture)?);
                }
            }
            Ok(())
        }

        Commands::Registration { transcript } => {
            let capture = read_transcript(&transcript)?;
            let events = registration::parse_all(&capture)?;
            if events.is_empty() {
                println!("No registrations found");
            }
            for event in &events {
                print_registration(event);
            }
            Ok(())
        }

        Commands::Notifications {
            transcript,
            path,
            client,
        } => {
            let capture = read_transcript(&transcript)?;
            let sample = NotificationSample::new(capture, Duration::ZERO);
            println!(
                "{} notification(s) for {} from client #{}",
                sample.notify_count(client, &path),
                path,
                client
            );
            for (bn, payloads) in sample.payloads_by_base_name()? {
                let bn = if bn.is_empty() { "(none)".to_string() } else { bn };
                println!("  {} payload(s) with base name {}", payloads.len(), bn);
            }
            Ok(())
        }
    }
}

fn read_transcript(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn print_records(records: &[Record]) {
    for record in records {
        match &record.value {
            Some(value) => println!("  {} = {}", record.name, value),
            None => println!("  {} (no value)", record.name),
        }
    }
}

fn print_registration(event: &RegistrationEvent) {
    println!("Client #{} {}", event.client_id, event.event);
    println!("  name:     {}", event.endpoint);
    println!("  version:  {}", event.version);
    println!("  binding:  {}", event.binding);
    println!("  lifetime: {} sec", event.lifetime);
    println!("  objects:");
    for link in &event.object_links {
        match &link.version {
            Some(version) => println!("    {} ({})", link.path, version),
            None => println!("    {}", link.path),
        }
    }
}
