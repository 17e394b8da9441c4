// Configuration validation
//
// Validates that required fields are present and values are sensible

use crate::*;
use anyhow::{bail, Result};
use tracing::warn;

const KNOWN_CAPABILITIES: &[&str] = &[
    "CAPABILITY_IAM",
    "CAPABILITY_NAMED_IAM",
    "CAPABILITY_AUTO_EXPAND",
];

const MAX_INTERVAL_SECS: u64 = 60 * 60;
const MAX_MULTIPLIER: f64 = 10.0;
const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

pub fn validate_config(config: &StackpilotConfig) -> Result<()> {
    validate_aws_settings(&config.aws)?;
    validate_poll_settings(&config.poll)?;
    validate_logging_settings(&config.logging)?;
    Ok(())
}

fn validate_aws_settings(config: &AwsSettings) -> Result<()> {
    if config.region.as_deref().is_some_and(str::is_empty) {
        bail!("aws.region must not be empty when set");
    }

    if let Some(endpoint) = &config.endpoint_url {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            bail!("aws.endpoint_url must start with http:// or https://");
        }
    }

    for capability in &config.capabilities {
        if !KNOWN_CAPABILITIES.contains(&capability.as_str()) {
            bail!(
                "Unknown capability '{}'. Supported: {}",
                capability,
                KNOWN_CAPABILITIES.join(", ")
            );
        }
    }

    if config.tags.keys().any(|k| k.is_empty()) {
        bail!("aws.tags keys must not be empty");
    }

    Ok(())
}

fn validate_poll_settings(config: &PollSettings) -> Result<()> {
    if config.initial_interval_secs == 0 {
        bail!("poll.initial_interval_secs must be greater than 0");
    }

    if config.max_interval_secs < config.initial_interval_secs {
        bail!("poll.max_interval_secs must be at least poll.initial_interval_secs");
    }

    if config.max_interval_secs > MAX_INTERVAL_SECS {
        bail!("poll.max_interval_secs must be at most {}", MAX_INTERVAL_SECS);
    }

    if !(1.0..=MAX_MULTIPLIER).contains(&config.multiplier) {
        bail!("poll.multiplier must be in the range [1.0, {}]", MAX_MULTIPLIER);
    }

    if !(0.0..1.0).contains(&config.jitter) {
        bail!("poll.jitter must be in the range [0.0, 1.0)");
    }

    if config.timeout_secs == 0 {
        bail!("poll.timeout_secs must be greater than 0");
    }

    if config.timeout_secs > MAX_TIMEOUT_SECS {
        bail!("poll.timeout_secs must be at most {} (7 days)", MAX_TIMEOUT_SECS);
    }

    if config.failure_threshold == 0 {
        bail!("poll.failure_threshold must be greater than 0");
    }

    // CloudFormation operations rarely run longer than a few hours
    if config.timeout_secs > 12 * 60 * 60 {
        warn!(
            timeout_secs = config.timeout_secs,
            "poll.timeout_secs is very long; a stuck stack will hold the terminal"
        );
    }

    Ok(())
}

fn validate_logging_settings(config: &LoggingSettings) -> Result<()> {
    if config.level.trim().is_empty() {
        bail!("logging.level must not be empty");
    }
    Ok(())
}
