use super::{LogFormat, StackpilotConfig};
use anyhow::{anyhow, Context, Result};
use std::str::FromStr;

pub const ENV_PREFIX: &str = "STACKPILOT_";

/// Abstraction over environment-variable lookups so tests can supply
/// overrides without touching the process environment.
pub trait EnvSource {
    /// Look up `key` with the STACKPILOT_ prefix applied
    fn get(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides (highest priority) to the config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut StackpilotConfig, env: &E) -> Result<()> {
    // AWS provider settings
    if let Some(region) = env.get("REGION") {
        config.aws.region = Some(region);
    }
    if let Some(profile) = env.get("PROFILE") {
        config.aws.profile = Some(profile);
    }
    if let Some(endpoint) = env.get("ENDPOINT_URL") {
        config.aws.endpoint_url = Some(endpoint);
    }
    if let Some(capabilities) = env.get("CAPABILITIES") {
        config.aws.capabilities = capabilities
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
    }

    // Polling
    if let Some(val) = get_env_parsed::<_, u64>(env, "POLL_INITIAL_INTERVAL_SECS")? {
        config.poll.initial_interval_secs = val;
    }
    if let Some(val) = get_env_parsed::<_, u64>(env, "POLL_MAX_INTERVAL_SECS")? {
        config.poll.max_interval_secs = val;
    }
    if let Some(val) = get_env_parsed::<_, f64>(env, "POLL_MULTIPLIER")? {
        config.poll.multiplier = val;
    }
    if let Some(val) = get_env_parsed::<_, f64>(env, "POLL_JITTER")? {
        config.poll.jitter = val;
    }
    if let Some(val) = get_env_parsed::<_, u64>(env, "TIMEOUT_SECS")? {
        config.poll.timeout_secs = val;
    }
    if let Some(val) = get_env_parsed::<_, u32>(env, "POLL_FAILURE_THRESHOLD")? {
        config.poll.failure_threshold = val;
    }

    // Logging
    if let Some(level) = env.get("LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = env.get("LOG_FORMAT") {
        config.logging.format = format
            .parse::<LogFormat>()
            .context("Invalid STACKPILOT_LOG_FORMAT value")?;
    }

    Ok(())
}

fn get_env_parsed<E, T>(env: &E, key: &str) -> Result<Option<T>>
where
    E: EnvSource,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env.get(key) {
        Some(val) => {
            let parsed = val
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}
