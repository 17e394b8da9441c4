// stackpilot-config - Configuration for the stack reconciler
//
// Supports configuration from multiple sources:
// 1. Environment variables (highest priority)
// 2. Config file path from STACKPILOT_CONFIG env var
// 3. Config file contents from STACKPILOT_CONFIG_CONTENT env var
// 4. Default config file locations (./stackpilot.toml, ./.stackpilot.toml)
// 5. Built-in defaults (lowest priority)
//
// CLI flags are applied on top by the binary.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

mod env_overrides;
mod sources;
mod validation;

pub use env_overrides::{apply_env_overrides, EnvSource, ENV_PREFIX};

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackpilotConfig {
    #[serde(default)]
    pub aws: AwsSettings,

    #[serde(default)]
    pub poll: PollSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Settings handed to the CloudFormation provider.
///
/// Unset fields fall back to the AWS SDK's own resolution
/// (AWS_REGION, AWS_PROFILE, shared config files, instance metadata).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// Alternate endpoint, e.g. LocalStack
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,

    /// Capabilities acknowledged on create and update
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<String>,

    /// Tags applied to every stack this tool creates or updates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

fn default_capabilities() -> Vec<String> {
    vec!["CAPABILITY_IAM".to_string()]
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            region: None,
            profile: None,
            endpoint_url: None,
            capabilities: default_capabilities(),
            tags: BTreeMap::new(),
        }
    }
}

/// Polling cadence while waiting for a stack to settle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub initial_interval_secs: u64,
    pub max_interval_secs: u64,
    pub multiplier: f64,
    pub jitter: f64,
    pub timeout_secs: u64,
    pub failure_threshold: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            initial_interval_secs: 2,
            max_interval_secs: 30,
            multiplier: 2.0,
            jitter: 0.2,
            timeout_secs: 30 * 60,
            failure_threshold: 3,
        }
    }
}

impl PollSettings {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_secs(self.initial_interval_secs)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Unsupported log format: {}. Supported: text, json", s),
        }
    }
}

impl StackpilotConfig {
    /// Load configuration from all sources with priority.
    ///
    /// The result is not validated; callers apply their own overrides first
    /// and then call [`StackpilotConfig::validate`].
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Load from an explicit file (CLI --config flag), then apply env overrides
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        sources::load_from_file_path(path)
    }

    /// Parse TOML content without consulting the environment
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs() {
        let config = StackpilotConfig::default();
        assert_eq!(config.poll.initial_interval(), Duration::from_secs(2));
        assert_eq!(config.poll.max_interval(), Duration::from_secs(30));
        assert_eq!(config.poll.failure_threshold, 3);
        assert_eq!(config.aws.capabilities, vec!["CAPABILITY_IAM"]);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = StackpilotConfig::from_toml(
            r#"
[aws]
region = "eu-west-1"

[aws.tags]
team = "platform"

[poll]
timeout_secs = 600
"#,
        )
        .unwrap();

        assert_eq!(config.aws.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.aws.capabilities, vec!["CAPABILITY_IAM"]);
        assert_eq!(config.aws.tags.get("team").map(String::as_str), Some("platform"));
        assert_eq!(config.poll.timeout(), Duration::from_secs(600));
        assert_eq!(config.poll.initial_interval_secs, 2);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
