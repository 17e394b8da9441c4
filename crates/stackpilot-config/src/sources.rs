// Configuration source loading.
//
// Priority order:
// 1. Environment variables (STACKPILOT_* prefix)
// 2. Config file path from STACKPILOT_CONFIG
// 3. Inline config content from STACKPILOT_CONFIG_CONTENT
// 4. Default config files (./stackpilot.toml, ./.stackpilot.toml)
// 5. Built-in defaults

use crate::env_overrides::{self, EnvSource, ENV_PREFIX};
use crate::StackpilotConfig;
use anyhow::{Context, Result};
use std::env;
use std::path::Path;
use tracing::debug;

/// Load configuration using native environment/file access.
pub fn load_config() -> Result<StackpilotConfig> {
    let mut config = load_from_file()?.unwrap_or_default();
    env_overrides::apply_env_overrides(&mut config, &StdEnvSource)?;
    Ok(config)
}

fn load_from_file() -> Result<Option<StackpilotConfig>> {
    if let Ok(path) = env::var("STACKPILOT_CONFIG") {
        return read_file(Path::new(&path)).map(Some);
    }

    if let Ok(content) = env::var("STACKPILOT_CONFIG_CONTENT") {
        let config: StackpilotConfig = toml::from_str(&content)
            .context("Failed to parse inline config from STACKPILOT_CONFIG_CONTENT")?;
        return Ok(Some(config));
    }

    for path in &["./stackpilot.toml", "./.stackpilot.toml"] {
        let path = Path::new(path);
        if path.exists() {
            return read_file(path).map(Some);
        }
    }

    debug!("No config file found, using defaults");
    Ok(None)
}

/// Load configuration from a specific file path (for CLI --config flag).
/// Returns error if the file doesn't exist or can't be parsed.
pub fn load_from_file_path(path: impl AsRef<Path>) -> Result<StackpilotConfig> {
    let mut config = read_file(path.as_ref())?;
    env_overrides::apply_env_overrides(&mut config, &StdEnvSource)?;
    Ok(config)
}

fn read_file(path: &Path) -> Result<StackpilotConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    debug!(path = %path.display(), "Loaded config file");
    Ok(config)
}

struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(format!("{}{}", ENV_PREFIX, key)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn read_file_parses_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[aws]\nprofile = \"sandbox\"\ncapabilities = [\"CAPABILITY_NAMED_IAM\"]\n\n[logging]\nlevel = \"debug\""
        )
        .unwrap();

        let config = read_file(file.path()).unwrap();
        assert_eq!(config.aws.profile.as_deref(), Some("sandbox"));
        assert_eq!(config.aws.capabilities, vec!["CAPABILITY_NAMED_IAM"]);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn read_file_reports_path_on_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[poll]\ntimeout_secs = \"soon\"").unwrap();

        let err = read_file(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = load_from_file_path("/nonexistent/stackpilot.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn out_of_range_values_load_and_fail_only_on_validate() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[poll]\ntimeout_secs = 0").unwrap();

        let mut config = load_from_file_path(file.path()).unwrap();
        assert!(config.validate().is_err());

        // A later override (the CLI's --timeout) can still correct it
        config.poll.timeout_secs = 600;
        assert!(config.validate().is_ok());
    }
}
