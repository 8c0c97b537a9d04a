use crate::secret_string::SecretString;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};
use tracing::info;

/// Application configuration loaded once at startup.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(rename = "apiKey")]
    pub api_key: SecretString,
    #[serde(default, rename = "autoloadNamespaces")]
    pub autoload_namespaces: bool,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default, rename = "errorSinkEndpoint")]
    pub error_sink_endpoint: Option<String>,
    #[serde(default = "default_reap_threshold_secs", rename = "reapThreshold")]
    pub reap_threshold_secs: i64,
    #[serde(default = "default_poll_interval_ms", rename = "pollInterval")]
    pub poll_interval_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_reap_threshold_secs() -> i64 {
    crate::registry::DEFAULT_REAP_THRESHOLD_SECS
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.api_key.expose_secret().is_empty() {
            anyhow::bail!("apiKey must not be empty");
        }
        if !self.autoload_namespaces && self.namespaces.is_empty() {
            anyhow::bail!("namespaces must be non-empty when autoloadNamespaces is false");
        }
        Ok(())
    }
}

/// Loads, env-expands, parses and validates the configuration file at `path`.
///
/// `${VAR}` placeholders in the raw YAML are substituted from the process
/// environment before parsing; individual fields may additionally be
/// overridden from dedicated environment variables afterward.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path).with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let mut config: Config =
        serde_yaml_ng::from_str(&expanded).context("Failed to parse YAML config after environment variable expansion")?;
    apply_env_overrides(&mut config);
    config.validate()?;

    info!("Parsed valid application config:\n{}", serde_yaml_ng::to_string(&config)?);

    Ok(config)
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(port) = env::var("PORT") {
        if let Ok(port) = port.parse() {
            config.port = port;
        }
    }
    if let Ok(api_key) = env::var("API_KEY") {
        config.api_key = SecretString::new(api_key);
    }
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error if any env var is missing or regex fails.
fn expand_env_vars(input: &str) -> Result<String> {
    let regex = Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let mut missing = None;
    let result = regex.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| {
            missing.get_or_insert_with(|| var_name.to_string());
            String::new()
        })
    });

    if let Some(var_name) = missing {
        anyhow::bail!("Missing environment variable: {}", var_name);
    }

    Ok(result.into_owned())
}
