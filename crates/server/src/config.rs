//! Server configuration.
//!
//! Loaded from an optional TOML file, then overlaid with CLI flags and
//! environment variables:
//!
//! ```toml
//! state_dir = "/var/lib/ironvault"
//! log_format = "json"
//! replicas = ["eu", "us"]
//!
//! [backend.broker]
//! endpoints = ["memory://local"]
//! signing_key = "<base64>"
//! encryption_key = "<base64>"
//!
//! [backend.topics]
//! self_topic_name = "auth"
//! root_topic_name = "root_source.auth"
//! root_public_key = "<base64>"
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use ironvault_iam::BackendConfig;
use ironvault_types::config::{BrokerConfig, ConsumerConfig, KEY_LEN, TopicsConfig, encode_key};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{ParseConfigSnafu, ReadConfigSnafu, RenderSnafu, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON when stdout is not a terminal, text otherwise.
    #[default]
    Auto,
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("ironvault-state")
}

/// Complete server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding the sealed backend configuration.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Replica names this node publishes authoritative objects to.
    #[serde(default)]
    pub replicas: Vec<String>,
    /// Consumer group name; defaults to the self topic name.
    #[serde(default)]
    pub consumer_group: Option<String>,
    /// Backend configuration. When absent, the configuration sealed in
    /// `state_dir` by an earlier run is used.
    #[serde(default)]
    pub backend: Option<BackendConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            log_format: LogFormat::default(),
            replicas: Vec::new(),
            consumer_group: None,
            backend: None,
        }
    }
}

impl Config {
    /// Reads a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse.
    pub fn from_file(path: &Path) -> Result<Self> {
        let path_display = path.display().to_string();
        let text = std::fs::read_to_string(path).context(ReadConfigSnafu { path: path_display.clone() })?;
        toml::from_str(&text).context(ParseConfigSnafu { path: path_display })
    }
}

/// Command-line interface.
#[derive(Debug, Parser)]
#[command(name = "ironvault", version, about = "Replicated identity tables over signed change logs")]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long, short, env = "IRONVAULT_CONFIG")]
    pub config: Option<PathBuf>,
    /// Overrides `state_dir`.
    #[arg(long, env = "IRONVAULT_STATE_DIR")]
    pub state_dir: Option<PathBuf>,
    /// Overrides `log_format`.
    #[arg(long, env = "IRONVAULT_LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,
    /// Overrides `replicas`; repeat the flag or separate names with commas.
    #[arg(long = "replica", env = "IRONVAULT_REPLICAS", value_delimiter = ',')]
    pub replicas: Vec<String>,
    /// Overrides `consumer_group`.
    #[arg(long, env = "IRONVAULT_CONSUMER_GROUP")]
    pub consumer_group: Option<String>,
    /// Subcommand; runs the node when omitted.
    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

/// Subcommands that exit without starting the node.
#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Configuration helpers.
    Config {
        /// What to print.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration helper actions.
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ConfigAction {
    /// Print the JSON schema of the configuration file.
    Schema,
    /// Print an example configuration file.
    Example,
}

impl Cli {
    /// The file configuration, or the defaults, with flags and environment applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be loaded.
    pub fn resolve(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(state_dir) = &self.state_dir {
            config.state_dir.clone_from(state_dir);
        }
        if let Some(log_format) = self.log_format {
            config.log_format = log_format;
        }
        if !self.replicas.is_empty() {
            config.replicas.clone_from(&self.replicas);
        }
        if let Some(group) = &self.consumer_group {
            config.consumer_group = Some(group.clone());
        }
        Ok(config)
    }
}

/// JSON schema of [`Config`].
///
/// # Errors
///
/// Returns an error if the schema cannot be rendered.
pub fn generate_config_schema() -> Result<String> {
    let schema = schemars::schema_for!(Config);
    serde_json::to_string_pretty(&schema).map_err(|e| RenderSnafu { message: e.to_string() }.build())
}

/// Example TOML configuration with placeholder keys.
///
/// # Errors
///
/// Returns an error if the example cannot be rendered.
pub fn generate_config_example() -> Result<String> {
    let placeholder = encode_key(&[0; KEY_LEN]);
    let example = Config {
        state_dir: PathBuf::from("/var/lib/ironvault"),
        log_format: LogFormat::Json,
        replicas: vec!["replica1".to_string()],
        consumer_group: None,
        backend: Some(BackendConfig {
            broker: BrokerConfig {
                endpoints: vec!["memory://local".to_string()],
                operation_timeout: std::time::Duration::from_secs(10),
                signing_key: placeholder.clone(),
                encryption_key: placeholder.clone(),
            },
            topics: TopicsConfig {
                self_topic_name: "auth".to_string(),
                root_topic_name: "root_source.auth".to_string(),
                root_public_key: placeholder,
                peers_public_keys: Vec::new(),
                publish_quota_usage: false,
                skip_on_wrong_signature: false,
            },
            consumer: ConsumerConfig::default(),
        }),
    };
    toml::to_string_pretty(&example).map_err(|e| RenderSnafu { message: e.to_string() }.build())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use ironvault_test_utils::TestDir;

    use super::*;

    #[test]
    fn test_example_parses_back() {
        let example = generate_config_example().expect("example");
        let parsed: Config = toml::from_str(&example).expect("parse");
        assert_eq!(parsed.log_format, LogFormat::Json);
        let backend = parsed.backend.expect("backend");
        assert_eq!(backend.topics.root_topic_name, "root_source.auth");
        backend.validate().expect("example validates");
    }

    #[test]
    fn test_schema_mentions_sections() {
        let schema = generate_config_schema().expect("schema");
        for field in ["state_dir", "backend", "root_topic_name", "poll_interval"] {
            assert!(schema.contains(field), "schema lacks {field}");
        }
    }

    #[test]
    fn test_flags_override_file() {
        let dir = TestDir::new();
        let path = dir.join("ironvault.toml");
        std::fs::write(&path, "state_dir = \"/from/file\"\nreplicas = [\"a\"]\nlog_format = \"text\"\n").expect("write");

        let cli = Cli::try_parse_from([
            "ironvault",
            "--config",
            path.to_str().expect("utf-8 path"),
            "--state-dir",
            "/from/flag",
            "--replica",
            "b,c",
        ])
        .expect("parse");
        let config = cli.resolve().expect("resolve");
        assert_eq!(config.state_dir, PathBuf::from("/from/flag"));
        assert_eq!(config.replicas, ["b", "c"]);
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.backend.is_none());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let dir = TestDir::new();
        let path = dir.join("bad.toml");
        std::fs::write(&path, "state_dri = \"/typo\"\n").expect("write");
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_config_subcommands_parse() {
        let cli = Cli::try_parse_from(["ironvault", "config", "schema"]).expect("parse");
        assert!(matches!(cli.command, Some(CliCommand::Config { action: ConfigAction::Schema })));
    }
}
