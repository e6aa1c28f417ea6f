//! Configuration system for the Boardcast server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/boardcast/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur when loading server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    limits: LimitsFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    outbound_queue_depth: Option<usize>,
    activity_ring_size: Option<usize>,
    activity_retention_days: Option<u32>,
    token_ttl_secs: Option<u64>,
}

/// `[limits]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LimitsFileConfig {
    max_title_len: Option<usize>,
    max_description_len: Option<usize>,
    max_tags: Option<usize>,
    max_tag_len: Option<usize>,
    max_comment_len: Option<usize>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Boardcast task board server")]
pub struct CliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "BOARDCAST_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/boardcast/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Per-session outbound queue depth before a slow-consumer drop.
    #[arg(long)]
    pub outbound_queue_depth: Option<usize>,

    /// Number of activity records kept in the rolling window.
    #[arg(long)]
    pub activity_ring_size: Option<usize>,

    /// Default retention in days for the activity prune command.
    #[arg(long)]
    pub activity_retention_days: Option<u32>,

    /// Credential acceptance window in seconds.
    #[arg(long)]
    pub token_ttl_secs: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "BOARDCAST_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Input validation limits enforced by the task service.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Maximum title length in characters.
    pub max_title_len: usize,
    /// Maximum description length in characters.
    pub max_description_len: usize,
    /// Maximum number of tags per task.
    pub max_tags: usize,
    /// Maximum tag length in characters.
    pub max_tag_len: usize,
    /// Maximum comment length in characters.
    pub max_comment_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_title_len: boardcast_proto::task::MAX_TITLE_LEN,
            max_description_len: boardcast_proto::task::MAX_DESCRIPTION_LEN,
            max_tags: boardcast_proto::task::MAX_TAGS,
            max_tag_len: boardcast_proto::task::MAX_TAG_LEN,
            max_comment_len: boardcast_proto::task::MAX_COMMENT_LEN,
        }
    }
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:9100`).
    pub bind_addr: String,
    /// Per-session outbound queue depth.
    pub outbound_queue_depth: usize,
    /// Rolling-window size for recent activities.
    pub activity_ring_size: usize,
    /// Default prune retention in days.
    pub activity_retention_days: u32,
    /// Credential acceptance window.
    pub token_ttl: Duration,
    /// Log level filter string.
    pub log_level: String,
    /// Input validation limits.
    pub limits: Limits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9100".to_string(),
            outbound_queue_depth: 64,
            activity_ring_size: 20,
            activity_retention_days: 90,
            token_ttl: Duration::from_secs(3600),
            log_level: "info".to_string(),
            limits: Limits::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and a missing
    /// file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ServerConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let default_limits = Limits::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            outbound_queue_depth: cli
                .outbound_queue_depth
                .or(file.server.outbound_queue_depth)
                .unwrap_or(defaults.outbound_queue_depth),
            activity_ring_size: cli
                .activity_ring_size
                .or(file.server.activity_ring_size)
                .unwrap_or(defaults.activity_ring_size),
            activity_retention_days: cli
                .activity_retention_days
                .or(file.server.activity_retention_days)
                .unwrap_or(defaults.activity_retention_days),
            token_ttl: Duration::from_secs(
                cli.token_ttl_secs
                    .or(file.server.token_ttl_secs)
                    .unwrap_or(defaults.token_ttl.as_secs()),
            ),
            log_level: cli.log_level.clone(),
            limits: Limits {
                max_title_len: file
                    .limits
                    .max_title_len
                    .unwrap_or(default_limits.max_title_len),
                max_description_len: file
                    .limits
                    .max_description_len
                    .unwrap_or(default_limits.max_description_len),
                max_tags: file.limits.max_tags.unwrap_or(default_limits.max_tags),
                max_tag_len: file
                    .limits
                    .max_tag_len
                    .unwrap_or(default_limits.max_tag_len),
                max_comment_len: file
                    .limits
                    .max_comment_len
                    .unwrap_or(default_limits.max_comment_len),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("boardcast").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:9100");
        assert_eq!(config.outbound_queue_depth, 64);
        assert_eq!(config.activity_ring_size, 20);
        assert_eq!(config.activity_retention_days, 90);
        assert_eq!(config.token_ttl, Duration::from_secs(3600));
        assert_eq!(config.limits.max_title_len, 200);
        assert_eq!(config.limits.max_comment_len, 500);
    }

    #[test]
    fn toml_parsing_full() {
        let toml_str = r#"
[server]
bind_addr = "127.0.0.1:8080"
outbound_queue_depth = 16
activity_ring_size = 50
activity_retention_days = 30
token_ttl_secs = 600

[limits]
max_title_len = 100
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let cli = CliArgs::default();
        let config = ServerConfig::resolve(&cli, &file);

        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.outbound_queue_depth, 16);
        assert_eq!(config.activity_ring_size, 50);
        assert_eq!(config.activity_retention_days, 30);
        assert_eq!(config.token_ttl, Duration::from_secs(600));
        assert_eq!(config.limits.max_title_len, 100);
        assert_eq!(config.limits.max_description_len, 1000); // default
    }

    #[test]
    fn toml_parsing_partial() {
        let toml_str = r"
[server]
outbound_queue_depth = 8
";
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let cli = CliArgs::default();
        let config = ServerConfig::resolve(&cli, &file);

        assert_eq!(config.bind_addr, "0.0.0.0:9100"); // default
        assert_eq!(config.outbound_queue_depth, 8); // from file
    }

    #[test]
    fn toml_parsing_empty() {
        let file: ConfigFile = toml::from_str("").unwrap();
        let cli = CliArgs::default();
        let config = ServerConfig::resolve(&cli, &file);

        assert_eq!(config.bind_addr, "0.0.0.0:9100");
        assert_eq!(config.activity_ring_size, 20);
    }

    #[test]
    fn cli_overrides_file() {
        let toml_str = r#"
[server]
bind_addr = "127.0.0.1:8080"
activity_ring_size = 50
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let cli = CliArgs {
            bind: Some("0.0.0.0:3000".to_string()),
            activity_ring_size: None, // not set on CLI — should fall through to file
            ..Default::default()
        };
        let config = ServerConfig::resolve(&cli, &file);

        assert_eq!(config.bind_addr, "0.0.0.0:3000"); // from CLI
        assert_eq!(config.activity_ring_size, 50); // from file
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = load_config_file(None);
        assert!(result.is_ok());
    }

    #[test]
    fn explicit_missing_config_file_returns_error() {
        let result = load_config_file(Some(std::path::Path::new("/nonexistent/config.toml")));
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
