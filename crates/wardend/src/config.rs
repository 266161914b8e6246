//! Configuration management for wardend.
//!
//! Loads settings from /etc/warden/config.toml or uses defaults.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use warden_shared::{HistoryOptions, MatchWeights, Matcher};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/warden/config.toml";

/// Default config file path for fallback
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/warden/config.toml";

/// Daemon behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Log level used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Reload the catalog when its file changes
    #[serde(default)]
    pub watch_catalog: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            watch_catalog: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_path")]
    pub path: PathBuf,
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from(warden_shared::CATALOG_PATH)
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
        }
    }
}

/// Signature matcher scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    #[serde(default = "default_weight")]
    pub keyword_weight: f64,

    #[serde(default = "default_weight")]
    pub regex_weight: f64,

    /// Maximum characters kept in a match excerpt
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

fn default_weight() -> f64 {
    0.5
}

fn default_excerpt_chars() -> usize {
    warden_shared::matcher::DEFAULT_EXCERPT_CHARS
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            keyword_weight: default_weight(),
            regex_weight: default_weight(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

impl MatcherConfig {
    pub fn build(&self) -> Matcher {
        Matcher::new(
            MatchWeights {
                keyword: self.keyword_weight,
                regex: self.regex_weight,
            },
            self.excerpt_chars,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_path")]
    pub path: PathBuf,

    /// Occurrences kept per signature
    #[serde(default = "default_retention")]
    pub retention: usize,

    /// Relative rate change between window halves that counts as a trend
    #[serde(default = "default_trend_margin")]
    pub trend_margin: f64,
}

fn default_history_path() -> PathBuf {
    PathBuf::from(warden_shared::HISTORY_PATH)
}

fn default_retention() -> usize {
    warden_shared::issue_record::DEFAULT_RETENTION
}

fn default_trend_margin() -> f64 {
    warden_shared::issue_record::DEFAULT_TREND_MARGIN
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
            retention: default_retention(),
            trend_margin: default_trend_margin(),
        }
    }
}

impl HistoryConfig {
    pub fn options(&self) -> HistoryOptions {
        HistoryOptions {
            retention: self.retention,
            trend_margin: self.trend_margin,
        }
    }
}

/// Remediation command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Per-command timeout in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Shell used as `<shell> -c <command>`
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Captured output beyond this many bytes is cut
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Finished requests kept in memory for lookup
    #[serde(default = "default_max_finished_requests")]
    pub max_finished_requests: usize,

    /// Journal of requests awaiting approval, shared with wardenctl
    #[serde(default = "default_pending_path")]
    pub pending_path: PathBuf,
}

fn default_command_timeout() -> u64 {
    30
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_max_output_bytes() -> usize {
    16_384
}

fn default_max_finished_requests() -> usize {
    256
}

fn default_pending_path() -> PathBuf {
    Path::new(warden_shared::STATE_DIR).join("pending_requests.json")
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            shell: default_shell(),
            max_output_bytes: default_max_output_bytes(),
            max_finished_requests: default_max_finished_requests(),
            pending_path: default_pending_path(),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub matcher: MatcherConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl Config {
    /// Load config from file or use defaults.
    pub fn load() -> Self {
        Self::load_from_path(Path::new(CONFIG_PATH))
            .or_else(|_| Self::load_from_path(Path::new(DEFAULT_CONFIG_PATH)))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                Config::default()
            })
    }

    /// Load an explicit config file, or fall back to [`Config::load`].
    ///
    /// An explicit path that cannot be read or fails validation is an error.
    pub fn load_with(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_from_path(path),
            None => Ok(Self::load()),
        }
    }

    /// Load config from specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let config = Self::parse(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engines cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.history.retention == 0 {
            bail!("history.retention must be at least 1");
        }
        if !(0.0..1.0).contains(&self.history.trend_margin) {
            bail!(
                "history.trend_margin must be in [0, 1), got {}",
                self.history.trend_margin
            );
        }
        if self.matcher.keyword_weight < 0.0 || self.matcher.regex_weight < 0.0 {
            bail!("matcher weights cannot be negative");
        }
        if self.matcher.keyword_weight + self.matcher.regex_weight == 0.0 {
            bail!("matcher weights cannot both be zero");
        }
        if self.executor.command_timeout_secs == 0 {
            bail!("executor.command_timeout_secs must be at least 1");
        }
        if self.executor.shell.trim().is_empty() {
            bail!("executor.shell cannot be empty");
        }
        if self.executor.max_finished_requests == 0 {
            bail!("executor.max_finished_requests must be at least 1");
        }
        Ok(())
    }

    /// Save default config to path (for init)
    pub fn save_default(path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(&Config::default())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        info!("Saved default config to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.history.retention, 3);
        assert_eq!(config.executor.command_timeout_secs, 30);
        assert_eq!(config.executor.shell, "sh");
        assert_eq!(config.executor.max_finished_requests, 256);
        assert_eq!(
            config.executor.pending_path,
            PathBuf::from("/var/lib/warden/pending_requests.json")
        );
        assert_eq!(config.matcher.keyword_weight, 0.5);
        assert!(!config.daemon.watch_catalog);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[matcher]
keyword_weight = 0.3
regex_weight = 0.7

[history]
retention = 5
"#;
        let config = Config::parse(toml_str).unwrap();
        assert_eq!(config.matcher.keyword_weight, 0.3);
        assert_eq!(config.history.retention, 5);
        // Defaults for missing fields
        assert_eq!(config.history.trend_margin, 0.2);
        assert_eq!(config.executor.command_timeout_secs, 30);
    }

    #[test]
    fn test_rejects_zero_retention() {
        let err = Config::parse("[history]\nretention = 0\n").unwrap_err();
        assert!(err.to_string().contains("retention"));
    }

    #[test]
    fn test_rejects_bad_margin_and_weights() {
        assert!(Config::parse("[history]\ntrend_margin = 1.0\n").is_err());
        assert!(Config::parse("[matcher]\nkeyword_weight = -0.1\n").is_err());
        assert!(Config::parse("[matcher]\nkeyword_weight = 0.0\nregex_weight = 0.0\n").is_err());
        assert!(Config::parse("[executor]\nmax_finished_requests = 0\n").is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc/config.toml");
        Config::save_default(&path).unwrap();
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.history.retention, 3);
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        assert!(Config::load_with(Some(Path::new("/nonexistent/warden.toml"))).is_err());
    }
}
