use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::pagination::{DEFAULT_PAGE_SIZE, DEFAULT_PREFETCH_THRESHOLD};
use crate::store::FeedSettings;
use crate::window::DEFAULT_RADIUS;
use crate::{prefetch, reddit, runtime};

const DEFAULT_ENV_PREFIX: &str = "ROCKETFEED";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub reddit: RedditConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedditConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Environment variable holding the OAuth bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            base_url: default_base_url(),
            timeout: default_request_timeout(),
            token_env: default_token_env(),
        }
    }
}

fn default_user_agent() -> String {
    format!(
        "rocketfeed/{} (+https://github.com/danielmerja/rocketfeed)",
        env!("CARGO_PKG_VERSION")
    )
}

fn default_base_url() -> String {
    reddit::DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_token_env() -> String {
    "REDDIT_TOKEN".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_prefetch_threshold")]
    pub prefetch_threshold: usize,
    #[serde(default = "default_window_radius")]
    pub window_radius: usize,
    #[serde(default = "default_image_retain_pages")]
    pub image_retain_pages: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            prefetch_threshold: default_prefetch_threshold(),
            window_radius: default_window_radius(),
            image_retain_pages: default_image_retain_pages(),
        }
    }
}

impl FeedConfig {
    pub fn settings(&self) -> FeedSettings {
        FeedSettings {
            page_size: self.page_size,
            prefetch_threshold: self.prefetch_threshold,
            window_radius: self.window_radius,
            image_retain_pages: self.image_retain_pages,
        }
    }
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_prefetch_threshold() -> usize {
    DEFAULT_PREFETCH_THRESHOLD
}

fn default_window_radius() -> usize {
    DEFAULT_RADIUS
}

fn default_image_retain_pages() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_media_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout: default_media_timeout(),
        }
    }
}

fn default_workers() -> usize {
    prefetch::Config::default().workers
}

fn default_media_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    pub fn runtime(&self) -> runtime::Config {
        runtime::Config {
            settings: self.feed.settings(),
            network_workers: self.runtime.workers,
            image_workers: self.media.workers,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

/// Defaults, then the YAML file (explicit path or the per-user default),
/// then `ROCKETFEED_*` environment overrides.
pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    let path = options.config_file.clone().or_else(default_config_path);
    if let Some(path) = path {
        if path.exists() {
            cfg = read_config_file(&path)?;
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    for (key, value) in env_overrides(prefix) {
        apply_env_value(&mut cfg, &key, value);
    }

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn env_overrides(prefix: &str) -> HashMap<String, String> {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(&upper_prefix)
                .map(|stripped| (stripped.to_ascii_lowercase().replace("__", "."), value))
        })
        .collect()
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "reddit.user_agent" => cfg.reddit.user_agent = value,
        "reddit.base_url" => cfg.reddit.base_url = value,
        "reddit.token_env" => cfg.reddit.token_env = value,
        "reddit.timeout" => set_duration(&mut cfg.reddit.timeout, &value),
        "feed.page_size" => set_parsed(&mut cfg.feed.page_size, &value),
        "feed.prefetch_threshold" => set_parsed(&mut cfg.feed.prefetch_threshold, &value),
        "feed.window_radius" => set_parsed(&mut cfg.feed.window_radius, &value),
        "feed.image_retain_pages" => set_parsed(&mut cfg.feed.image_retain_pages, &value),
        "media.workers" => set_parsed(&mut cfg.media.workers, &value),
        "media.timeout" => set_duration(&mut cfg.media.timeout, &value),
        "runtime.workers" => set_parsed(&mut cfg.runtime.workers, &value),
        "log.level" => cfg.log.level = value,
        _ => {}
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, value: &str) {
    match value.trim().parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => tracing::warn!(value, "config: ignoring unparsable override"),
    }
}

fn set_duration(slot: &mut Duration, value: &str) {
    match humantime::parse_duration(value.trim()) {
        Ok(duration) => *slot = duration,
        Err(err) => tracing::warn!(value, error = %err, "config: ignoring bad duration"),
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("rocketfeed").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    fn isolated(prefix: &str, path: PathBuf) -> LoadOptions {
        LoadOptions {
            config_file: Some(path),
            env_prefix: Some(prefix.into()),
        }
    }

    #[test]
    fn load_defaults_without_files() {
        let dir = tempdir().unwrap();
        let cfg = load(isolated("RF_DEFAULTS", dir.path().join("missing.yaml"))).unwrap();
        assert_eq!(cfg.feed.page_size, 25);
        assert_eq!(cfg.feed.prefetch_threshold, 5);
        assert_eq!(cfg.feed.window_radius, 2);
        assert_eq!(cfg.media.timeout, Duration::from_secs(30));
        assert_eq!(cfg.log.level, "info");
        assert_eq!(cfg.reddit.base_url, reddit::DEFAULT_BASE_URL);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "feed:\n  page_size: 10\nmedia:\n  timeout: 5s\nreddit:\n  token_env: MY_TOKEN\n",
        )
        .unwrap();
        let cfg = load(isolated("RF_PARTIAL", path)).unwrap();
        assert_eq!(cfg.feed.page_size, 10);
        assert_eq!(cfg.feed.window_radius, 2);
        assert_eq!(cfg.media.timeout, Duration::from_secs(5));
        assert_eq!(cfg.media.workers, 4);
        assert_eq!(cfg.reddit.token_env, "MY_TOKEN");
        assert_eq!(cfg.runtime().settings.page_size, 10);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "feed: [not, a, map").unwrap();
        let err = load(isolated("RF_BROKEN", path)).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }

    #[test]
    fn env_overrides() {
        let dir = tempdir().unwrap();
        env::set_var("RF_ENVTEST_FEED__PAGE_SIZE", "50");
        env::set_var("RF_ENVTEST_MEDIA__TIMEOUT", "2m");
        env::set_var("RF_ENVTEST_LOG__LEVEL", "debug");
        env::set_var("RF_ENVTEST_RUNTIME__WORKERS", "many");
        let cfg = load(isolated("RF_ENVTEST", dir.path().join("none.yaml"))).unwrap();
        env::remove_var("RF_ENVTEST_FEED__PAGE_SIZE");
        env::remove_var("RF_ENVTEST_MEDIA__TIMEOUT");
        env::remove_var("RF_ENVTEST_LOG__LEVEL");
        env::remove_var("RF_ENVTEST_RUNTIME__WORKERS");

        assert_eq!(cfg.feed.page_size, 50);
        assert_eq!(cfg.media.timeout, Duration::from_secs(120));
        assert_eq!(cfg.log.level, "debug");
        assert_eq!(cfg.runtime.workers, 4);
    }
}
