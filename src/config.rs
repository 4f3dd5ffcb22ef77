use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "GALLPREVIEW";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub tuning: TuningConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://gall.dcinside.com".to_string()
}

fn default_user_agent() -> String {
    format!("gall-preview/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

/// User-facing module settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreviewConfig {
    #[serde(default)]
    pub tooltip_mode: bool,
    #[serde(default)]
    pub tooltip_media_hide: bool,
    #[serde(default)]
    pub reverse_preview_key: bool,
    #[serde(default = "default_long_press_delay", with = "humantime_serde")]
    pub long_press_delay: Duration,
    #[serde(default = "default_true")]
    pub scroll_to_skip: bool,
    #[serde(default = "default_true")]
    pub sync_history: bool,
    #[serde(default)]
    pub auto_refresh_comments: bool,
    #[serde(default = "default_refresh_interval", with = "humantime_serde")]
    pub comment_refresh_interval: Duration,
    #[serde(default = "default_true")]
    pub admin_panel: bool,
    #[serde(default = "default_true")]
    pub admin_shortcuts: bool,
    #[serde(default)]
    pub expand_recognize_range: bool,
    #[serde(default)]
    pub comment_writing: bool,
    #[serde(default = "default_true")]
    pub disable_cache: bool,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            tooltip_mode: false,
            tooltip_media_hide: false,
            reverse_preview_key: false,
            long_press_delay: default_long_press_delay(),
            scroll_to_skip: true,
            sync_history: true,
            auto_refresh_comments: false,
            comment_refresh_interval: default_refresh_interval(),
            admin_panel: true,
            admin_shortcuts: true,
            expand_recognize_range: false,
            comment_writing: false,
            disable_cache: true,
        }
    }
}

impl PreviewConfig {
    pub fn long_press_delay(&self) -> Duration {
        self.long_press_delay
            .clamp(Duration::from_millis(200), Duration::from_millis(2000))
    }

    pub fn comment_refresh_interval(&self) -> Duration {
        self.comment_refresh_interval
            .clamp(Duration::from_secs(1), Duration::from_secs(20))
    }
}

fn default_true() -> bool {
    true
}

fn default_long_press_delay() -> Duration {
    Duration::from_millis(300)
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(10)
}

/// Timing and sizing constants observed in the field, kept adjustable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TuningConfig {
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_hover_cooldown", with = "humantime_serde")]
    pub hover_cooldown: Duration,
    #[serde(default = "default_scroll_confirmations")]
    pub scroll_confirmations: u32,
    #[serde(default = "default_confirm_window", with = "humantime_serde")]
    pub confirm_window: Duration,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            hover_cooldown: default_hover_cooldown(),
            scroll_confirmations: default_scroll_confirmations(),
            confirm_window: default_confirm_window(),
        }
    }
}

fn default_cache_capacity() -> usize {
    50
}

fn default_hover_cooldown() -> Duration {
    Duration::from_millis(150)
}

fn default_scroll_confirmations() -> u32 {
    2
}

fn default_confirm_window() -> Duration {
    Duration::from_millis(1000)
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = match options.config_file.or_else(default_config_path) {
        Some(path) if path.exists() => read_config_file(&path)?,
        _ => Config::default(),
    };

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    for (key, value) in env_values(prefix) {
        apply_env_value(&mut cfg, &key, value);
    }

    log::debug!("config: loaded {:?}", cfg.tuning);
    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("config: failed to read {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("config: failed to parse {}", path.display()))?;
    Ok(config)
}

fn env_values(prefix: &str) -> HashMap<String, String> {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(&upper_prefix)
                .map(|stripped| (stripped.to_ascii_lowercase().replace("__", "."), value))
        })
        .collect()
}

fn parse_flag(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "True")
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "http.base_url" => cfg.http.base_url = value,
        "http.user_agent" => cfg.http.user_agent = value,
        "http.timeout" => {
            if let Ok(parsed) = humantime::parse_duration(&value) {
                cfg.http.timeout = parsed;
            }
        }
        "preview.tooltip_mode" => cfg.preview.tooltip_mode = parse_flag(&value),
        "preview.tooltip_media_hide" => cfg.preview.tooltip_media_hide = parse_flag(&value),
        "preview.reverse_preview_key" => cfg.preview.reverse_preview_key = parse_flag(&value),
        "preview.long_press_delay" => {
            if let Ok(parsed) = humantime::parse_duration(&value) {
                cfg.preview.long_press_delay = parsed;
            }
        }
        "preview.scroll_to_skip" => cfg.preview.scroll_to_skip = parse_flag(&value),
        "preview.sync_history" => cfg.preview.sync_history = parse_flag(&value),
        "preview.auto_refresh_comments" => cfg.preview.auto_refresh_comments = parse_flag(&value),
        "preview.comment_refresh_interval" => {
            if let Ok(parsed) = humantime::parse_duration(&value) {
                cfg.preview.comment_refresh_interval = parsed;
            }
        }
        "preview.admin_panel" => cfg.preview.admin_panel = parse_flag(&value),
        "preview.admin_shortcuts" => cfg.preview.admin_shortcuts = parse_flag(&value),
        "preview.expand_recognize_range" => {
            cfg.preview.expand_recognize_range = parse_flag(&value)
        }
        "preview.comment_writing" => cfg.preview.comment_writing = parse_flag(&value),
        "preview.disable_cache" => cfg.preview.disable_cache = parse_flag(&value),
        "tuning.cache_capacity" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.tuning.cache_capacity = parsed;
            }
        }
        "tuning.hover_cooldown" => {
            if let Ok(parsed) = humantime::parse_duration(&value) {
                cfg.tuning.hover_cooldown = parsed;
            }
        }
        "tuning.scroll_confirmations" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.tuning.scroll_confirmations = parsed.max(1);
            }
        }
        "tuning.confirm_window" => {
            if let Ok(parsed) = humantime::parse_duration(&value) {
                cfg.tuning.confirm_window = parsed;
            }
        }
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gall-preview").join("config.yaml"))
}
