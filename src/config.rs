use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Months, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::ItemKind;

const DEFAULT_ENV_PREFIX: &str = "FEEDSWEEP";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub timings: TimingsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    // Items posted before this date (00:00 UTC) are eligible for removal.
    #[serde(default = "default_cutoff_date")]
    pub cutoff_date: NaiveDate,
    #[serde(default = "default_enabled_kinds")]
    pub enabled_kinds: Vec<ItemKind>,
    #[serde(default = "default_delete_delay", with = "humantime_serde")]
    pub delete_delay: Duration,
    #[serde(default = "default_scroll_delay", with = "humantime_serde")]
    pub scroll_delay: Duration,
    #[serde(default = "default_max_items")]
    pub max_items: u64,
    #[serde(default = "default_max_scroll_attempts")]
    pub max_scroll_attempts: u64,
    #[serde(default = "default_empty_page_stop_threshold")]
    pub empty_page_stop_threshold: u32,
    #[serde(default = "default_max_errors")]
    pub max_errors: u64,
    #[serde(default = "default_report_every")]
    pub report_every: u64,
    #[serde(default)]
    pub debug: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            cutoff_date: default_cutoff_date(),
            enabled_kinds: default_enabled_kinds(),
            delete_delay: default_delete_delay(),
            scroll_delay: default_scroll_delay(),
            max_items: default_max_items(),
            max_scroll_attempts: default_max_scroll_attempts(),
            empty_page_stop_threshold: default_empty_page_stop_threshold(),
            max_errors: default_max_errors(),
            report_every: default_report_every(),
            debug: false,
        }
    }
}

impl RunConfig {
    pub fn cutoff(&self) -> DateTime<Utc> {
        let midnight = self
            .cutoff_date
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default();
        Utc.from_utc_datetime(&midnight)
    }

    pub fn kind_enabled(&self, kind: ItemKind) -> bool {
        self.enabled_kinds.contains(&kind)
    }
}

fn default_cutoff_date() -> NaiveDate {
    let today = Utc::now().date_naive();
    today.checked_sub_months(Months::new(1)).unwrap_or(today)
}

fn default_enabled_kinds() -> Vec<ItemKind> {
    ItemKind::ALL.to_vec()
}

fn default_delete_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_scroll_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_max_items() -> u64 {
    10_000
}

fn default_max_scroll_attempts() -> u64 {
    50
}

fn default_empty_page_stop_threshold() -> u32 {
    5
}

fn default_max_errors() -> u64 {
    10
}

fn default_report_every() -> u64 {
    10
}

// Settle intervals of the removal protocols. The feed gives no completion
// signal, so every step waits this long before looking for the next control.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TimingsConfig {
    #[serde(default = "default_scroll_settle", with = "humantime_serde")]
    pub scroll_settle: Duration,
    #[serde(default = "default_menu_open", with = "humantime_serde")]
    pub menu_open: Duration,
    #[serde(default = "default_reshare_menu_open", with = "humantime_serde")]
    pub reshare_menu_open: Duration,
    #[serde(default = "default_confirm_sheet", with = "humantime_serde")]
    pub confirm_sheet: Duration,
    #[serde(default = "default_after_confirm", with = "humantime_serde")]
    pub after_confirm: Duration,
    #[serde(default = "default_after_undo", with = "humantime_serde")]
    pub after_undo: Duration,
    #[serde(default = "default_dismiss", with = "humantime_serde")]
    pub dismiss: Duration,
    #[serde(default = "default_batch_pause", with = "humantime_serde")]
    pub batch_pause: Duration,
}

impl Default for TimingsConfig {
    fn default() -> Self {
        Self {
            scroll_settle: default_scroll_settle(),
            menu_open: default_menu_open(),
            reshare_menu_open: default_reshare_menu_open(),
            confirm_sheet: default_confirm_sheet(),
            after_confirm: default_after_confirm(),
            after_undo: default_after_undo(),
            dismiss: default_dismiss(),
            batch_pause: default_batch_pause(),
        }
    }
}

fn default_scroll_settle() -> Duration {
    Duration::from_millis(1500)
}

fn default_menu_open() -> Duration {
    Duration::from_millis(800)
}

fn default_reshare_menu_open() -> Duration {
    Duration::from_millis(2000)
}

fn default_confirm_sheet() -> Duration {
    Duration::from_millis(1500)
}

fn default_after_confirm() -> Duration {
    Duration::from_millis(1500)
}

fn default_after_undo() -> Duration {
    Duration::from_millis(2000)
}

fn default_dismiss() -> Duration {
    Duration::from_millis(500)
}

fn default_batch_pause() -> Duration {
    Duration::from_millis(500)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_log_retention", with = "humantime_serde")]
    pub log_retention: Duration,
    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            log_retention: default_log_retention(),
            max_log_entries: default_max_log_entries(),
        }
    }
}

fn default_log_retention() -> Duration {
    Duration::from_secs(3 * 24 * 60 * 60)
}

fn default_max_log_entries() -> usize {
    1000
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOverrides {
    pub cutoff_date: Option<NaiveDate>,
    pub enabled_kinds: Option<Vec<ItemKind>>,
    pub delete_delay: Option<Duration>,
    pub scroll_delay: Option<Duration>,
    pub max_items: Option<u64>,
    pub max_scroll_attempts: Option<u64>,
    pub empty_page_stop_threshold: Option<u32>,
    pub debug: Option<bool>,
}

impl RunOverrides {
    pub fn apply(&self, base: &RunConfig) -> RunConfig {
        let mut run = base.clone();
        if let Some(date) = self.cutoff_date {
            run.cutoff_date = date;
        }
        if let Some(kinds) = self.enabled_kinds.as_ref() {
            run.enabled_kinds = kinds.clone();
        }
        if let Some(delay) = self.delete_delay {
            run.delete_delay = delay;
        }
        if let Some(delay) = self.scroll_delay {
            run.scroll_delay = delay;
        }
        if let Some(max) = self.max_items {
            run.max_items = max;
        }
        if let Some(max) = self.max_scroll_attempts {
            run.max_scroll_attempts = max;
        }
        if let Some(threshold) = self.empty_page_stop_threshold {
            run.empty_page_stop_threshold = threshold;
        }
        if let Some(debug) = self.debug {
            run.debug = debug;
        }
        run
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            cfg = read_config_file(path)?;
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            cfg = read_config_file(&default_path)?;
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "run.cutoff_date" => {
            if let Ok(date) = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d") {
                cfg.run.cutoff_date = date;
            }
        }
        "run.enabled_kinds" => {
            let kinds = parse_kinds(&value);
            if !kinds.is_empty() {
                cfg.run.enabled_kinds = kinds;
            }
        }
        "run.delete_delay" => set_duration(&mut cfg.run.delete_delay, &value),
        "run.scroll_delay" => set_duration(&mut cfg.run.scroll_delay, &value),
        "run.max_items" => set_parsed(&mut cfg.run.max_items, &value),
        "run.max_scroll_attempts" => set_parsed(&mut cfg.run.max_scroll_attempts, &value),
        "run.empty_page_stop_threshold" => {
            set_parsed(&mut cfg.run.empty_page_stop_threshold, &value)
        }
        "run.max_errors" => set_parsed(&mut cfg.run.max_errors, &value),
        "run.report_every" => set_parsed(&mut cfg.run.report_every, &value),
        "run.debug" => cfg.run.debug = parse_bool(&value),
        "timings.scroll_settle" => set_duration(&mut cfg.timings.scroll_settle, &value),
        "timings.menu_open" => set_duration(&mut cfg.timings.menu_open, &value),
        "timings.reshare_menu_open" => set_duration(&mut cfg.timings.reshare_menu_open, &value),
        "timings.confirm_sheet" => set_duration(&mut cfg.timings.confirm_sheet, &value),
        "timings.after_confirm" => set_duration(&mut cfg.timings.after_confirm, &value),
        "timings.after_undo" => set_duration(&mut cfg.timings.after_undo, &value),
        "timings.dismiss" => set_duration(&mut cfg.timings.dismiss, &value),
        "timings.batch_pause" => set_duration(&mut cfg.timings.batch_pause, &value),
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        "storage.log_retention" => set_duration(&mut cfg.storage.log_retention, &value),
        "storage.max_log_entries" => set_parsed(&mut cfg.storage.max_log_entries, &value),
        _ => {}
    }
}

fn set_duration(slot: &mut Duration, value: &str) {
    if let Ok(duration) = humantime::parse_duration(value.trim()) {
        *slot = duration;
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, value: &str) {
    if let Ok(parsed) = value.trim().parse::<T>() {
        *slot = parsed;
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes")
}

pub fn parse_kinds(value: &str) -> Vec<ItemKind> {
    value
        .split(',')
        .filter_map(ItemKind::parse)
        .fold(Vec::new(), |mut kinds, kind| {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
            kinds
        })
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("feed-sweep").join("config.yaml"))
}

pub fn save(path: Option<PathBuf>, cfg: &Config) -> Result<PathBuf> {
    let path = if let Some(path) = path {
        path
    } else {
        default_config_path().context("config: unable to determine default config path")?
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("config: failed to create directory {}", parent.display()))?;
    }

    let contents = serde_yaml::to_string(cfg).context("config: failed to serialize config")?;
    fs::write(&path, contents)
        .with_context(|| format!("config: failed to write file {}", path.display()))?;

    Ok(path)
}
