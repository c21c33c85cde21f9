//! Watchdog configuration: validation, defaults and persistence.
//!
//! Handles:
//! - [`WatchdogConfig`]: the validated, immutable `(interval, threshold)` pair
//! - [`Options`]: untyped wrapper input checked before any core state changes
//! - [`Settings`]: `~/.loopwatch/config.toml` plus environment overrides

use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, ConfigField, ValueProblem};

/// Largest accepted interval or threshold, in milliseconds (2^53 - 1).
pub const MAX_MILLIS: f64 = 9_007_199_254_740_991.0;

pub const DEFAULT_INTERVAL_MS: u64 = 50;
pub const DEFAULT_THRESHOLD_MS: u64 = 100;

pub const CONFIG_PATH_ENV: &str = "LOOPWATCH_CONFIG";
pub const INTERVAL_ENV: &str = "LOOPWATCH_INTERVAL_MS";
pub const THRESHOLD_ENV: &str = "LOOPWATCH_THRESHOLD_MS";

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".loopwatch/config.toml";

/// User callback, invoked on the monitored thread with
/// `(duration_ms, stack)` once per resolved episode.
pub type Callback = Box<dyn FnMut(u64, String) + Send + 'static>;

// ═══════════════════════════════════════════════════════════════════════════════
// Validated configuration
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    interval: Duration,
    threshold: Duration,
    subtract_half_interval: bool,
}

impl WatchdogConfig {
    pub fn new(interval: Duration, threshold: Duration) -> Result<Self, ConfigError> {
        Ok(Self {
            interval: check_duration(ConfigField::Interval, interval)?,
            threshold: check_duration(ConfigField::Threshold, threshold)?,
            subtract_half_interval: false,
        })
    }

    pub fn from_millis(interval_ms: f64, threshold_ms: f64) -> Result<Self, ConfigError> {
        Ok(Self {
            interval: millis_to_duration(ConfigField::Interval, interval_ms)?,
            threshold: millis_to_duration(ConfigField::Threshold, threshold_ms)?,
            subtract_half_interval: false,
        })
    }

    /// Subtracts half an interval from reported durations, estimating that a
    /// block began midway through a polling cycle. Reports may then fall
    /// below `threshold`.
    pub fn with_half_interval_correction(mut self, enabled: bool) -> Self {
        self.subtract_half_interval = enabled;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn subtract_half_interval(&self) -> bool {
        self.subtract_half_interval
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            threshold: Duration::from_millis(DEFAULT_THRESHOLD_MS),
            subtract_half_interval: false,
        }
    }
}

fn max_duration() -> Duration {
    Duration::from_millis(MAX_MILLIS as u64)
}

fn check_duration(field: ConfigField, value: Duration) -> Result<Duration, ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::invalid(field, ValueProblem::NotPositive(0.0)));
    }
    if value > max_duration() {
        return Err(ConfigError::invalid(
            field,
            ValueProblem::TooLarge(value.as_secs_f64() * 1000.0),
        ));
    }
    Ok(value)
}

fn millis_to_duration(field: ConfigField, millis: f64) -> Result<Duration, ConfigError> {
    if millis.is_nan() {
        return Err(ConfigError::invalid(field, ValueProblem::NotFinite));
    }
    if millis <= 0.0 {
        return Err(ConfigError::invalid(field, ValueProblem::NotPositive(millis)));
    }
    if millis > MAX_MILLIS {
        return Err(ConfigError::invalid(field, ValueProblem::TooLarge(millis)));
    }
    let duration = Duration::from_secs_f64(millis / 1000.0);
    // Sub-nanosecond values round to zero and would spin the monitor.
    if duration.is_zero() {
        return Err(ConfigError::invalid(field, ValueProblem::NotPositive(millis)));
    }
    Ok(duration)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Untyped input
// ═══════════════════════════════════════════════════════════════════════════════

/// A millisecond value as supplied by a host: either a number or text that
/// still has to be parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MillisValue {
    Number(f64),
    Text(String),
}

impl MillisValue {
    fn resolve(&self, field: ConfigField) -> Result<f64, ConfigError> {
        match self {
            MillisValue::Number(value) => Ok(*value),
            MillisValue::Text(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|_| ConfigError::invalid(field, ValueProblem::NotANumber(text.clone()))),
        }
    }
}

impl From<f64> for MillisValue {
    fn from(value: f64) -> Self {
        MillisValue::Number(value)
    }
}

impl From<u64> for MillisValue {
    fn from(value: u64) -> Self {
        MillisValue::Number(value as f64)
    }
}

impl From<&str> for MillisValue {
    fn from(value: &str) -> Self {
        MillisValue::Text(value.to_string())
    }
}

impl From<String> for MillisValue {
    fn from(value: String) -> Self {
        MillisValue::Text(value)
    }
}

/// Input to [`crate::install`]. Every field is optional so that the
/// validation step can report exactly which one is missing.
#[derive(Default)]
pub struct Options {
    pub interval: Option<MillisValue>,
    pub threshold: Option<MillisValue>,
    pub subtract_half_interval: bool,
    callback: Option<Callback>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interval_ms(mut self, value: impl Into<MillisValue>) -> Self {
        self.interval = Some(value.into());
        self
    }

    pub fn threshold_ms(mut self, value: impl Into<MillisValue>) -> Self {
        self.threshold = Some(value.into());
        self
    }

    pub fn subtract_half_interval(mut self, enabled: bool) -> Self {
        self.subtract_half_interval = enabled;
        self
    }

    pub fn on_blocked<F>(mut self, callback: F) -> Self
    where
        F: FnMut(u64, String) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Checks the callback, then interval, then threshold.
    pub fn validate(self) -> Result<(WatchdogConfig, Callback), ConfigError> {
        let callback = self.callback.ok_or(ConfigError::MissingCallback)?;
        let interval = resolve_field(ConfigField::Interval, self.interval.as_ref())?;
        let threshold = resolve_field(ConfigField::Threshold, self.threshold.as_ref())?;
        let config = WatchdogConfig::from_millis(interval, threshold)?
            .with_half_interval_correction(self.subtract_half_interval);
        Ok((config, callback))
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("interval", &self.interval)
            .field("threshold", &self.threshold)
            .field("subtract_half_interval", &self.subtract_half_interval)
            .field("callback", &self.callback.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

fn resolve_field(field: ConfigField, value: Option<&MillisValue>) -> Result<f64, ConfigError> {
    let value = value.ok_or(ConfigError::invalid(field, ValueProblem::Missing))?;
    let millis = value.resolve(field)?;
    millis_to_duration(field, millis)?;
    Ok(millis)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Persisted settings
// ═══════════════════════════════════════════════════════════════════════════════

/// Settings read from the config file and environment. Missing values fall
/// back to [`DEFAULT_INTERVAL_MS`] and [`DEFAULT_THRESHOLD_MS`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub interval_ms: Option<MillisValue>,
    #[serde(default)]
    pub threshold_ms: Option<MillisValue>,
    #[serde(default)]
    pub subtract_half_interval: bool,
}

impl Settings {
    /// Loads settings from `path`, or from the default location when `None`.
    /// A missing file yields defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Settings, ConfigError> {
        let config_path = match path.or_else(default_config_path) {
            Some(path) => path,
            None => return Ok(Settings::default()),
        };

        if !config_path.exists() {
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&config_path).map_err(|err| ConfigError::Io {
            context: format!("Failed to read config {}", config_path.display()),
            source: err,
        })?;
        toml::from_str::<Settings>(&content).map_err(|err| ConfigError::Malformed {
            path: config_path.clone(),
            details: err.to_string(),
        })
    }

    /// Applies `LOOPWATCH_INTERVAL_MS` / `LOOPWATCH_THRESHOLD_MS`.
    pub fn with_env_overrides(self) -> Settings {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    pub fn with_overrides_from<F>(mut self, lookup: F) -> Settings
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(INTERVAL_ENV) {
            self.interval_ms = Some(MillisValue::Text(value));
        }
        if let Some(value) = lookup(THRESHOLD_ENV) {
            self.threshold_ms = Some(MillisValue::Text(value));
        }
        self
    }

    /// Converts into wrapper input, filling in defaults for absent values.
    pub fn into_options(self) -> Options {
        Options {
            interval: Some(
                self.interval_ms
                    .unwrap_or(MillisValue::from(DEFAULT_INTERVAL_MS)),
            ),
            threshold: Some(
                self.threshold_ms
                    .unwrap_or(MillisValue::from(DEFAULT_THRESHOLD_MS)),
            ),
            subtract_half_interval: self.subtract_half_interval,
            callback: None,
        }
    }

    /// Validates the settings without a callback.
    pub fn resolve(self) -> Result<WatchdogConfig, ConfigError> {
        let options = self.into_options();
        let interval = resolve_field(ConfigField::Interval, options.interval.as_ref())?;
        let threshold = resolve_field(ConfigField::Threshold, options.threshold.as_ref())?;
        Ok(WatchdogConfig::from_millis(interval, threshold)?
            .with_half_interval_correction(options.subtract_half_interval))
    }
}

/// `$LOOPWATCH_CONFIG`, else `~/.loopwatch/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::home_dir().map(|home| home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}
