//! `loopwatch config`: show what a watchdog would start with.

use std::path::PathBuf;

use clap::Args;
use loopwatch::{default_config_path, Settings, WatchdogConfig};
use serde::Serialize;

use crate::error::CliResult;

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Config file (defaults to $LOOPWATCH_CONFIG or ~/.loopwatch/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize, PartialEq)]
struct ResolvedConfig {
    source: Option<PathBuf>,
    source_exists: bool,
    interval_ms: f64,
    threshold_ms: f64,
    subtract_half_interval: bool,
}

impl ResolvedConfig {
    fn new(source: Option<PathBuf>, config: &WatchdogConfig) -> Self {
        Self {
            source_exists: source.as_deref().is_some_and(|path| path.exists()),
            source,
            interval_ms: config.interval().as_secs_f64() * 1000.0,
            threshold_ms: config.threshold().as_secs_f64() * 1000.0,
            subtract_half_interval: config.subtract_half_interval(),
        }
    }
}

pub fn run(args: ConfigArgs) -> CliResult<()> {
    let source = args.config.clone().or_else(default_config_path);
    let config = Settings::load(args.config)?.with_env_overrides().resolve()?;
    let resolved = ResolvedConfig::new(source, &config);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
    } else {
        let source = match (&resolved.source, resolved.source_exists) {
            (Some(path), true) => path.display().to_string(),
            (Some(path), false) => format!("{} (not found, using defaults)", path.display()),
            (None, _) => "defaults".to_string(),
        };
        println!("source:                 {source}");
        println!("interval_ms:            {}", resolved.interval_ms);
        println!("threshold_ms:           {}", resolved.threshold_ms);
        println!("subtract_half_interval: {}", resolved.subtract_half_interval);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_resolved_config_reports_millis() {
        let config = WatchdogConfig::new(Duration::from_millis(20), Duration::from_micros(40_500))
            .expect("config");
        let resolved = ResolvedConfig::new(Some(PathBuf::from("/nonexistent/loopwatch.toml")), &config);
        assert_eq!(resolved.interval_ms, 20.0);
        assert_eq!(resolved.threshold_ms, 40.5);
        assert!(!resolved.source_exists);
        assert!(!resolved.subtract_half_interval);
    }
}
