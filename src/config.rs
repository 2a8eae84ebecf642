// src/config.rs
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::drivers::ConfigError;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramConfig {
    pub bin_width_mv: f64,
    pub bin_count: usize,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            bin_width_mv: 10.0,
            bin_count: 600,
        }
    }
}

/// Sizes of the running statistics. Fixed for the lifetime of a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub rate_window_secs: u64,
    pub interval_capacity: usize,
    pub sample_capacity: usize,
    pub min_noise_samples: usize,
    pub histogram: HistogramConfig,
    pub rate_history_capacity: usize,
    pub hit_flash_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            rate_window_secs: 60,
            interval_capacity: 256,
            sample_capacity: 1200,
            min_noise_samples: 10,
            histogram: HistogramConfig::default(),
            rate_history_capacity: 180,
            hit_flash_ms: 350,
        }
    }
}

impl StatsConfig {
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }

    pub fn hit_flash(&self) -> Duration {
        Duration::from_millis(self.hit_flash_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub tick_interval_ms: u64,
    pub port_check_interval_ms: u64,
    pub environment_refresh_secs: u64,
    pub rate_history_interval_secs: u64,
    pub channel_capacity: usize,
    pub plot_capacity: usize,
    pub stats: StatsConfig,
    /// Sent once, in order, right after the device link opens.
    pub startup_commands: Vec<String>,
    pub settle_delay_ms: u64,
    pub log_dir: PathBuf,
    pub log_prefix: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            read_timeout_ms: 1000,
            tick_interval_ms: 50,
            port_check_interval_ms: 1000,
            environment_refresh_secs: 300,
            rate_history_interval_secs: 60,
            channel_capacity: 4096,
            plot_capacity: 5000,
            stats: StatsConfig::default(),
            startup_commands: vec![
                "SET MODE FIXED".to_owned(),
                "SET BASELINE_MV 880".to_owned(),
                "SET THRESHOLD_MV 50".to_owned(),
                "SET PULSER ON".to_owned(),
            ],
            settle_delay_ms: 250,
            log_dir: PathBuf::from("."),
            log_prefix: "muon".to_owned(),
        }
    }
}

impl LoggerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_owned()));
        if self.tick_interval_ms == 0 {
            return invalid("tick_interval_ms must be greater than zero");
        }
        if self.read_timeout_ms == 0 {
            return invalid("read_timeout_ms must be greater than zero");
        }
        if self.channel_capacity == 0 {
            return invalid("channel_capacity must be greater than zero");
        }
        if self.plot_capacity == 0 {
            return invalid("plot_capacity must be greater than zero");
        }
        let stats = &self.stats;
        if stats.interval_capacity == 0 || stats.sample_capacity == 0 {
            return invalid("statistics buffers need a non-zero capacity");
        }
        if stats.rate_history_capacity == 0 {
            return invalid("rate_history_capacity must be greater than zero");
        }
        let width = stats.histogram.bin_width_mv;
        if !width.is_finite() || width <= 0.0 {
            return invalid("histogram bin width must be a positive number");
        }
        if stats.histogram.bin_count == 0 {
            return invalid("histogram needs at least one bin");
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn port_check_interval(&self) -> Duration {
        Duration::from_millis(self.port_check_interval_ms)
    }

    pub fn environment_refresh(&self) -> Duration {
        Duration::from_secs(self.environment_refresh_secs)
    }

    pub fn rate_history_interval(&self) -> Duration {
        Duration::from_secs(self.rate_history_interval_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = LoggerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.startup_commands.len(), 4);
        assert_eq!(config.tick_interval(), Duration::from_millis(50));
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: LoggerConfig =
            serde_json::from_str(r#"{"baud_rate": 9600, "stats": {"histogram": {"bin_width_mv": 5.0}}}"#)
                .unwrap();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.stats.histogram.bin_width_mv, 5.0);
        assert_eq!(config.stats.histogram.bin_count, 600);
        assert_eq!(config.stats.sample_capacity, 1200);
    }

    #[test]
    fn rejects_degenerate_histogram() {
        let mut config = LoggerConfig::default();
        config.stats.histogram.bin_width_mv = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = LoggerConfig::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
