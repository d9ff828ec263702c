// Runtime configuration assembled from the command line

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_DEVICE: &str = "ens33";
pub const DEFAULT_REFRESH_SECS: u64 = 3;
pub const DEFAULT_REPORT_SECS: u64 = 300;

/// Report line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Human-readable single line
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Validated monitor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interface to capture on
    pub device: String,

    /// Root of the monitored process tree
    pub root_pid: i32,

    /// Seconds between inventory refreshes
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,

    /// Seconds between report lines
    #[serde(default = "default_report_secs")]
    pub report_secs: u64,

    #[serde(default)]
    pub format: ReportFormat,
}

fn default_refresh_secs() -> u64 {
    DEFAULT_REFRESH_SECS
}

fn default_report_secs() -> u64 {
    DEFAULT_REPORT_SECS
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            root_pid: 0,
            refresh_secs: DEFAULT_REFRESH_SECS,
            report_secs: DEFAULT_REPORT_SECS,
            format: ReportFormat::Text,
        }
    }
}

impl MonitorConfig {
    /// Reject settings the monitor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.root_pid <= 0 {
            anyhow::bail!(
                "A root process id is required (got {}); pass --pid <PID>",
                self.root_pid
            );
        }
        if self.device.trim().is_empty() {
            anyhow::bail!("Interface name must not be empty");
        }
        if self.refresh_secs == 0 {
            anyhow::bail!("Refresh interval must be at least 1 second");
        }
        if self.report_secs == 0 {
            anyhow::bail!("Report interval must be at least 1 second");
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> MonitorConfig {
        MonitorConfig {
            root_pid: 4242,
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.device, "ens33");
        assert_eq!(config.refresh_interval(), Duration::from_secs(3));
        assert_eq!(config.report_interval(), Duration::from_secs(300));
        assert_eq!(config.format, ReportFormat::Text);
    }

    #[test]
    fn test_pid_zero_is_rejected() {
        let config = MonitorConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("--pid"));
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        let mut config = valid();
        config.refresh_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.report_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.device = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let mut config = valid();
        config.format = ReportFormat::Json;

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"format\":\"json\""));

        let partial: MonitorConfig =
            serde_json::from_str(r#"{"device":"eth0","root_pid":7}"#).unwrap();
        assert_eq!(partial.refresh_secs, DEFAULT_REFRESH_SECS);
        assert_eq!(partial.report_secs, DEFAULT_REPORT_SECS);
        assert_eq!(partial.format, ReportFormat::Text);
    }
}
