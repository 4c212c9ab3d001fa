//! Agent configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSettings {
    pub log_level: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// How the agent learns that the device set may have changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    /// Native hotplug when libusb supports it, polling otherwise
    #[default]
    Auto,
    /// libusb hotplug callbacks
    Hotplug,
    /// Hotplug callbacks debounced as device notifications
    Notification,
    /// Fixed-interval rescan
    Poll,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub strategy: SyncStrategy,
    /// Poll interval in seconds
    #[serde(default = "SyncSettings::default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Quiet period before the confirmation scan, in milliseconds
    #[serde(default = "SyncSettings::default_quiet_period")]
    pub quiet_period_ms: u64,
    /// Bound on one native event wait, in milliseconds
    #[serde(default = "SyncSettings::default_event_timeout")]
    pub event_timeout_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            strategy: SyncStrategy::default(),
            poll_interval_secs: Self::default_poll_interval(),
            quiet_period_ms: Self::default_quiet_period(),
            event_timeout_ms: Self::default_event_timeout(),
        }
    }
}

impl SyncSettings {
    fn default_poll_interval() -> u64 {
        5
    }

    fn default_quiet_period() -> u64 {
        500
    }

    fn default_event_timeout() -> u64 {
        100
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn event_timeout(&self) -> Duration {
        Duration::from_millis(self.event_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbSettings {
    /// VID:PID filters, e.g. `0x0483:0xdf11` or `0x0483:*`; empty reports every device
    #[serde(default)]
    pub filters: Vec<String>,
}

impl AgentConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/dfu-discovery/agent.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: AgentConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("dfu-discovery").join("agent.toml")
        } else {
            PathBuf::from(".config/dfu-discovery/agent.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.agent.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.agent.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.sync.poll_interval_secs == 0 {
            return Err(anyhow!("sync.poll_interval_secs must be greater than zero"));
        }
        if self.sync.quiet_period_ms == 0 {
            return Err(anyhow!("sync.quiet_period_ms must be greater than zero"));
        }
        if self.sync.event_timeout_ms == 0 {
            return Err(anyhow!("sync.event_timeout_ms must be greater than zero"));
        }

        for filter in &self.usb.filters {
            Self::validate_filter(filter)?;
        }

        Ok(())
    }

    /// Validate a USB device filter pattern (VID:PID)
    pub fn validate_filter(filter: &str) -> Result<()> {
        let Some((vid, pid)) = filter.split_once(':') else {
            return Err(anyhow!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x1234:0x5678' or '0x1234:*')",
                filter
            ));
        };

        if vid != "*" {
            Self::validate_hex_id(vid, "VID", filter)?;
        }
        if pid != "*" {
            Self::validate_hex_id(pid, "PID", filter)?;
        }

        Ok(())
    }

    fn validate_hex_id(id: &str, name: &str, filter: &str) -> Result<()> {
        let Some(hex_part) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) else {
            return Err(anyhow!(
                "Invalid {} '{}' in filter '{}', must start with '0x' (e.g., '0x1234')",
                name,
                id,
                filter
            ));
        };

        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))?;

        Ok(())
    }
}
