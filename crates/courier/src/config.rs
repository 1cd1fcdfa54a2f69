//! Courier configuration management

use crate::poller::{DEFAULT_MAX_TRIES, DEFAULT_RETRY_DELAY, RetryBudget};
use crate::transfer::{DEFAULT_COPY_COMMAND, DEFAULT_EJECT_COMMAND, TransferOptions};
use crate::watcher::WatchOptions;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourierConfig {
    #[serde(default)]
    pub watcher: WatcherSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherSettings {
    #[serde(default = "WatcherSettings::default_log_level")]
    pub log_level: String,
    /// Samples each poller takes before giving up
    #[serde(default = "WatcherSettings::default_max_tries")]
    pub max_tries: u32,
    /// Pause between samples in milliseconds
    #[serde(default = "WatcherSettings::default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            max_tries: Self::default_max_tries(),
            retry_delay_ms: Self::default_retry_delay_ms(),
        }
    }
}

impl WatcherSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_max_tries() -> u32 {
        DEFAULT_MAX_TRIES
    }

    fn default_retry_delay_ms() -> u64 {
        DEFAULT_RETRY_DELAY.as_millis() as u64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    /// File copied to each newly mounted device (supports `~`)
    #[serde(default)]
    pub source_file: Option<String>,
    /// Eject the device once the copy succeeded
    #[serde(default = "TransferSettings::default_eject_after_move")]
    pub eject_after_move: bool,
    /// Copy command template with `{source}` and `{dest}` placeholders
    #[serde(default = "TransferSettings::default_copy_command")]
    pub copy_command: String,
    /// Eject command template with a `{device}` placeholder
    #[serde(default = "TransferSettings::default_eject_command")]
    pub eject_command: String,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            source_file: None,
            eject_after_move: Self::default_eject_after_move(),
            copy_command: Self::default_copy_command(),
            eject_command: Self::default_eject_command(),
        }
    }
}

impl TransferSettings {
    fn default_eject_after_move() -> bool {
        true
    }

    fn default_copy_command() -> String {
        DEFAULT_COPY_COMMAND.to_string()
    }

    fn default_eject_command() -> String {
        DEFAULT_EJECT_COMMAND.to_string()
    }
}

impl CourierConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-courier/courier.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: CourierConfig = toml::from_str(&content)
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
                tracing::warn!("Failed to load config: {}, using defaults", e);
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
            config_dir.join("usb-courier").join("courier.toml")
        } else {
            PathBuf::from(".config/usb-courier/courier.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.watcher.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.watcher.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.watcher.max_tries == 0 {
            return Err(anyhow!("max_tries must be at least 1"));
        }

        Self::validate_template(
            "copy_command",
            &self.transfer.copy_command,
            &["{source}", "{dest}"],
        )?;
        Self::validate_template("eject_command", &self.transfer.eject_command, &["{device}"])?;

        if let Some(source) = &self.transfer.source_file
            && source.trim().is_empty()
        {
            return Err(anyhow!("source_file must not be empty"));
        }

        Ok(())
    }

    /// Check a command template carries every required placeholder
    fn validate_template(name: &str, template: &str, placeholders: &[&str]) -> Result<()> {
        for placeholder in placeholders {
            if !template.contains(placeholder) {
                return Err(anyhow!(
                    "Invalid {} '{}', missing {} placeholder",
                    name,
                    template,
                    placeholder
                ));
            }
        }
        Ok(())
    }

    /// Source file with `~` and environment variables expanded
    pub fn source_path(&self) -> Result<Option<PathBuf>> {
        self.transfer
            .source_file
            .as_deref()
            .map(|raw| {
                shellexpand::full(raw)
                    .map(|expanded| PathBuf::from(expanded.as_ref()))
                    .with_context(|| format!("Failed to expand source_file '{}'", raw))
            })
            .transpose()
    }

    /// Watcher options described by this configuration
    pub fn watch_options(&self) -> Result<WatchOptions> {
        Ok(WatchOptions {
            budget: RetryBudget::new(
                self.watcher.max_tries,
                Duration::from_millis(self.watcher.retry_delay_ms),
            ),
            transfer: TransferOptions {
                copy_command: self.transfer.copy_command.clone(),
                eject_command: self.transfer.eject_command.clone(),
                eject_after_move: self.transfer.eject_after_move,
            },
            source_file: self.source_path()?,
        })
    }
}
