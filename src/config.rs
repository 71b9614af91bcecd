use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::discovery::expand_tilde;
use crate::types::Source;

pub const DEFAULT_PRICE_TABLE_URL: &str =
    "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub pricing: PricingConfig,
    pub storage: StorageConfig,
    pub aggregation: AggregationConfig,
    pub logging: LoggingConfig,
    /// Source name -> root directory override (`~` allowed)
    pub sources: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    /// 0 picks `min(available cores, 8)`
    pub max_workers: usize,
    pub max_file_bytes: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PricingConfig {
    pub refresh: bool,
    pub remote_url: String,
    pub cooldown_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AggregationConfig {
    /// IANA name; empty means the system zone
    pub timezone: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_workers: 0,
            max_file_bytes: crate::scan::DEFAULT_MAX_FILE_BYTES,
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            refresh: true,
            remote_url: DEFAULT_PRICE_TABLE_URL.to_string(),
            cooldown_secs: 3600,
            timeout_secs: 10,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.agent-ledger".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

thread_local! {
    static TEST_CONFIG_PATH: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}

#[cfg(test)]
pub fn set_test_config_path(path: PathBuf) {
    TEST_CONFIG_PATH.with(|p| *p.borrow_mut() = Some(path));
}

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("Could not find home directory")
}

impl Config {
    pub fn config_path() -> Result<PathBuf> {
        #[cfg(test)]
        {
            if let Some(path) = TEST_CONFIG_PATH.with(|p| p.borrow().clone()) {
                return Ok(path);
            }
        }

        Ok(home_dir()?.join(".agent-ledger.toml"))
    }

    pub fn load() -> Result<Option<Config>> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        Ok(Some(config))
    }

    pub fn load_or_default() -> Result<Config> {
        Ok(Self::load()?.unwrap_or_default())
    }

    pub fn save(&self, silent: bool) -> Result<()> {
        let config_path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, content).context("Failed to write config file")?;

        if !silent {
            println!("Configuration saved to: {}", config_path.display());
        }

        Ok(())
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        Ok(expand_tilde(&self.storage.data_dir, &home_dir()?))
    }

    pub fn effective_workers(&self) -> usize {
        if self.scan.max_workers > 0 {
            return self.scan.max_workers;
        }
        crate::scan::default_max_workers()
    }

    pub fn pricing_cooldown(&self) -> Duration {
        Duration::from_secs(self.pricing.cooldown_secs)
    }

    pub fn pricing_timeout(&self) -> Duration {
        Duration::from_secs(self.pricing.timeout_secs)
    }

    pub fn timezone(&self) -> Option<&str> {
        Some(self.aggregation.timezone.trim()).filter(|tz| !tz.is_empty())
    }

    /// Configured source roots with `~` expanded. Unknown source names are
    /// reported as errors.
    pub fn source_overrides(&self) -> Result<HashMap<Source, PathBuf>> {
        let home = home_dir()?;
        self.sources
            .iter()
            .map(|(name, root)| {
                let source = name
                    .parse::<Source>()
                    .map_err(|e| anyhow::anyhow!("Invalid [sources] entry: {e}"))?;
                Ok((source, expand_tilde(root, &home)))
            })
            .collect()
    }
}

// CLI helper functions
pub fn create_default_config(overwrite: bool) -> Result<()> {
    let config = Config::default();
    if !std::fs::exists(Config::config_path()?)? || overwrite {
        config.save(true)?;

        println!("Created default configuration file.");
        println!("Edit it directly or use:");
        println!("   agent-ledger config set <key> <value>");
        println!("   {}", Config::config_path()?.display());
    } else {
        println!("Configuration already exists.  Pass `--overwrite` to overwrite.");
    }

    Ok(())
}

pub fn show_config() -> Result<()> {
    match Config::load()? {
        Some(config) => {
            println!("Current configuration:");
            println!("   Max Workers: {}", config.effective_workers());
            println!("   Max File Bytes: {}", config.scan.max_file_bytes);
            println!("   Pricing Refresh: {}", config.pricing.refresh);
            println!("   Price Table URL: {}", config.pricing.remote_url);
            println!("   Pricing Cooldown: {}s", config.pricing.cooldown_secs);
            println!("   Pricing Timeout: {}s", config.pricing.timeout_secs);
            println!("   Data Dir: {}", config.storage.data_dir);
            println!(
                "   Time Zone: {}",
                config.timezone().unwrap_or("system default")
            );
            println!("   Log Level: {}", config.logging.level);
            for (source, root) in &config.sources {
                println!("   Source Root [{source}]: {root}");
            }
        }
        None => {
            println!("No configuration file found.");
            println!("   Run 'agent-ledger config init' to create one.");
        }
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    value
        .parse::<bool>()
        .context("Invalid boolean value. Use 'true' or 'false'")
}

pub fn set_config_value(key: &str, value: &str) -> Result<()> {
    let mut config = Config::load_or_default()?;

    match key {
        "max-workers" => {
            config.scan.max_workers = value.parse::<usize>().context("Invalid number value")?;
        }
        "max-file-bytes" => {
            config.scan.max_file_bytes = value.parse::<u64>().context("Invalid number value")?;
        }
        "pricing-refresh" => config.pricing.refresh = parse_bool(value)?,
        "remote-url" => config.pricing.remote_url = value.to_string(),
        "cooldown-secs" => {
            config.pricing.cooldown_secs = value.parse::<u64>().context("Invalid number value")?;
        }
        "timeout-secs" => {
            config.pricing.timeout_secs = value.parse::<u64>().context("Invalid number value")?;
        }
        "data-dir" => config.storage.data_dir = value.to_string(),
        "timezone" => {
            if !value.is_empty() {
                value
                    .parse::<chrono_tz::Tz>()
                    .map_err(|_| anyhow::anyhow!("Invalid time zone: {value}"))?;
            }
            config.aggregation.timezone = value.to_string();
        }
        "log-level" => config.logging.level = value.to_string(),
        _ => match key.strip_prefix("source.") {
            Some(name) => {
                let source = name
                    .parse::<Source>()
                    .map_err(|e| anyhow::anyhow!("Unknown config key: {key} ({e})"))?;
                config
                    .sources
                    .insert(source.as_str().to_string(), value.to_string());
            }
            None => anyhow::bail!("Unknown config key: {}", key),
        },
    }

    config.save(false)?;
    Ok(())
}
