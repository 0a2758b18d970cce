use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::{HostEntry, RegistryFile};
use crate::registry::HostRegistry;
use crate::ssh_config::load_ssh_config;
use crate::transfer::TransferSettings;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ThemeColors {
    pub primary: String,
    pub secondary: String,
    pub background: String,
    pub text: String,
    pub highlight: String,
    pub error: String,
    pub warning: String,
    pub success: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Theme {
    pub name: String,
    pub colors: ThemeColors,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    pub max_workers: usize,
    pub max_retries: u32,
    pub recent_activity: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub default_theme: String,
    pub themes: Vec<Theme>,
    pub ssh_file_config: String,
    /// Merge `ssh_file_config` into the registry at startup
    pub auto_import: bool,
    pub connect_timeout_secs: u64,
    pub log_level: String,
    pub transfer: TransferConfig,
}

impl Default for ThemeColors {
    fn default() -> Self {
        Self {
            primary: "#454545".to_string(),
            secondary: "#454545".to_string(),
            background: "#1a202c".to_string(),
            text: "#ffffff".to_string(),
            highlight: "#454545".to_string(),
            error: "#ff005f".to_string(),
            warning: "#ffb86c".to_string(),
            success: "#50fa7b".to_string(),
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            colors: ThemeColors::default(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        let settings = TransferSettings::default();
        Self {
            max_workers: settings.max_workers,
            max_retries: settings.max_retries,
            recent_activity: settings.recent_activity,
        }
    }
}

impl From<&TransferConfig> for TransferSettings {
    fn from(config: &TransferConfig) -> Self {
        Self {
            max_workers: config.max_workers.max(1),
            max_retries: config.max_retries,
            recent_activity: config.recent_activity,
        }
    }
}

fn default_ssh_config_path() -> String {
    dirs::home_dir()
        .map(|home| home.join(".ssh").join("config"))
        .unwrap_or_else(|| PathBuf::from("~/.ssh/config"))
        .to_string_lossy()
        .into_owned()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_theme: "default".to_string(),
            themes: vec![Theme::default()],
            ssh_file_config: default_ssh_config_path(),
            auto_import: true,
            connect_timeout_secs: 10,
            log_level: "info".to_string(),
            transfer: TransferConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn theme(&self) -> Theme {
        self.themes
            .iter()
            .find(|t| t.name == self.default_theme)
            .or_else(|| self.themes.first())
            .cloned()
            .unwrap_or_default()
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings::from(&self.transfer)
    }

    pub fn ssh_config_path(&self) -> PathBuf {
        expand_home(&self.ssh_file_config)
    }
}

pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    config_dir: PathBuf,
    config_file: PathBuf,
    hosts_file: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("sshm");
        Self::with_dir(config_dir)
    }

    pub fn with_dir(config_dir: PathBuf) -> Result<Self> {
        // Create config directory if it doesn't exist
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        }

        let config_file = config_dir.join("sshm.toml");
        let hosts_file = config_dir.join("hosts.json");

        Ok(Self {
            config_dir,
            config_file,
            hosts_file,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn log_dir(&self) -> PathBuf {
        self.config_dir.join("logs")
    }

    /// Where ControlMaster sockets live. Kept short: socket paths are
    /// limited to roughly 100 bytes.
    pub fn control_dir(&self) -> PathBuf {
        self.config_dir.join("cm")
    }

    pub fn load_config(&self) -> Result<AppConfig> {
        // If config file doesn't exist, create it with default values
        if !self.config_file.exists() {
            let default_config = AppConfig::default();
            self.save_config(&default_config)?;
        }

        let content: String =
            fs::read_to_string(&self.config_file).context("Failed to read config file")?;

        let mut config: AppConfig =
            toml::from_str(&content).context("Failed to parse config file")?;

        // Ensure there's always at least the default theme
        if config.themes.is_empty() {
            config.themes.push(Theme::default());
        }

        // Ensure the default theme exists
        if !config.themes.iter().any(|t| t.name == config.default_theme) {
            config.default_theme = config.themes[0].name.clone();
        }

        Ok(config)
    }

    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(config).context("Failed to serialize config")?;
        fs::write(&self.config_file, toml).context("Failed to write config file")?;
        Ok(())
    }

    pub fn registry_path(&self) -> &Path {
        &self.hosts_file
    }

    /// Read the registry. Accepts the current `{hosts, folders}` layout and
    /// the older bare map of hosts. A file that cannot be parsed is moved
    /// aside to `hosts.json.bak` and an empty registry is returned.
    pub fn load_registry(&self) -> Result<HostRegistry> {
        if !self.hosts_file.exists() {
            return Ok(HostRegistry::new());
        }

        let content = fs::read_to_string(&self.hosts_file).context("Failed to read hosts file")?;
        if content.trim().is_empty() {
            return Ok(HostRegistry::new());
        }

        match parse_registry(&content) {
            Ok(file) => Ok(HostRegistry::from_file(file)),
            Err(e) => {
                let backup = self.hosts_file.with_extension("json.bak");
                tracing::error!(
                    "Failed to parse {}: {:#}. Backing it up to {}",
                    self.hosts_file.display(),
                    e,
                    backup.display()
                );
                fs::copy(&self.hosts_file, &backup).context("Failed to back up hosts file")?;
                Ok(HostRegistry::new())
            }
        }
    }

    /// Load the registry and, with `auto_import` on, merge in SSH config
    /// stanzas that are not in it yet. Saves only when the import added hosts.
    pub fn open_registry(&self, config: &AppConfig) -> Result<HostRegistry> {
        let mut registry = self.load_registry()?;
        if !config.auto_import {
            return Ok(registry);
        }

        let stanzas = load_ssh_config(&config.ssh_config_path())?;
        let report = registry.merge_imported(stanzas, false);
        if report.added > 0 {
            tracing::info!("Auto-imported {} hosts from SSH config", report.added);
            self.save_registry(&registry)?;
        }
        Ok(registry)
    }

    pub fn save_registry(&self, registry: &HostRegistry) -> Result<()> {
        let json = serde_json::to_string_pretty(&registry.to_file())
            .context("Failed to serialize hosts")?;
        let tmp = self.hosts_file.with_extension("json.tmp");
        fs::write(&tmp, json).context("Failed to write hosts file")?;
        fs::rename(&tmp, &self.hosts_file).context("Failed to replace hosts file")?;
        tracing::debug!("Saved {} hosts to {}", registry.len(), self.hosts_file.display());
        Ok(())
    }
}

fn parse_registry(content: &str) -> Result<RegistryFile> {
    let value: serde_json::Value = serde_json::from_str(content).context("Invalid JSON")?;

    let is_current = value
        .as_object()
        .map(|obj| obj.get("hosts").map_or(false, |h| h.is_object()) || obj.contains_key("folders"))
        .unwrap_or(false);
    if is_current {
        return serde_json::from_value(value).context("Invalid registry layout");
    }

    tracing::info!("Migrating legacy hosts file layout");
    let legacy: BTreeMap<String, HostEntry> =
        serde_json::from_value(value).context("Invalid legacy registry layout")?;
    let hosts = legacy
        .into_iter()
        .map(|(key, mut entry)| {
            if entry.name.is_empty() {
                entry.name = key.clone();
            }
            (key, entry)
        })
        .collect();
    Ok(RegistryFile {
        hosts,
        folders: Vec::new(),
    })
}
