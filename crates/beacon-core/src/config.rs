//! Configuration management for Beacon.
//!
//! Loads configuration from ${BEACON_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::RefreshPolicy;
use crate::notifications::ToastConfig;
use crate::poller::PollerConfig;

/// Returns the embedded default config template.
///
/// This is embedded from default_config.toml at compile time.
/// To update, edit default_config.toml directly.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

/// Recursively merges items from source table into target table.
fn merge_items(target: &mut toml_edit::Table, source: &toml_edit::Table) {
    use toml_edit::Item;

    for (key, value) in source {
        match value {
            Item::Value(v) => {
                target[key] = Item::Value(v.clone());
            }
            Item::Table(src_table) => {
                if let Some(Item::Table(target_table)) = target.get_mut(key) {
                    merge_items(target_table, src_table);
                } else {
                    target[key] = Item::Table(src_table.clone());
                }
            }
            Item::ArrayOfTables(src_arr) => {
                target[key] = Item::ArrayOfTables(src_arr.clone());
            }
            Item::None => {}
        }
    }
}

pub mod paths {
    //! Path resolution for Beacon configuration.
    //!
    //! BEACON_HOME resolution order:
    //! 1. BEACON_HOME environment variable (if set)
    //! 2. $HOME/.config/beacon (default)
    //! 3. ./.beacon when no home directory is known

    use std::path::PathBuf;

    /// Returns the Beacon home directory.
    pub fn beacon_home() -> PathBuf {
        if let Ok(home) = std::env::var("BEACON_HOME") {
            return PathBuf::from(home);
        }

        match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(".config").join("beacon"),
            None => PathBuf::from(".beacon"),
        }
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        beacon_home().join("config.toml")
    }
}

/// Session endpoints and refresh schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Dashboard API origin, e.g. `https://app.example.com`
    pub base_url: String,
    pub login_path: String,
    pub refresh_path: String,
    pub logout_path: String,
    /// How long before expiry the proactive refresh fires
    pub refresh_lead_secs: u64,
    /// Sleep before each retry; its length is the retry count
    pub retry_delays_ms: Vec<u64>,
    /// Where the route guard sends users whose session ended
    pub fallback_path: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            login_path: "/api/auth/login".to_string(),
            refresh_path: "/api/auth/refresh".to_string(),
            logout_path: "/api/auth/logout".to_string(),
            refresh_lead_secs: 300,
            retry_delays_ms: vec![1000, 2000, 4000],
            fallback_path: "/login".to_string(),
        }
    }
}

impl AuthConfig {
    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            lead: Duration::from_secs(self.refresh_lead_secs),
            retry_delays: self
                .retry_delays_ms
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
        }
    }

    /// Joins `path` onto the configured origin.
    ///
    /// # Errors
    /// Returns an error if the base URL or path do not form a valid URL.
    pub fn endpoint(&self, path: &str) -> Result<url::Url> {
        let base = url::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid auth base_url '{}'", self.base_url))?;
        base.join(path)
            .with_context(|| format!("Invalid endpoint path '{path}'"))
    }
}

/// Job status polling cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSection {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_factor: f64,
    /// Jitter bound; each delay moves by up to this much either way
    pub jitter_ms: u64,
    /// Status endpoint template; `{id}` is replaced by the job id
    pub status_path: String,
}

impl Default for PollerSection {
    fn default() -> Self {
        Self {
            initial_interval_ms: 2000,
            max_interval_ms: 10_000,
            backoff_factor: 1.5,
            jitter_ms: 500,
            status_path: "/api/jobs/{id}".to_string(),
        }
    }
}

impl PollerSection {
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            backoff_factor: self.backoff_factor,
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }

    /// Status path for a concrete job id.
    pub fn status_path_for(&self, job_id: &str) -> String {
        self.status_path.replace("{id}", job_id)
    }
}

/// Toast queue limits and per-severity display times.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsSection {
    pub max_visible: usize,
    pub exit_animation_ms: u64,
    pub success_ms: u64,
    pub info_ms: u64,
    pub warning_ms: u64,
    pub error_ms: u64,
}

impl Default for NotificationsSection {
    fn default() -> Self {
        Self {
            max_visible: 3,
            exit_animation_ms: 250,
            success_ms: 4000,
            info_ms: 5000,
            warning_ms: 7000,
            error_ms: 10_000,
        }
    }
}

impl NotificationsSection {
    pub fn toast_config(&self) -> ToastConfig {
        ToastConfig {
            max_visible: self.max_visible,
            exit_animation: Duration::from_millis(self.exit_animation_ms),
            success: Duration::from_millis(self.success_ms),
            info: Duration::from_millis(self.info_ms),
            warning: Duration::from_millis(self.warning_ms),
            error: Duration::from_millis(self.error_ms),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub auth: AuthConfig,
    pub poller: PollerSection,
    pub notifications: NotificationsSection,
}

impl Config {
    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Creates a default config file at the given path.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Generates a fresh config TOML from Rust defaults.
    ///
    /// Uses the embedded template for structure/comments and merges
    /// generated values from `Config::default()` into it.
    ///
    /// # Errors
    /// Returns an error if the template or the generated values fail to parse.
    pub fn generate() -> Result<String> {
        use toml_edit::DocumentMut;

        let generated_toml = toml::to_string(&Config::default())
            .context("Failed to serialize default config to TOML")?;

        let mut doc: DocumentMut = default_config_template()
            .parse()
            .context("Failed to parse default config template")?;
        let generated_doc: DocumentMut = generated_toml
            .parse()
            .context("Failed to parse generated config")?;

        merge_items(doc.as_table_mut(), generated_doc.as_table());

        Ok(doc.to_string())
    }

    /// Writes config content to a file, creating parent directories as needed.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}
