//! Configuration loading
//!
//! Resolution order for the config file:
//! 1. Command-line argument (highest priority)
//! 2. `XPM_CONFIG` environment variable
//! 3. `~/.config/xpm/config.toml` (or `/etc/xpm/config.toml` on Linux)
//! 4. Compiled defaults (fallback)
//!
//! A missing file is not an error: a warning is logged and defaults apply.
//! Secrets can always be supplied through the environment, which overrides
//! whatever the file says.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::{Error, Result};

pub const CONFIG_ENV_VAR: &str = "XPM_CONFIG";
pub const BUGZILLA_API_KEY_ENV_VAR: &str = "XPM_BUGZILLA_API_KEY";
pub const KINTO_PASSWORD_ENV_VAR: &str = "XPM_KINTO_PASSWORD";

/// Top-level TOML configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// SQLite database file; defaults to the platform data dir
    pub database_path: Option<PathBuf>,
    /// Address the HTTP API binds to
    pub bind_address: String,
    /// Base URL used when linking back to experiments from bug tickets
    pub experiment_url_base: String,
    /// Timeout applied to every outbound HTTP call
    pub http_timeout_secs: u64,
    pub bugzilla: BugzillaConfig,
    pub normandy: NormandyConfig,
    pub kinto: KintoConfig,
    pub schedule: ScheduleConfig,
    pub bucket_preset: BucketPresetConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            bind_address: "127.0.0.1:7001".to_string(),
            experiment_url_base: "https://localhost/experiments".to_string(),
            http_timeout_secs: 30,
            bugzilla: BugzillaConfig::default(),
            normandy: NormandyConfig::default(),
            kinto: KintoConfig::default(),
            schedule: ScheduleConfig::default(),
            bucket_preset: BucketPresetConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BugzillaConfig {
    pub host: String,
    pub api_key: Option<String>,
    pub cc_list: Vec<String>,
    pub product: String,
    pub component: String,
}

impl Default for BugzillaConfig {
    fn default() -> Self {
        Self {
            host: "https://bugzilla.allizom.org".to_string(),
            api_key: None,
            cc_list: Vec::new(),
            product: "Shield".to_string(),
            component: "Shield Study".to_string(),
        }
    }
}

impl BugzillaConfig {
    pub fn create_url(&self) -> String {
        format!("{}/rest/bug", self.host.trim_end_matches('/'))
    }

    pub fn comment_url(&self, bug_id: i64) -> String {
        format!("{}/rest/bug/{}/comment", self.host.trim_end_matches('/'), bug_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormandyConfig {
    /// Recipe endpoint; `{id}` is replaced with the recipe id
    pub recipe_url: String,
    /// Identity recorded when the recipe has no approver
    pub default_changelog_user: String,
}

impl Default for NormandyConfig {
    fn default() -> Self {
        Self {
            recipe_url: "https://normandy.cdn.mozilla.net/api/v3/recipe/{id}/".to_string(),
            default_changelog_user: "unknown-user@normandy.mozilla.com".to_string(),
        }
    }
}

impl NormandyConfig {
    pub fn recipe_url_for(&self, recipe_id: i64) -> String {
        self.recipe_url.replace("{id}", &recipe_id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KintoConfig {
    pub host: String,
    pub user: String,
    pub password: Option<String>,
    /// Workspace bucket records are pushed to
    pub bucket: String,
    /// Published bucket that clients read from
    pub bucket_main: String,
    pub collection: String,
    /// Identity recorded on changes made by the record-push passes
    pub default_changelog_user: String,
    /// Collection status meaning a review is pending
    pub review_status: String,
}

impl Default for KintoConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:8888/v1".to_string(),
            user: "experimenter".to_string(),
            password: None,
            bucket: "main-workspace".to_string(),
            bucket_main: "main".to_string(),
            collection: "nimbus-desktop-experiments".to_string(),
            default_changelog_user: "experimenter@kinto.mozilla.com".to_string(),
            review_status: "to-review".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Run reconciliation passes in the background while serving
    pub enabled: bool,
    pub push_queue_secs: u64,
    pub live_check_secs: u64,
    pub complete_check_secs: u64,
    pub normandy_status_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            push_queue_secs: 60,
            live_check_secs: 60,
            complete_check_secs: 300,
            normandy_status_secs: 300,
        }
    }
}

/// Bucket configuration applied to pushed rapid experiments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketPresetConfig {
    pub randomization_unit: String,
    /// Buckets allocated per experiment
    pub count: i64,
    /// Bucket modulus of the consuming client
    pub total: i64,
}

impl Default for BucketPresetConfig {
    fn default() -> Self {
        Self {
            randomization_unit: "normandy_id".to_string(),
            count: 100,
            total: 10000,
        }
    }
}

impl TomlConfig {
    /// Resolve, load and validate configuration, then apply environment
    /// overrides for secrets.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(cli_path) {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            Some(path) => {
                if cli_path.is_some() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                warn!("Config file {} not found, using defaults", path.display());
                Self::default()
            }
            None => {
                warn!("No config file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(BUGZILLA_API_KEY_ENV_VAR) {
            if !key.trim().is_empty() {
                self.bugzilla.api_key = Some(key);
            }
        }
        if let Ok(password) = std::env::var(KINTO_PASSWORD_ENV_VAR) {
            if !password.trim().is_empty() {
                self.kinto.password = Some(password);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket_preset.count <= 0 {
            return Err(Error::Config("bucket_preset.count must be positive".to_string()));
        }
        if self.bucket_preset.total < self.bucket_preset.count {
            return Err(Error::Config(
                "bucket_preset.total must be at least bucket_preset.count".to_string(),
            ));
        }
        if !self.normandy.recipe_url.contains("{id}") {
            return Err(Error::Config(
                "normandy.recipe_url must contain an {id} placeholder".to_string(),
            ));
        }
        let schedule = &self.schedule;
        if [
            schedule.push_queue_secs,
            schedule.live_check_secs,
            schedule.complete_check_secs,
            schedule.normandy_status_secs,
        ]
        .contains(&0)
        {
            return Err(Error::Config("schedule intervals must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Database path from config, or the platform default
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }
}

/// Pick the config file path following the documented priority order
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("xpm").join("config.toml"));
    if let Some(path) = user_config.filter(|p| p.exists()) {
        return Some(path);
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/xpm/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default database location
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("xpm"))
        .unwrap_or_else(|| PathBuf::from("./xpm_data"))
        .join("xpm.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(TomlConfig::default().validate().is_ok());
    }

    #[test]
    fn test_recipe_url_substitution() {
        let normandy = NormandyConfig::default();
        assert!(normandy.recipe_url_for(42).contains("/recipe/42/"));
    }

    #[test]
    fn test_bugzilla_urls() {
        let bugzilla = BugzillaConfig {
            host: "https://bugzilla.example.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(bugzilla.create_url(), "https://bugzilla.example.com/rest/bug");
        assert_eq!(
            bugzilla.comment_url(7),
            "https://bugzilla.example.com/rest/bug/7/comment"
        );
    }
}
