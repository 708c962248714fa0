use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Crate-wide configuration, loaded from a TOML file.
///
/// Every section has serde defaults so an empty file (or no file at all)
/// yields a working configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub confirmation: ConfirmationConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub workflow: WorkflowConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            confirmation: ConfirmationConfig::default(),
            store: StoreConfig::default(),
            policy: PolicyConfig::default(),
            workflow: WorkflowConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    /// Default lifetime of a pending confirmation. Fractional minutes are
    /// accepted so sub-minute expirations are expressible.
    #[serde(default = "default_expiration_minutes")]
    pub default_expiration_minutes: f64,

    /// Interval of the background expiration sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_expiration_minutes() -> f64 {
    30.0
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            default_expiration_minutes: default_expiration_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Whether to back the in-memory cache with a durable SQLite store.
    #[serde(default = "default_durable")]
    pub durable: bool,

    /// Database location. Relative paths resolve against the process
    /// working directory.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_durable() -> bool {
    true
}

fn default_db_path() -> PathBuf {
    PathBuf::from("greenlight/confirmations.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            durable: default_durable(),
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Operation categories that require human confirmation.
    #[serde(default = "default_confirm_categories")]
    pub confirm_categories: Vec<String>,

    /// Coarser per-agent fallback used when classification fails.
    #[serde(default)]
    pub confirm_agents: Vec<String>,

    /// Tools whose failure halts a batch execution.
    #[serde(default)]
    pub critical_tools: Vec<String>,
}

fn default_confirm_categories() -> Vec<String> {
    ["send", "create", "update", "delete"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            confirm_categories: default_confirm_categories(),
            confirm_agents: Vec::new(),
            critical_tools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    10
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.confirmation.default_expiration_minutes <= 0.0 {
            return Err(ConfigError::Validation(
                "confirmation.default_expiration_minutes must be positive".into(),
            ));
        }
        if self.confirmation.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "confirmation.sweep_interval_secs must be positive".into(),
            ));
        }
        if self.workflow.max_iterations == 0 {
            return Err(ConfigError::Validation(
                "workflow.max_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!((config.confirmation.default_expiration_minutes - 30.0).abs() < f64::EPSILON);
        assert_eq!(config.confirmation.sweep_interval_secs, 300);
        assert_eq!(config.workflow.max_iterations, 10);
        assert!(config.store.durable);
        assert!(config.policy.confirm_categories.contains(&"delete".to_string()));
        config.validate().unwrap();
    }

    #[test]
    fn partial_section_overrides_only_named_fields() {
        let config: Config = toml::from_str(
            r#"
            [workflow]
            max_iterations = 3

            [policy]
            critical_tools = ["send_payment"]
            "#,
        )
        .unwrap();
        assert_eq!(config.workflow.max_iterations, 3);
        assert_eq!(config.policy.critical_tools, vec!["send_payment".to_string()]);
        assert!((config.confirmation.default_expiration_minutes - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_expiration_rejected() {
        let config: Config = toml::from_str(
            r#"
            [confirmation]
            default_expiration_minutes = 0.0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_and_validates_a_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("greenlight.toml");
        std::fs::write(
            &path,
            r#"
            [confirmation]
            default_expiration_minutes = 5.0

            [store]
            durable = false
            "#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert!((config.confirmation.default_expiration_minutes - 5.0).abs() < f64::EPSILON);
        assert!(!config.store.durable);

        assert!(Config::load(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn zero_iterations_rejected() {
        let config: Config = toml::from_str(
            r#"
            [workflow]
            max_iterations = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
