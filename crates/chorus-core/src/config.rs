//! Configuration management for Chorus
//!
//! Repository-level settings for the coordination analyzer, the orchestration
//! layer and the shared state store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ChorusError, Result};

/// Repository-level Chorus configuration
///
/// Loaded from `.chorus/config.toml` in the repo root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChorusConfig {
    /// When to split a plan across agents
    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    /// Scheduling limits
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    /// Shared store persistence
    #[serde(default)]
    pub state: StateConfig,
}

/// Thresholds that trigger multi-agent coordination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_phase_threshold")]
    pub phase_threshold: usize,

    #[serde(default = "default_duration_threshold_minutes")]
    pub duration_threshold_minutes: f64,

    #[serde(default = "default_domain_threshold")]
    pub domain_threshold: usize,
}

/// Orchestration limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Agents allowed to run at once within a layer
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,

    /// Whole-run deadline
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Refuse to run graphs whose layering hit a cycle
    #[serde(default)]
    pub fail_on_cycle: bool,
}

/// Shared state store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    /// Snapshot file, relative to the working directory
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// Events retained in the debug log
    #[serde(default = "default_event_log_capacity")]
    pub event_log_capacity: usize,
}

// Default value providers
fn default_phase_threshold() -> usize {
    6
}

fn default_duration_threshold_minutes() -> f64 {
    60.0
}

fn default_domain_threshold() -> usize {
    3
}

fn default_max_concurrent_agents() -> usize {
    5
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from(".agent_state.json")
}

fn default_event_log_capacity() -> usize {
    1000
}

impl ChorusConfig {
    /// Load configuration from `.chorus/config.toml` or use defaults
    pub fn load_or_default(repo_root: &Path) -> Result<Self> {
        let config_path = repo_root.join(".chorus/config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Ok(toml::from_str(&content).map_err(|e| {
                ChorusError::Config(format!("Failed to parse config file: {}", e))
            })?)
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.chorus/config.toml`
    pub fn write_default(repo_root: &Path) -> Result<PathBuf> {
        let config_dir = repo_root.join(".chorus");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default()).map_err(|e| {
            ChorusError::Config(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }
}

impl OrchestratorSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            phase_threshold: default_phase_threshold(),
            duration_threshold_minutes: default_duration_threshold_minutes(),
            domain_threshold: default_domain_threshold(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_agents: default_max_concurrent_agents(),
            timeout_secs: default_timeout_secs(),
            fail_on_cycle: false,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            event_log_capacity: default_event_log_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_missing() {
        let dir = TempDir::new().unwrap();
        let config = ChorusConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, ChorusConfig::default());
        assert_eq!(config.analyzer.phase_threshold, 6);
        assert_eq!(config.orchestrator.max_concurrent_agents, 5);
        assert_eq!(config.orchestrator.timeout(), Duration::from_secs(3600));
        assert_eq!(config.state.event_log_capacity, 1000);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".chorus")).unwrap();
        std::fs::write(
            dir.path().join(".chorus/config.toml"),
            "[orchestrator]\nmax_concurrent_agents = 2\nfail_on_cycle = true\n",
        )
        .unwrap();

        let config = ChorusConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.orchestrator.max_concurrent_agents, 2);
        assert!(config.orchestrator.fail_on_cycle);
        assert_eq!(config.orchestrator.timeout_secs, 3600);
        assert_eq!(config.analyzer, AnalyzerConfig::default());
    }

    #[test]
    fn test_write_default_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = ChorusConfig::write_default(dir.path()).unwrap();
        assert!(path.exists());
        let config = ChorusConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, ChorusConfig::default());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".chorus")).unwrap();
        std::fs::write(dir.path().join(".chorus/config.toml"), "[analyzer\n").unwrap();
        let err = ChorusConfig::load_or_default(dir.path()).unwrap_err();
        assert!(matches!(err, ChorusError::Config(_)));
    }
}
