//! Configuration for shipwright.
//!
//! Settings are read from `shipwright.toml`, with environment variables
//! layered on top (file → environment). The API key itself never lives in
//! the file; the file names the environment variable that holds it.
//!
//! # Configuration File Format
//!
//! ```toml
//! [store]
//! path = "shipwright.db"
//!
//! [generation]
//! endpoint = "https://api.openai.com/v1/chat/completions"
//! model = "gpt-4o"
//! api_key_env = "SHIPWRIGHT_API_KEY"
//! max_attempts = 3
//!
//! [pipeline]
//! role_timeout_secs = 600
//! iteration_cap = 200
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::llm::RetryPolicy;
use crate::orchestrator::RunnerOptions;

pub const CONFIG_FILE: &str = "shipwright.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreSection,
    pub generation: GenerationSection,
    pub pipeline: PipelineSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// SQLite database path. Overridden by `SHIPWRIGHT_DB`.
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("shipwright.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSection {
    /// OpenAI-compatible chat-completions endpoint. Overridden by
    /// `SHIPWRIGHT_ENDPOINT`.
    pub endpoint: String,
    /// Model name. Overridden by `SHIPWRIGHT_MODEL`.
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Retry budget for transient generation failures.
    pub max_attempts: u32,
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "SHIPWRIGHT_API_KEY".to_string(),
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Wall-clock ceiling per role invocation, in seconds.
    pub role_timeout_secs: u64,
    /// Upper bound on development-loop iterations per run.
    pub iteration_cap: u32,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            role_timeout_secs: 600,
            iteration_cap: 200,
        }
    }
}

impl Config {
    /// Load configuration from a specific file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load `shipwright.toml` from `dir` if it exists, otherwise start
    /// from defaults. Environment overrides apply either way.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            return Self::load(&path);
        }
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration, pretty-printed, to `dir`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("SHIPWRIGHT_DB") {
            self.store.path = PathBuf::from(path);
        }
        if let Ok(endpoint) = std::env::var("SHIPWRIGHT_ENDPOINT") {
            self.generation.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("SHIPWRIGHT_MODEL") {
            self.generation.model = model;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.generation.endpoint.is_empty() {
            bail!("generation.endpoint must not be empty");
        }
        if self.generation.model.is_empty() {
            bail!("generation.model must not be empty");
        }
        if self.generation.max_attempts == 0 {
            bail!("generation.max_attempts must be at least 1");
        }
        if self.pipeline.iteration_cap == 0 {
            bail!("pipeline.iteration_cap must be at least 1");
        }
        Ok(())
    }

    /// The API key, from the environment variable the config names.
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.generation.api_key_env).with_context(|| {
            format!(
                "API key not found: set the {} environment variable",
                self.generation.api_key_env
            )
        })
    }

    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            retry: RetryPolicy {
                max_attempts: self.generation.max_attempts,
                base_delay: Duration::from_secs(1),
            },
            role_timeout: Duration::from_secs(self.pipeline.role_timeout_secs),
            iteration_cap: self.pipeline.iteration_cap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.generation.max_attempts, 3);
        assert_eq!(config.pipeline.role_timeout_secs, 600);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[generation]\nmodel = \"local-model\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.generation.model, "local-model");
        assert_eq!(config.store.path, PathBuf::from("shipwright.db"));
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.pipeline.iteration_cap = 50;
        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.pipeline.iteration_cap, 50);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[generation]\nmax_attempts = 0\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn runner_options_reflect_config() {
        let mut config = Config::default();
        config.pipeline.role_timeout_secs = 30;
        config.generation.max_attempts = 5;
        let options = config.runner_options();
        assert_eq!(options.role_timeout, Duration::from_secs(30));
        assert_eq!(options.retry.max_attempts, 5);
    }
}
